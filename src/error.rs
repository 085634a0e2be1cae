//! Error types shared by both ends of a session.

use std::io;
use thiserror::Error;

use crate::engine::EngineError;

/// Failures while moving a single message on or off the wire.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection closed in the middle of a message")]
    Truncated,

    #[error("message of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unable to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// True when the bytes arrived but could not be understood.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated | ProtocolError::FrameTooLarge(_) | ProtocolError::Malformed(_)
        )
    }
}

/// Anything that ends a controller or worker session early.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("peer did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("shutdown not received in time")]
    ShutdownTimeout,

    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("outbound queue closed before the session finished")]
    OutboundClosed,

    #[error("search failed: {0}")]
    Engine(#[from] EngineError),

    #[error("session task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl SessionError {
    pub fn is_decode(&self) -> bool {
        matches!(self, SessionError::Protocol(e) if e.is_decode())
    }
}

/// Failures while locating a user's record in a shadow file.
#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("unable to read shadow file: {0}")]
    Io(#[from] io::Error),

    #[error("user {0:?} not found in shadow file")]
    UserNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_distinguishable() {
        let malformed = serde_json::from_str::<u8>("x").unwrap_err();

        assert!(SessionError::from(ProtocolError::Malformed(malformed)).is_decode());
        assert!(SessionError::from(ProtocolError::Truncated).is_decode());
        assert!(!SessionError::from(ProtocolError::ConnectionClosed).is_decode());
        assert!(!SessionError::ShutdownTimeout.is_decode());
    }

    #[test]
    fn user_not_found_names_the_user() {
        let msg = ShadowError::UserNotFound("mallory".into()).to_string();
        assert!(msg.contains("\"mallory\""));
    }
}
