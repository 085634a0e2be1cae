use crate::error::ProtocolError;
use crate::structs::Message;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are treated as garbage rather than buffered.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Serializes one message into its wire form, newline included.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    buf.push(b'\n');

    Ok(buf)
}

/// Parses one frame, without its trailing newline.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let message: Message = serde_json::from_slice(frame).map_err(ProtocolError::Malformed)?;

    if let Message::Unknown = message {
        // only pay for the second parse when there is something to report
        let command = serde_json::from_slice::<serde_json::Value>(frame)
            .ok()
            .and_then(|value| value.get("command")?.as_str().map(str::to_owned))
            .unwrap_or_default();
        tracing::warn!(%command, "ignoring unrecognized command");
    }

    Ok(message)
}

#[async_trait]
pub trait AsyncMessageSendExt {
    async fn send(&mut self, message: &Message) -> Result<(), ProtocolError>;
}

#[async_trait]
impl<W> AsyncMessageSendExt for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let buf = encode(message)?;
        self.write_all(&buf).await?;
        self.flush().await?;

        Ok(())
    }
}

#[async_trait]
pub trait AsyncMessageRecvExt {
    /// Reads the next message off the stream.
    ///
    /// Unrecognized commands come back as [`Message::Unknown`] so callers can
    /// skip them; anything that fails to parse is an error.
    async fn receive(&mut self) -> Result<Message, ProtocolError>;
}

#[async_trait]
impl<R> AsyncMessageRecvExt for R
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Message, ProtocolError> {
        let mut buf = Vec::new();

        loop {
            let available = self.fill_buf().await?;
            if available.is_empty() {
                return if buf.is_empty() {
                    Err(ProtocolError::ConnectionClosed)
                } else {
                    Err(ProtocolError::Truncated)
                };
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    buf.extend_from_slice(&available[..end]);
                    self.consume(end + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    buf.extend_from_slice(available);
                    self.consume(len);
                }
            }

            if buf.len() > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge(buf.len()));
            }
        }

        if buf.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(buf.len()));
        }

        decode(&buf)
    }
}
