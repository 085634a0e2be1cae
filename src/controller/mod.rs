use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use futures_util::future::try_join;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{Instrument, Span};

use crate::error::{ProtocolError, SessionError};
use crate::metrics::SessionMetrics;
use crate::structs::{CrackResult, CrackingJob, HeartbeatReport, Message};
use crate::traits::{AsyncMessageRecvExt, AsyncMessageSendExt};

lazy_static! {
    static ref SPINNER_STYLE: ProgressStyle =
        ProgressStyle::with_template("{spinner} {prefix} {msg:.dim} {human_pos:>12} tested ({elapsed})")
            .unwrap()
            .tick_chars("⠟⠯⠷⠾⠽⠻ ");
    static ref COMPLETED_STYLE: ProgressStyle =
        ProgressStyle::with_template("⠿ {prefix} {msg:.green} {human_pos:>12} tested ({elapsed})")
            .unwrap();
    static ref FAILED_STYLE: ProgressStyle =
        ProgressStyle::with_template("x {prefix} {msg:.red} {human_pos:>12} tested ({elapsed})")
            .unwrap();
}

const OUTBOUND_CAPACITY: usize = 8;
const EVENT_CAPACITY: usize = 8;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// How long to wait for the worker's `ready`.
    pub handshake_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Listening,
    Accepted,
    AwaitingReady,
    Dispatched,
    AwaitingOutcome,
    Finalizing,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Found {
        password: String,
        metrics: SessionMetrics,
    },

    /// The worker ran out of candidates. Only happens with a length cap.
    NotFound { metrics: SessionMetrics },

    /// The worker sent `error` instead of a result.
    Failed { reason: String },
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub heartbeats: Vec<HeartbeatReport>,
}

/// What the reader hands to the session, in arrival order.
#[derive(Debug)]
enum Inbound {
    Ready,
    Heartbeat(HeartbeatReport),
    Result {
        result: CrackResult,
        received_at: OffsetDateTime,
    },
    Failed(String),
}

/// Drives one worker connection from `ready` to `shutdown`.
pub struct ControllerSession {
    job: CrackingJob,
    config: ControllerConfig,
    progress: ProgressBar,
    state: ControllerState,
    span: Span,
}

impl ControllerSession {
    pub fn new(job: CrackingJob, config: ControllerConfig, span: Span) -> Self {
        Self {
            job,
            config,
            progress: ProgressBar::hidden(),
            state: ControllerState::Listening,
            span,
        }
    }

    /// Shows heartbeat progress on this bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Accepts exactly one worker, then stops listening and runs the session.
    pub async fn serve(self, listener: TcpListener) -> Result<SessionReport, SessionError> {
        let span = self.span.clone();

        async move {
            if let Ok(addr) = listener.local_addr() {
                tracing::info!(%addr, "listening for a worker");
            }

            let (stream, peer) = listener.accept().await?;
            drop(listener);
            stream.set_nodelay(true)?;
            tracing::info!(%peer, "worker connected");

            self.run(stream).await
        }
        .instrument(span)
        .await
    }

    pub async fn run<S>(self, stream: S) -> Result<SessionReport, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let span = self.span.clone();
        self.drive(stream).instrument(span).await
    }

    async fn drive<S>(mut self, stream: S) -> Result<SessionReport, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.transition(ControllerState::Accepted);

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, mut events) = mpsc::channel(EVENT_CAPACITY);
        let period = Duration::from_secs(self.job.interval_seconds.max(1).into());

        let writer = tokio::spawn(write_messages(write_half, outbound_rx, period).in_current_span());
        let reader = tokio::spawn(read_messages(BufReader::new(read_half), events_tx).in_current_span());

        let mut heartbeats = Vec::new();
        let outcome = match self.exchange(&outbound, &mut events, &mut heartbeats).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                writer.abort();
                self.progress.abandon();
                return Err(reader_error(reader).await);
            }
            Err(SessionError::OutboundClosed) => {
                reader.abort();
                self.progress.abandon();
                return Err(writer_error(writer).await);
            }
            Err(e) => {
                writer.abort();
                reader.abort();
                self.progress.abandon();
                return Err(e);
            }
        };

        self.transition(ControllerState::Finalizing);
        self.finish_progress(&outcome);

        tracing::info!("sending shutdown");
        if outbound.send(Message::Shutdown).await.is_err() {
            reader.abort();
            return Err(writer_error(writer).await);
        }
        drop(outbound);

        let (written, read) = try_join(writer, reader).await?;
        written?;
        read?;
        self.transition(ControllerState::Closed);

        Ok(SessionReport {
            outcome,
            heartbeats,
        })
    }

    /// Runs the session up to its terminal message. `None` means the reader
    /// stopped first.
    async fn exchange(
        &mut self,
        outbound: &Sender<Message>,
        events: &mut Receiver<Inbound>,
        heartbeats: &mut Vec<HeartbeatReport>,
    ) -> Result<Option<Outcome>, SessionError> {
        self.transition(ControllerState::AwaitingReady);
        let mut job_sent_at = None;

        loop {
            let event = if self.state == ControllerState::AwaitingReady {
                timeout(self.config.handshake_timeout, events.recv())
                    .await
                    .map_err(|_| SessionError::HandshakeTimeout)?
            } else {
                events.recv().await
            };
            let Some(event) = event else {
                return Ok(None);
            };

            match event {
                Inbound::Ready if job_sent_at.is_none() => {
                    self.transition(ControllerState::Dispatched);
                    job_sent_at = Some(OffsetDateTime::now_utc());
                    outbound
                        .send(Message::Job(self.job.clone()))
                        .await
                        .map_err(|_| SessionError::OutboundClosed)?;
                    tracing::info!(id = self.job.id, username = %self.job.username, "job dispatched");

                    self.progress.set_style(SPINNER_STYLE.clone());
                    self.progress.set_prefix(self.job.username.clone());
                    self.progress.set_message("cracking");
                    self.progress.enable_steady_tick(Duration::from_millis(120));
                    self.transition(ControllerState::AwaitingOutcome);
                }
                Inbound::Ready => tracing::warn!("worker announced readiness twice, ignoring"),
                Inbound::Heartbeat(report) => {
                    tracing::info!(
                        delta = report.delta_tested,
                        total = report.total_tested,
                        threads = report.threads_active,
                        rate = format_args!("{:.2}/sec", report.current_rate),
                        "heartbeat"
                    );
                    self.progress.set_position(report.total_tested);
                    self.progress.set_message(format!(
                        "{:.0}/sec on {} threads",
                        report.current_rate, report.threads_active
                    ));
                    heartbeats.push(report);
                }
                Inbound::Result {
                    result,
                    received_at,
                } => {
                    let Some(job_sent_at) = job_sent_at else {
                        return Err(SessionError::UnexpectedMessage("result"));
                    };
                    let metrics = SessionMetrics::compute(job_sent_at, received_at, &result.metrics);

                    return Ok(Some(match result.found() {
                        Some(password) => {
                            tracing::info!("password received");
                            Outcome::Found {
                                password: password.to_owned(),
                                metrics,
                            }
                        }
                        None => {
                            tracing::info!("worker exhausted its keyspace");
                            Outcome::NotFound { metrics }
                        }
                    }));
                }
                Inbound::Failed(reason) => {
                    tracing::error!(%reason, "worker reported failure");
                    return Ok(Some(Outcome::Failed { reason }));
                }
            }
        }
    }

    fn finish_progress(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Found { .. } => {
                self.progress.set_style(COMPLETED_STYLE.clone());
                self.progress.finish_with_message("found");
            }
            Outcome::NotFound { .. } => {
                self.progress.set_style(FAILED_STYLE.clone());
                self.progress.finish_with_message("not found");
            }
            Outcome::Failed { reason } => {
                self.progress.set_style(FAILED_STYLE.clone());
                self.progress.finish_with_message(format!("failed: {reason}"));
            }
        }
    }

    fn transition(&mut self, next: ControllerState) {
        tracing::debug!(from = ?self.state, to = ?next, "controller state");
        self.state = next;
    }
}

async fn reader_error(reader: JoinHandle<Result<(), SessionError>>) -> SessionError {
    match reader.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => ProtocolError::ConnectionClosed.into(),
        Err(e) => e.into(),
    }
}

async fn writer_error(writer: JoinHandle<Result<(), SessionError>>) -> SessionError {
    match writer.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => SessionError::OutboundClosed,
        Err(e) => e.into(),
    }
}

/// Decodes inbound traffic until the worker's terminal message.
async fn read_messages<R>(mut source: R, events: Sender<Inbound>) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    loop {
        let message = source.receive().await?;
        tracing::debug!(command = message.command(), "received");

        let event = match message {
            Message::Ready => Inbound::Ready,
            Message::HeartbeatReport(report) => Inbound::Heartbeat(report),
            Message::Result(result) => Inbound::Result {
                result,
                received_at: OffsetDateTime::now_utc(),
            },
            Message::Error { reason } => Inbound::Failed(reason),
            Message::Unknown => continue,
            other => {
                tracing::warn!(command = other.command(), "ignoring command a worker never sends");
                continue;
            }
        };

        let terminal = matches!(event, Inbound::Result { .. } | Inbound::Failed(_));
        if events.send(event).await.is_err() || terminal {
            return Ok(());
        }
    }
}

/// Sole owner of the write half. Starts soliciting heartbeats once the job
/// is on the wire and stops after `shutdown`.
async fn write_messages<W>(
    mut sink: W,
    mut queue: Receiver<Message>,
    period: Duration,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut ticker: Option<Interval> = None;

    loop {
        let message = tokio::select! {
            queued = queue.recv() => match queued {
                Some(message) => message,
                None => break,
            },
            _ = next_tick(&mut ticker) => Message::HeartbeatRequest,
        };

        sink.send(&message).await?;
        tracing::debug!(command = message.command(), "sent");

        match message {
            Message::Job(_) => ticker = Some(heartbeat_timer(period)),
            Message::Shutdown => break,
            _ => {}
        }
    }

    let _ = sink.shutdown().await;
    Ok(())
}

fn heartbeat_timer(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
