use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::try_join;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, Span};

use crate::engine::{Progress, SearchEngine, SearchOutcome, Verifier};
use crate::error::{ProtocolError, SessionError};
use crate::structs::{CrackResult, CrackingJob, Message, WorkerMetrics};
use crate::traits::{AsyncMessageRecvExt, AsyncMessageSendExt};

const OUTBOUND_CAPACITY: usize = 8;
const EVENT_CAPACITY: usize = 4;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// How long to wait for a job after announcing readiness.
    pub handshake_timeout: Duration,
    /// How long to wait for `shutdown` once the outcome is sent.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Connected,
    ReadySent,
    AwaitingJob,
    Cracking,
    ReportingResult,
    AwaitingShutdown,
    Terminated,
}

/// How a worker session ended after the controller said goodbye.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    Found { password: String, tested: u64 },
    NotFound { tested: u64 },

    /// An `error` went out instead of a result.
    Failed { reason: String },

    /// `shutdown` arrived before the search finished.
    Interrupted { tested: u64 },
}

#[derive(Debug)]
enum Inbound {
    Job(CrackingJob, OffsetDateTime),
    Shutdown,
}

/// One connection to a controller: announce, crack, report, wait for goodbye.
pub struct WorkerSession<V> {
    config: WorkerConfig,
    engine: Arc<SearchEngine<V>>,
    state: WorkerState,
    span: Span,
}

impl<V: Verifier + 'static> WorkerSession<V> {
    pub fn new(engine: SearchEngine<V>, config: WorkerConfig, span: Span) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
            state: WorkerState::Connected,
            span,
        }
    }

    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<WorkerOutcome, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            self.span.in_scope(|| tracing::info!(%peer, "connected to controller"));
        }

        self.run(stream).await
    }

    pub async fn run<S>(self, stream: S) -> Result<WorkerOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let span = self.span.clone();
        self.drive(stream).instrument(span).await
    }

    async fn drive<S>(mut self, stream: S) -> Result<WorkerOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, mut events) = mpsc::channel(EVENT_CAPACITY);

        let writer = tokio::spawn(write_messages(write_half, outbound_rx).in_current_span());
        let reader = tokio::spawn(
            read_messages(
                BufReader::new(read_half),
                events_tx,
                outbound.clone(),
                self.engine.progress(),
            )
            .in_current_span(),
        );

        let outcome = match self.exchange(&outbound, &mut events).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                writer.abort();
                return Err(reader_error(reader).await);
            }
            Err(SessionError::OutboundClosed) => {
                reader.abort();
                return Err(writer_error(writer).await);
            }
            Err(e) => {
                writer.abort();
                reader.abort();
                return Err(e);
            }
        };

        // the reader holds the other sender and exits after shutdown
        drop(outbound);
        let (read, written) = try_join(reader, writer).await?;
        read?;
        written?;

        Ok(outcome)
    }

    /// `None` means the reader stopped and its result holds the cause.
    async fn exchange(
        &mut self,
        outbound: &Sender<Message>,
        events: &mut Receiver<Inbound>,
    ) -> Result<Option<WorkerOutcome>, SessionError> {
        enqueue(outbound, Message::Ready).await?;
        self.transition(WorkerState::ReadySent);
        self.transition(WorkerState::AwaitingJob);

        let (job, received_at) = match timeout(self.config.handshake_timeout, events.recv()).await {
            Err(_) => return Err(SessionError::HandshakeTimeout),
            Ok(None) => return Ok(None),
            Ok(Some(Inbound::Job(job, received_at))) => (job, received_at),
            Ok(Some(Inbound::Shutdown)) => {
                tracing::info!("shutdown before any job");
                self.transition(WorkerState::Terminated);
                return Ok(Some(WorkerOutcome::Interrupted { tested: 0 }));
            }
        };

        tracing::info!(
            id = job.id,
            interval = job.interval_seconds,
            username = %job.username,
            setting = %job.setting,
            full_hash = %job.full_hash,
            "job received"
        );
        self.transition(WorkerState::Cracking);

        let started = Instant::now();
        let mut search = {
            let engine = Arc::clone(&self.engine);
            let job = job.clone();
            tokio::task::spawn_blocking(move || engine.run(&job))
        };

        let searched = tokio::select! {
            joined = &mut search => joined?,
            event = events.recv() => {
                self.engine.cancellation().cancel();
                let _ = search.await;

                return match event {
                    None => Ok(None),
                    Some(Inbound::Shutdown) => {
                        tracing::warn!("shutdown while cracking, search abandoned");
                        self.transition(WorkerState::Terminated);
                        Ok(Some(WorkerOutcome::Interrupted { tested: self.tested() }))
                    }
                    Some(Inbound::Job(..)) => Err(SessionError::UnexpectedMessage("job")),
                };
            }
        };
        let elapsed = started.elapsed();
        let tested = self.tested();

        let verdict = match searched {
            Ok(SearchOutcome::Found(password)) => {
                tracing::info!(tested, elapsed = ?elapsed, "password found");
                Verdict::Found(password)
            }
            Ok(SearchOutcome::Exhausted) => {
                tracing::info!(tested, elapsed = ?elapsed, "keyspace exhausted");
                Verdict::NotFound
            }
            // only the select above cancels, and it returns early
            Ok(SearchOutcome::Cancelled) => Verdict::Failed("search cancelled".into()),
            Err(e) => {
                tracing::error!(error = %e, "search failed");
                Verdict::Failed(e.to_string())
            }
        };

        self.transition(WorkerState::ReportingResult);
        enqueue(outbound, verdict.report(elapsed, received_at)).await?;
        let outcome = verdict.into_outcome(tested);
        self.transition(WorkerState::AwaitingShutdown);

        match timeout(self.config.shutdown_timeout, events.recv()).await {
            Err(_) => Err(SessionError::ShutdownTimeout),
            Ok(None) => Ok(None),
            Ok(Some(Inbound::Shutdown)) => {
                tracing::info!("shutdown received");
                self.transition(WorkerState::Terminated);
                Ok(Some(outcome))
            }
            Ok(Some(Inbound::Job(..))) => Err(SessionError::UnexpectedMessage("job")),
        }
    }

    fn tested(&self) -> u64 {
        self.engine.progress().total()
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(from = ?self.state, to = ?next, "worker state");
        self.state = next;
    }
}

/// What a finished search sends back. Has no variant for an abandoned search,
/// which never produces a report.
#[derive(Debug)]
enum Verdict {
    Found(String),
    NotFound,
    Failed(String),
}

impl Verdict {
    fn report(&self, elapsed: Duration, received_at: OffsetDateTime) -> Message {
        let password = match self {
            Verdict::Found(password) => password.clone(),
            Verdict::NotFound => String::new(),
            Verdict::Failed(reason) => {
                return Message::Error {
                    reason: reason.clone(),
                }
            }
        };

        Message::Result(CrackResult {
            password,
            metrics: WorkerMetrics {
                total_crack_nanos: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
                job_received_at: received_at,
                result_sent_at: OffsetDateTime::now_utc(),
            },
        })
    }

    fn into_outcome(self, tested: u64) -> WorkerOutcome {
        match self {
            Verdict::Found(password) => WorkerOutcome::Found { password, tested },
            Verdict::NotFound => WorkerOutcome::NotFound { tested },
            Verdict::Failed(reason) => WorkerOutcome::Failed { reason },
        }
    }
}

async fn enqueue(outbound: &Sender<Message>, message: Message) -> Result<(), SessionError> {
    outbound
        .send(message)
        .await
        .map_err(|_| SessionError::OutboundClosed)
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

/// Decodes controller traffic. Heartbeat requests are answered here so they
/// never wait on the search.
async fn read_messages<R>(
    mut source: R,
    events: Sender<Inbound>,
    outbound: Sender<Message>,
    progress: Arc<Progress>,
) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut interval_seconds = None;

    loop {
        let message = source.receive().await?;
        tracing::debug!(command = message.command(), "received");

        match message {
            Message::Job(job) => {
                let received_at = OffsetDateTime::now_utc();
                if interval_seconds.is_some() {
                    tracing::warn!(id = job.id, "already have a job, ignoring another");
                    continue;
                }

                interval_seconds = Some(job.interval_seconds);
                if events.send(Inbound::Job(job, received_at)).await.is_err() {
                    return Ok(());
                }
            }
            Message::HeartbeatRequest => match interval_seconds {
                Some(seconds) => {
                    let report = progress.heartbeat(seconds);
                    tracing::debug!(
                        delta = report.delta_tested,
                        total = report.total_tested,
                        "answering heartbeat"
                    );
                    if outbound.send(Message::HeartbeatReport(report)).await.is_err() {
                        return Ok(());
                    }
                }
                None => tracing::debug!("heartbeat requested before any job, ignoring"),
            },
            Message::Shutdown => {
                let _ = events.send(Inbound::Shutdown).await;
                return Ok(());
            }
            Message::Unknown => {}
            other => tracing::warn!(
                command = other.command(),
                "ignoring command a controller never sends"
            ),
        }
    }
}

/// Sole owner of the write half.
async fn write_messages<W>(mut sink: W, mut queue: Receiver<Message>) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(message) = queue.recv().await {
        sink.send(&message).await?;
        tracing::debug!(command = message.command(), "sent");
    }

    let _ = sink.shutdown().await;
    Ok(())
}
