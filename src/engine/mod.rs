//! Parallel keyspace search.
//!
//! One generator thread walks the [`Keyspace`] in order and publishes
//! candidates into a bounded queue; a fixed pool of search threads pulls from
//! it and verifies. The first verified match fires the shared cancellation
//! token, which stops the generator and every searcher at their next check.
//! Candidates already dequeued when the token fires may still be verified.

pub mod keyspace;
#[cfg(target_os = "linux")]
pub mod libcrypt;
pub mod verify;

pub use keyspace::{Charset, Keyspace, DEFAULT_CHARSET};
pub use verify::{CryptVerifier, Verifier, VerifyError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::structs::{CrackingJob, HeartbeatReport};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unable to verify {candidate:?}: {source}")]
    Verification {
        candidate: String,
        #[source]
        source: VerifyError,
    },

    #[error("a search thread panicked")]
    ThreadPanicked,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(String),

    /// Only possible with a length cap.
    Exhausted,

    /// Stopped from outside before anything matched.
    Cancelled,
}

/// Counters shared between the search threads and the heartbeat responder.
#[derive(Debug, Default)]
pub struct Progress {
    delta: AtomicU64,
    total: AtomicU64,
    active: AtomicU64,
}

impl Progress {
    pub fn record_tested(&self) {
        // total before delta: a delta that has been taken is always in total
        self.total.fetch_add(1, Ordering::AcqRel);
        self.delta.fetch_add(1, Ordering::AcqRel);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn active_threads(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Takes everything tested since the previous call and resets it to zero.
    pub fn take_delta(&self) -> u64 {
        self.delta.swap(0, Ordering::AcqRel)
    }

    pub fn heartbeat(&self, interval_seconds: u32) -> HeartbeatReport {
        let delta = self.take_delta();

        HeartbeatReport {
            delta_tested: delta,
            total_tested: self.total(),
            threads_active: self.active_threads(),
            current_rate: delta as f64 / f64::from(interval_seconds.max(1)),
        }
    }

    fn enter(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(self)
    }
}

struct ActiveGuard<'a>(&'a Progress);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Stops everyone else if a search thread unwinds.
struct CancelOnPanic<'a>(&'a CancellationToken);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

type VerifyHook = Box<dyn Fn(&str) + Send + Sync>;

pub struct SearchEngine<V> {
    verifier: V,
    charset: Charset,
    threads: usize,
    max_length: Option<usize>,
    progress: Arc<Progress>,
    cancel: CancellationToken,
    on_verify: Option<VerifyHook>,
    span: Span,
}

impl<V: Verifier> SearchEngine<V> {
    pub fn new(verifier: V, threads: usize, span: Span) -> Result<Self, EngineError> {
        if threads == 0 {
            return Err(EngineError::InvalidConfig(
                "at least one search thread is required".into(),
            ));
        }

        Ok(Self {
            verifier,
            charset: Charset::default(),
            threads,
            max_length: None,
            progress: Arc::new(Progress::default()),
            cancel: CancellationToken::new(),
            on_verify: None,
            span,
        })
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Caps candidate length. Without a cap the search runs until a match.
    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Called by a search thread right before it verifies a candidate.
    pub fn on_verify(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_verify = Some(Box::new(hook));
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Searches until a match, exhaustion of a capped keyspace, cancellation,
    /// or an unrecoverable verification error. Blocks the calling thread.
    pub fn run(&self, job: &CrackingJob) -> Result<SearchOutcome, EngineError> {
        let _span = self.span.enter();

        if self.cancel.is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }

        tracing::info!(
            threads = self.threads,
            charset = self.charset.len(),
            max_length = ?self.max_length,
            "starting search"
        );

        let (tx, rx) = crossbeam_channel::bounded::<String>(self.threads);
        let winner = OnceLock::new();
        let failure = OnceLock::new();

        let panicked = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.threads + 1);
            handles.push(scope.spawn(move || self.generate(tx)));

            for id in 0..self.threads {
                let rx = rx.clone();
                let (winner, failure) = (&winner, &failure);
                handles.push(scope.spawn(move || self.search(id, rx, job, winner, failure)));
            }
            drop(rx);

            handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(Result::is_err)
                .count()
        });

        let tested = self.progress.total();

        if let Some(password) = winner.into_inner() {
            tracing::info!(tested, "password found");
            return Ok(SearchOutcome::Found(password));
        }

        if panicked > 0 {
            return Err(EngineError::ThreadPanicked);
        }

        if let Some(err) = failure.into_inner() {
            return Err(err);
        }

        if self.cancel.is_cancelled() {
            tracing::info!(tested, "search cancelled");
            Ok(SearchOutcome::Cancelled)
        } else {
            tracing::info!(tested, "keyspace exhausted");
            Ok(SearchOutcome::Exhausted)
        }
    }

    fn generate(&self, queue: Sender<String>) {
        let _span = tracing::debug_span!(parent: &self.span, "generator").entered();
        let mut published = 0u64;

        for candidate in Keyspace::new(&self.charset, self.max_length) {
            if self.cancel.is_cancelled() {
                break;
            }

            // fails once every searcher has hung up
            if queue.send(candidate).is_err() {
                break;
            }
            published += 1;
        }

        tracing::debug!(published, "generator stopped");
    }

    fn search(
        &self,
        id: usize,
        queue: Receiver<String>,
        job: &CrackingJob,
        winner: &OnceLock<String>,
        failure: &OnceLock<EngineError>,
    ) {
        let _span = tracing::debug_span!(parent: &self.span, "searcher", id).entered();
        let _active = self.progress.enter();
        let _cancel_on_panic = CancelOnPanic(&self.cancel);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(candidate) = queue.recv() else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some(hook) = &self.on_verify {
                hook(&candidate);
            }

            match self.verifier.verify(&candidate, job) {
                Ok(true) => {
                    self.progress.record_tested();
                    if winner.set(candidate).is_ok() {
                        self.cancel.cancel();
                    }
                    break;
                }
                Ok(false) => self.progress.record_tested(),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(%candidate, error = %e, "treating as no match");
                    self.progress.record_tested();
                }
                Err(e) => {
                    tracing::error!(%candidate, error = %e, "giving up on job");
                    let _ = failure.set(EngineError::Verification {
                        candidate,
                        source: e,
                    });
                    self.cancel.cancel();
                    break;
                }
            }
        }

        tracing::debug!("search thread stopped");
    }
}
