use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Everything the worker needs to reproduce the target hash, minus the candidate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrackingJob {
    pub id: u64,
    pub interval_seconds: u32,
    pub username: String,
    pub setting: String,
    pub full_hash: String,
}

/// Progress snapshot sent in answer to a heartbeat request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub delta_tested: u64,
    pub total_tested: u64,
    pub threads_active: u64,
    pub current_rate: f64,
}

/// Timing data measured by the worker, carried inside a result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkerMetrics {
    /// Monotonic time spent inside the search engine.
    #[serde(rename = "totalCrackingTimeNs")]
    pub total_crack_nanos: u64,

    #[serde(rename = "workerReceiveJobTs", with = "time::serde::rfc3339")]
    pub job_received_at: OffsetDateTime,

    #[serde(rename = "workerSentResultsTs", with = "time::serde::rfc3339")]
    pub result_sent_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CrackResult {
    /// Empty when a bounded keyspace was exhausted without a match.
    pub password: String,
    pub metrics: WorkerMetrics,
}

impl CrackResult {
    pub fn found(&self) -> Option<&str> {
        if self.password.is_empty() {
            None
        } else {
            Some(&self.password)
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Message {
    /// Worker is connected and waiting for a job.
    Ready,

    /// Send the job to the worker. Happens once per session.
    Job(CrackingJob),

    /// Ask the worker how far it got since the last request.
    HeartbeatRequest,

    HeartbeatReport(HeartbeatReport),

    /// Report the cracked password and the worker's timings.
    Result(CrackResult),

    /// The worker gave up on the job.
    Error { reason: String },

    /// Tell the worker to exit.
    Shutdown,

    /// A command this build does not know about. Never sent.
    #[serde(other, skip_serializing)]
    Unknown,
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Ready => "ready",
            Message::Job(_) => "job",
            Message::HeartbeatRequest => "heartbeat_request",
            Message::HeartbeatReport(_) => "heartbeat_report",
            Message::Result(_) => "result",
            Message::Error { .. } => "error",
            Message::Shutdown => "shutdown",
            Message::Unknown => "unknown",
        }
    }
}
