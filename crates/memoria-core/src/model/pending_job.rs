use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State machine for a [`PendingJob`]. Transitions are monotonic:
/// `Pending -> Processing -> {Completed, Failed, Pending}` (the last arm is
/// crash recovery, see [`crate::queue`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PendingJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingJobStatus::Pending => "pending",
            PendingJobStatus::Processing => "processing",
            PendingJobStatus::Completed => "completed",
            PendingJobStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "processing" => PendingJobStatus::Processing,
            "completed" => PendingJobStatus::Completed,
            "failed" => PendingJobStatus::Failed,
            _ => PendingJobStatus::Pending,
        }
    }
}

/// A not-yet-processed raw tool output awaiting compression. `(session_id,
/// call_id)` is the idempotency key the queue enforces uniqueness on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJob {
    pub id: i64,
    pub session_id: String,
    pub tool_name: String,
    pub raw_output: String,
    pub call_id: String,
    pub status: PendingJobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}
