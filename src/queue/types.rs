use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a work item. Only `Pending` items are claimable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl WorkStatus {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// A unit of deferred cognitive processing.
///
/// Workers only ever hold a transient claim on a `WorkItem`; the row in
/// storage stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub call_type: String,
    pub input: Value,
    pub status: WorkStatus,
    pub retry_count: u32,
    pub heartbeat_id: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// The `think` sub-kind carried in `input.kind`, if any.
    pub fn think_kind(&self) -> Option<&str> {
        self.input.get("kind").and_then(Value::as_str)
    }
}

/// What `fail` did with the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Back in the queue as `pending`; `retry_count` is the new count.
    Requeued { retry_count: u32 },
    /// Terminal `failed`.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.complete + self.failed
    }
}
