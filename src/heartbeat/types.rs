use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HeartbeatStatus {
    Running,
    Completed,
    Terminated,
    Halted,
}

impl HeartbeatStatus {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Halted => "halted",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "terminated" => Some(Self::Terminated),
            "halted" => Some(Self::Halted),
            _ => None,
        }
    }
}

/// One decide-and-act cycle of the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub id: String,
    pub status: HeartbeatStatus,
    pub decision: Option<Value>,
    /// Number of actions durably applied so far.
    pub action_cursor: usize,
    pub halt_reason: Option<String>,
    pub memory_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of one bounded application call against persistent state.
///
/// Exactly one of the following holds for a well-formed batch:
/// `terminated`, `pending_external_call_id` set, `completed`, a plain
/// batch boundary (`next_index` set, nothing else), or a halt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub pending_external_call_id: Option<String>,
    #[serde(default)]
    pub next_index: Option<usize>,
    #[serde(default)]
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub memory_id: Option<String>,
}

impl BatchResult {
    pub fn completed(memory_id: Option<String>) -> Self {
        Self {
            completed: true,
            memory_id,
            ..Self::default()
        }
    }

    pub fn terminated() -> Self {
        Self {
            terminated: true,
            ..Self::default()
        }
    }

    pub fn pending_call(call_id: impl Into<String>, next_index: Option<usize>) -> Self {
        Self {
            pending_external_call_id: Some(call_id.into()),
            next_index,
            ..Self::default()
        }
    }

    pub fn resume_at(next_index: usize) -> Self {
        Self {
            next_index: Some(next_index),
            ..Self::default()
        }
    }

    pub fn halted(reason: impl Into<String>) -> Self {
        Self {
            halt_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Terminal outcome of one `execute` run. Completed and terminated are
/// mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Completed { memory_id: Option<String> },
    Terminated,
    Halted { reason: String },
}

/// Whether a nested call resolution asks the heartbeat to stop.
///
/// Storage may report this either at the top level or nested under
/// `termination`.
pub fn signals_termination(resolution: &Value) -> bool {
    let top = resolution.get("terminated").and_then(Value::as_bool);
    let nested = resolution
        .get("termination")
        .and_then(|t| t.get("terminated"))
        .and_then(Value::as_bool);
    top.unwrap_or(false) || nested.unwrap_or(false)
}
