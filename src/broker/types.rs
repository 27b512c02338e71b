use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound message status. Moves only `Pending → Sent` or `Pending → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxMessage {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Body published to the broker. Consumers deduplicate on `id`.
    pub fn envelope(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "payload": self.payload,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

/// A message fetched (and already acknowledged) from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub payload: String,
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub properties: Value,
}

impl InboundMessage {
    /// Payload as JSON when it parses, otherwise wrapped as `{"text": ...}`.
    pub fn content(&self) -> Value {
        serde_json::from_str::<Value>(&self.payload)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| serde_json::json!({ "text": self.payload }))
    }
}
