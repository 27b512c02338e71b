use std::str::FromStr;

/// Declared kind of a work item (`work_items.call_type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallType {
    Think,
    /// Embeddings are computed inside storage; this worker never serves them.
    Embed,
    Unknown(String),
}

impl CallType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "think" => Self::Think,
            "embed" => Self::Embed,
            _ => Self::Unknown(raw.to_string()),
        }
    }
}

/// Sub-kind of a `think` call, carried in `input.kind`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ThinkKind {
    HeartbeatDecision,
    BrainstormGoals,
    InquireShallow,
    InquireDeep,
    Reflect,
    TerminationConfirm,
}

impl ThinkKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::from_str(raw.trim()).ok()
    }

    /// Output token ceiling for the sub-kind, capped by the configured maximum.
    pub fn max_tokens(self, configured: u32) -> u32 {
        let wanted = match self {
            Self::HeartbeatDecision | Self::InquireDeep => 2048,
            Self::BrainstormGoals | Self::Reflect => 1536,
            Self::InquireShallow => 1024,
            Self::TerminationConfirm => 256,
        };
        wanted.min(configured.max(1))
    }
}
