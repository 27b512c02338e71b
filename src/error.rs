use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `cortexd`.
///
/// Each collaborator seam defines its own error variant. Callers match on
/// these to decide retry strategy; storage plumbing continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum CortexError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Cognitive backend ───────────────────────────────────────────────
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    // ── Broker ──────────────────────────────────────────────────────────
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Cognitive backend errors ───────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("backend {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("backend {provider} timed out")]
    Timeout { provider: String },

    #[error("backend {provider} authentication failed")]
    Auth { provider: String },

    #[error("backend {provider} returned an empty response")]
    EmptyResponse { provider: String },
}

impl BackendError {
    /// Whether a work item that hit this error may be requeued.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } | Self::EmptyResponse { .. } => true,
            Self::Unavailable { .. } | Self::Auth { .. } => false,
        }
    }
}

// ─── Storage errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} is not active (status {status})")]
    NotActive {
        entity: &'static str,
        id: String,
        status: String,
    },

    #[error("schema setup failed: {0}")]
    Migration(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

// ─── Broker errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("message not routed to {routing_key}")]
    Unrouted { routing_key: String },

    #[error("malformed broker response: {0}")]
    Malformed(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, CortexError>;
