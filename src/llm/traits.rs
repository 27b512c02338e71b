use super::types::BackendRequest;
use crate::error::BackendError;
use std::future::Future;
use std::pin::Pin;

pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>>;

/// A text-generation service that answers with one structured document.
pub trait CognitiveBackend: Send + Sync {
    /// Provider identifier (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Send `request` and return the raw response text.
    fn complete<'a>(&'a self, request: &'a BackendRequest) -> BackendFuture<'a>;
}

/// Stand-in for a backend that could not be configured. Construction never
/// fails; every call reports why the real backend is missing.
pub struct UnavailableBackend {
    provider: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

impl CognitiveBackend for UnavailableBackend {
    fn name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        ""
    }

    fn complete<'a>(&'a self, _request: &'a BackendRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            Err(BackendError::Unavailable {
                provider: self.provider.clone(),
                reason: self.reason.clone(),
            })
        })
    }
}
