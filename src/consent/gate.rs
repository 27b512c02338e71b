use super::types::ConsentResponse;
use crate::calls::prompts;
use crate::llm::{BackendRequest, BackendSlot, parse_document};
use crate::store::ConsentStore;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;

const CONSENT_MAX_TOKENS: u32 = 512;

/// One-time authorization check in front of every cognitive call.
///
/// The first `ensure` settles the decision; every later call returns the
/// cached answer without touching storage or the backend.
pub struct ConsentGate {
    store: Arc<dyn ConsentStore>,
    slot: Arc<BackendSlot>,
    granted: OnceCell<bool>,
}

impl ConsentGate {
    pub fn new(store: Arc<dyn ConsentStore>, slot: Arc<BackendSlot>) -> Self {
        Self {
            store,
            slot,
            granted: OnceCell::new(),
        }
    }

    pub async fn ensure(&self) -> bool {
        match self.granted.get_or_try_init(|| self.settle()).await {
            Ok(granted) => *granted,
            Err(e) => {
                // Not cached: storage may be back on the next call.
                tracing::warn!(error = %e, "consent state unreadable; treating as not granted");
                false
            }
        }
    }

    async fn settle(&self) -> anyhow::Result<bool> {
        let stored = self.store.consent_status().await?;
        if stored.is_terminal() {
            tracing::info!(decision = %stored, "consent loaded");
            return Ok(stored.is_granted());
        }

        let backend = self.slot.backend();
        let request = BackendRequest::new(
            prompts::CONSENT,
            prompts::consent_user(),
            CONSENT_MAX_TOKENS,
        );

        let response = match backend.complete(&request).await {
            Ok(raw) => {
                let parsed = parse_document(&raw, &json!({ "decision": "abstain" }));
                ConsentResponse::from_document(&parsed.value, raw)
            }
            Err(e) => {
                // Abstain for this process only; a backend outage is not an answer.
                tracing::warn!(error = %e, "consent request failed; abstaining");
                return Ok(false);
            }
        };

        if let Err(e) = self.store.record_consent(&response).await {
            tracing::warn!(error = %e, "failed to record consent response");
        }
        tracing::info!(decision = %response.decision, "consent decided");
        Ok(response.decision.is_granted())
    }
}
