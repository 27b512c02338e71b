use super::factory::create_backend;
use super::traits::CognitiveBackend;
use crate::config::LlmConfig;
use arc_swap::ArcSwap;
use std::sync::Arc;

struct SlotState {
    /// `None` for a slot pinned to an injected backend.
    config: Option<LlmConfig>,
    backend: Arc<dyn CognitiveBackend>,
}

/// A worker's current backend selection.
///
/// Each worker owns its slot, so independently configured workers can run
/// side by side in one process. Readers never block; `refresh` swaps in a
/// rebuilt backend only when the settings actually changed.
pub struct BackendSlot {
    state: ArcSwap<SlotState>,
}

impl BackendSlot {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState {
                config: Some(config.clone()),
                backend: create_backend(config),
            }),
        }
    }

    pub fn from_backend(backend: Arc<dyn CognitiveBackend>) -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState {
                config: None,
                backend,
            }),
        }
    }

    pub fn backend(&self) -> Arc<dyn CognitiveBackend> {
        Arc::clone(&self.state.load().backend)
    }

    pub fn config(&self) -> Option<LlmConfig> {
        self.state.load().config.clone()
    }

    /// Rebuild the backend from `config` if it differs from the current one.
    /// Returns whether a swap happened.
    pub fn refresh(&self, config: &LlmConfig) -> bool {
        if self.state.load().config.as_ref() == Some(config) {
            return false;
        }
        let backend = create_backend(config);
        tracing::info!(
            provider = %backend.name(),
            model = %backend.model(),
            "cognitive backend refreshed"
        );
        self.state.store(Arc::new(SlotState {
            config: Some(config.clone()),
            backend,
        }));
        true
    }
}
