//! The two scheduler loops. Apart from the consent gate they share no
//! in-process state; everything else they coordinate on lives in storage.

mod decision;
mod maintenance;

pub use decision::{DecisionWorker, ItemDisposition, TickReport};
pub use maintenance::{MaintenanceReport, MaintenanceWorker};

use crate::llm::BackendSlot;
use crate::store::{
    BackendSettingsStore, ConsentStore, HeartbeatStore, MaintenanceStore, MessageStore,
    SqliteStore, WorkQueue,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Storage collaborators a worker needs.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn WorkQueue>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub consent: Arc<dyn ConsentStore>,
    pub maintenance: Arc<dyn MaintenanceStore>,
    pub messages: Arc<dyn MessageStore>,
    pub settings: Arc<dyn BackendSettingsStore>,
}

impl WorkerDeps {
    pub fn sqlite(store: &Arc<SqliteStore>) -> Self {
        Self {
            queue: store.clone(),
            heartbeats: store.clone(),
            consent: store.clone(),
            maintenance: store.clone(),
            messages: store.clone(),
            settings: store.clone(),
        }
    }
}

/// Pick up a stored backend override, if any. Without one the slot keeps
/// whatever it was built with.
async fn refresh_backend(settings: &dyn BackendSettingsStore, slot: &BackendSlot) {
    match settings.backend_settings().await {
        Ok(Some(stored)) => {
            slot.refresh(&stored);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "backend settings unreadable; keeping current backend"),
    }
}

/// Sleep for `interval`, returning `true` early if a stop was signalled.
async fn wait_or_stop(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(interval) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
