use crate::broker::{InboundMessage, OutboxMessage};
use crate::config::LlmConfig;
use crate::consent::{ConsentDecision, ConsentResponse};
use crate::heartbeat::{BatchResult, Heartbeat};
use crate::queue::{FailDisposition, QueueCounts, WorkItem};
use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by every storage operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The shared work queue.
pub trait WorkQueue: Send + Sync {
    fn enqueue<'a>(
        &'a self,
        call_type: &'a str,
        input: &'a Value,
        heartbeat_id: Option<&'a str>,
    ) -> StoreFuture<'a, WorkItem>;

    /// Atomically move the oldest unclaimed `pending` item to `processing`.
    /// Returns `None` when nothing is eligible; never waits on rows other
    /// claimers already hold.
    fn claim(&self) -> StoreFuture<'_, Option<WorkItem>>;

    /// Claim one specific item, only if it is still `pending`.
    fn claim_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<WorkItem>>;

    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<WorkItem>>;

    /// Restart the claim clock on an item this worker still holds, so a long
    /// inline run is not mistaken for an abandoned one. Returns `false` if the
    /// item is no longer `processing`.
    fn renew_claim<'a>(&'a self, id: &'a str) -> StoreFuture<'a, bool>;

    /// Mark complete with `output`. Returns `false` if the item was already
    /// terminal.
    fn complete<'a>(&'a self, id: &'a str, output: &'a Value) -> StoreFuture<'a, bool>;

    /// Requeue when `retryable` and under `max_retries`, otherwise fail
    /// terminally. Decided in one storage statement.
    fn fail<'a>(
        &'a self,
        id: &'a str,
        error: &'a str,
        retryable: bool,
        max_retries: u32,
    ) -> StoreFuture<'a, FailDisposition>;

    fn counts(&self) -> StoreFuture<'_, QueueCounts>;
}

/// Heartbeat lifecycle and the decision-application entry point.
pub trait HeartbeatStore: Send + Sync {
    fn should_run_heartbeat(&self) -> StoreFuture<'_, bool>;

    /// Start a heartbeat and enqueue its decision request. `None` when a
    /// concurrent worker started one first.
    fn start_heartbeat(&self) -> StoreFuture<'_, Option<String>>;

    /// Apply a bounded batch of `decision`'s actions starting at
    /// `start_index`. Indices already applied are skipped by storage.
    fn apply_decision<'a>(
        &'a self,
        heartbeat_id: &'a str,
        decision: &'a Value,
        start_index: usize,
    ) -> StoreFuture<'a, BatchResult>;

    /// Fold a nested call's output into agent state and complete the item.
    fn apply_call_result<'a>(
        &'a self,
        item_id: &'a str,
        output: &'a Value,
    ) -> StoreFuture<'a, Value>;

    fn complete_heartbeat<'a>(
        &'a self,
        heartbeat_id: &'a str,
        memory_id: Option<&'a str>,
    ) -> StoreFuture<'a, ()>;

    fn halt_heartbeat<'a>(&'a self, heartbeat_id: &'a str, reason: &'a str)
    -> StoreFuture<'a, ()>;

    fn get_heartbeat<'a>(&'a self, heartbeat_id: &'a str) -> StoreFuture<'a, Option<Heartbeat>>;

    fn is_agent_terminated(&self) -> StoreFuture<'_, bool>;
}

/// Singleton consent record.
pub trait ConsentStore: Send + Sync {
    fn consent_status(&self) -> StoreFuture<'_, ConsentDecision>;

    /// Persist the full response; last writer wins.
    fn record_consent<'a>(
        &'a self,
        response: &'a ConsentResponse,
    ) -> StoreFuture<'a, ConsentDecision>;
}

/// Knobs for one maintenance pass.
#[derive(Debug, Clone)]
pub struct MaintenancePolicy {
    /// Claims older than this are presumed abandoned by a crashed worker.
    pub stale_after: Duration,
    /// Completed items older than this are pruned.
    pub retention: Duration,
    pub max_retries: u32,
}

pub trait MaintenanceStore: Send + Sync {
    fn maintenance_due<'a>(&'a self, interval: Duration) -> StoreFuture<'a, bool>;

    fn run_maintenance_tick<'a>(&'a self, policy: &'a MaintenancePolicy) -> StoreFuture<'a, Value>;

    fn subconscious_due<'a>(&'a self, interval: Duration) -> StoreFuture<'a, bool>;

    fn subconscious_context(&self) -> StoreFuture<'_, Value>;

    /// Record observations; also stamps the subconscious run time.
    fn apply_observations<'a>(&'a self, observations: &'a Value) -> StoreFuture<'a, usize>;
}

/// Local side of the broker bridges.
pub trait MessageStore: Send + Sync {
    fn enqueue_outbox<'a>(&'a self, kind: &'a str, payload: &'a Value)
    -> StoreFuture<'a, OutboxMessage>;

    /// Oldest-first pending outbound messages.
    fn pending_outbox(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxMessage>>;

    fn mark_outbox_sent<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    fn mark_outbox_failed<'a>(&'a self, id: &'a str, error: &'a str) -> StoreFuture<'a, ()>;

    fn ingest_inbound<'a>(&'a self, message: &'a InboundMessage) -> StoreFuture<'a, String>;

    fn touch_last_contact(&self) -> StoreFuture<'_, ()>;
}

/// Stored backend selection, refreshed by each worker every tick.
pub trait BackendSettingsStore: Send + Sync {
    fn backend_settings(&self) -> StoreFuture<'_, Option<LlmConfig>>;

    fn set_backend_settings<'a>(&'a self, settings: &'a LlmConfig) -> StoreFuture<'a, ()>;
}
