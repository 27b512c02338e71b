use super::types::{HeartbeatOutcome, signals_termination};
use crate::calls::CallProcessor;
use crate::config::WorkerConfig;
use crate::queue::{RetryPolicy, Settlement, WorkItem, WorkStatus};
use crate::store::{HeartbeatStore, WorkQueue};
use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;

/// Bounds on one `execute` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Nested calls resolved inline before the heartbeat is halted.
    pub max_nested_calls: u32,
    /// Application calls made before the heartbeat is halted.
    pub max_iterations: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for EngineLimits {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_nested_calls: config.max_nested_calls,
            max_iterations: config.max_engine_iterations,
        }
    }
}

/// Applies a decision's actions in resumable batches, resolving nested
/// cognitive calls inline.
///
/// The only resumption state is the cursor handed to storage; storage tracks
/// which indices were already applied, so restarting from any cursor is safe.
pub struct HeartbeatActionEngine {
    store: Arc<dyn HeartbeatStore>,
    queue: Arc<dyn WorkQueue>,
    processor: Arc<CallProcessor>,
    retry: RetryPolicy,
    limits: EngineLimits,
}

impl HeartbeatActionEngine {
    pub fn new(
        store: Arc<dyn HeartbeatStore>,
        queue: Arc<dyn WorkQueue>,
        processor: Arc<CallProcessor>,
        retry: RetryPolicy,
        limits: EngineLimits,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
            retry,
            limits,
        }
    }

    pub async fn execute(&self, heartbeat_id: &str, decision: &Value) -> Result<HeartbeatOutcome> {
        self.run(heartbeat_id, decision, None).await
    }

    /// Like `execute`, for a decision whose work item this worker still
    /// holds. The claim is renewed after every nested call so maintenance
    /// does not reap it mid-run.
    pub async fn execute_holding(
        &self,
        held: &WorkItem,
        heartbeat_id: &str,
        decision: &Value,
    ) -> Result<HeartbeatOutcome> {
        self.renew(&held.id).await;
        self.run(heartbeat_id, decision, Some(&held.id)).await
    }

    async fn run(
        &self,
        heartbeat_id: &str,
        decision: &Value,
        held: Option<&str>,
    ) -> Result<HeartbeatOutcome> {
        let mut cursor = 0usize;
        let mut nested = 0u32;

        for _ in 0..self.limits.max_iterations {
            let batch = self
                .store
                .apply_decision(heartbeat_id, decision, cursor)
                .await?;

            if batch.terminated {
                tracing::warn!(heartbeat_id, "heartbeat terminated the agent");
                return Ok(HeartbeatOutcome::Terminated);
            }

            if let Some(call_id) = batch.pending_external_call_id {
                nested += 1;
                if nested > self.limits.max_nested_calls {
                    return self.halt(heartbeat_id, "nested_call_limit").await;
                }
                let resolution = self.resolve_nested(&call_id).await?;
                if let Some(held) = held {
                    self.renew(held).await;
                }
                if signals_termination(&resolution) {
                    tracing::warn!(heartbeat_id, call_id = %call_id, "nested call terminated the agent");
                    return Ok(HeartbeatOutcome::Terminated);
                }
                cursor = batch.next_index.unwrap_or(0);
                continue;
            }

            if batch.completed {
                self.store
                    .complete_heartbeat(heartbeat_id, batch.memory_id.as_deref())
                    .await?;
                tracing::info!(
                    heartbeat_id,
                    memory_id = batch.memory_id.as_deref().unwrap_or("-"),
                    nested_calls = nested,
                    "heartbeat completed"
                );
                return Ok(HeartbeatOutcome::Completed {
                    memory_id: batch.memory_id,
                });
            }

            match (batch.halt_reason, batch.next_index) {
                (None, Some(next)) => cursor = next,
                (reason, _) => {
                    let reason = reason.unwrap_or_else(|| "unrecognized_batch_result".into());
                    return self.halt(heartbeat_id, &reason).await;
                }
            }
        }

        self.halt(heartbeat_id, "iteration_limit").await
    }

    async fn renew(&self, item_id: &str) {
        match self.queue.renew_claim(item_id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(item_id, "held decision item is no longer processing"),
            Err(e) => tracing::warn!(item_id, error = %e, "claim renewal failed"),
        }
    }

    async fn halt(&self, heartbeat_id: &str, reason: &str) -> Result<HeartbeatOutcome> {
        self.store.halt_heartbeat(heartbeat_id, reason).await?;
        tracing::warn!(heartbeat_id, reason, "heartbeat halted");
        Ok(HeartbeatOutcome::Halted {
            reason: reason.to_string(),
        })
    }

    /// Claim, dispatch and persist one nested call. If another worker got to
    /// the item first, its stored result is the resolution.
    ///
    /// A terminal failure's fallback is not applied. Storage only applies
    /// results to items still in flight, and a nested default never
    /// terminates the agent or adds goals.
    async fn resolve_nested(&self, call_id: &str) -> Result<Value> {
        let Some(item) = self.queue.claim_by_id(call_id).await? else {
            return self.stored_resolution(call_id).await;
        };

        let outcome = self.processor.dispatch(&item).await;
        match self.retry.settle(&item, outcome).await? {
            Settlement::Apply(output) => self.persist_call_result(&item, &output).await,
            Settlement::Requeued => Ok(json!({ "applied": false, "requeued": true })),
            Settlement::Failed { .. } => Ok(json!({ "applied": false, "failed": true })),
        }
    }

    async fn stored_resolution(&self, call_id: &str) -> Result<Value> {
        match self.queue.get(call_id).await? {
            Some(WorkItem {
                status: WorkStatus::Complete,
                output: Some(output),
                ..
            }) => {
                tracing::debug!(call_id, "nested call already completed elsewhere");
                self.store.apply_call_result(call_id, &output).await
            }
            Some(item) => {
                tracing::debug!(call_id, status = %item.status, "nested call held elsewhere");
                Ok(json!({ "applied": false, "status": item.status.to_string() }))
            }
            None => {
                tracing::warn!(call_id, "nested call vanished before resolution");
                Ok(Value::Null)
            }
        }
    }

    /// Fold a nested result into agent state. If that fails, the output is
    /// still stored on the item so a computed result is never lost.
    pub async fn persist_call_result(&self, item: &WorkItem, output: &Value) -> Result<Value> {
        match self.store.apply_call_result(&item.id, output).await {
            Ok(resolution) => {
                tracing::info!(item_id = %item.id, "nested call result applied");
                Ok(resolution)
            }
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "applying call result failed; storing output only");
                self.retry.complete(item, output).await?;
                Ok(json!({ "applied": false }))
            }
        }
    }
}
