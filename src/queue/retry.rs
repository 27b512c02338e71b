use super::{FailDisposition, WorkItem};
use crate::calls::CallOutcome;
use crate::store::WorkQueue;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// What became of a dispatched item once its outcome was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The caller should apply this output and then complete the item.
    Apply(Value),
    /// Back in the queue for another attempt.
    Requeued,
    /// Terminally failed. `fallback` is the safe default the caller may
    /// still apply to agent state.
    Failed { fallback: Option<Value> },
}

/// Completion vs. bounded requeue vs. terminal failure.
///
/// The cap is enforced by storage in the same statement that flips the
/// status, so two workers failing the same item cannot both requeue it
/// past `max_retries`.
#[derive(Clone)]
pub struct RetryPolicy {
    queue: Arc<dyn WorkQueue>,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(queue: Arc<dyn WorkQueue>, max_retries: u32) -> Self {
        Self { queue, max_retries }
    }

    /// Whether a retryable failure of `item` would put it back in the queue.
    pub fn can_retry(&self, item: &WorkItem) -> bool {
        item.retry_count < self.max_retries
    }

    pub async fn complete(&self, item: &WorkItem, output: &Value) -> Result<()> {
        let changed = self.queue.complete(&item.id, output).await?;
        if changed {
            tracing::info!(item_id = %item.id, call_type = %item.call_type, "work item complete");
        } else {
            tracing::debug!(item_id = %item.id, "work item was already terminal; completion ignored");
        }
        Ok(())
    }

    pub async fn fail(
        &self,
        item: &WorkItem,
        error: &str,
        retryable: bool,
    ) -> Result<FailDisposition> {
        let disposition = self
            .queue
            .fail(&item.id, error, retryable, self.max_retries)
            .await?;
        match disposition {
            FailDisposition::Requeued { retry_count } => tracing::warn!(
                item_id = %item.id,
                retry_count,
                max_retries = self.max_retries,
                error,
                "work item requeued"
            ),
            FailDisposition::Failed => tracing::error!(
                item_id = %item.id,
                retryable,
                error,
                "work item failed permanently"
            ),
        }
        Ok(disposition)
    }

    /// Map a dispatch outcome onto the queue: successful output is handed
    /// back for application, retryable failures requeue while budget
    /// remains, everything else fails terminally.
    pub async fn settle(&self, item: &WorkItem, outcome: CallOutcome) -> Result<Settlement> {
        let (error, retryable, fallback) = match outcome {
            CallOutcome::Completed(output) => return Ok(Settlement::Apply(output)),
            CallOutcome::Failed {
                error,
                retryable,
                fallback,
            } => (error, retryable, fallback),
        };

        let retry = retryable && self.can_retry(item);
        match self.fail(item, &error, retry).await? {
            FailDisposition::Requeued { .. } => Ok(Settlement::Requeued),
            FailDisposition::Failed => Ok(Settlement::Failed { fallback }),
        }
    }
}
