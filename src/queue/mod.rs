//! Work-queue domain: the claimable work item and the bounded retry policy.

mod retry;
mod types;

pub use retry::{RetryPolicy, Settlement};
pub use types::{FailDisposition, QueueCounts, WorkItem, WorkStatus};
