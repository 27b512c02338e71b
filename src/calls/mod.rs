//! Work-item dispatch: call kinds, their prompts and defaults, and the
//! processor that turns a claimed item into an outcome.

pub mod defaults;
pub mod kinds;
pub mod processor;
pub mod prompts;

pub use kinds::{CallType, ThinkKind};
pub use processor::{CallOutcome, CallProcessor, heartbeat_decision};
