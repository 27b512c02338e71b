//! Heartbeats: the action vocabulary, lifecycle types and the resumable
//! engine that applies a decision against persistent state.

mod actions;
mod engine;
mod types;

pub use actions::{ActionSpec, HeartbeatAction, decision_actions};
pub use engine::{EngineLimits, HeartbeatActionEngine};
pub use types::{BatchResult, Heartbeat, HeartbeatOutcome, HeartbeatStatus, signals_termination};
