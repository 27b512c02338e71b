//! Consent: the durable record and the per-process gate in front of every
//! cognitive call.

mod gate;
mod types;

pub use gate::ConsentGate;
pub use types::{ConsentDecision, ConsentResponse};
