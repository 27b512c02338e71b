use super::kinds::ThinkKind;
use serde_json::{Value, json};

/// Safe neutral result per sub-kind, used when consent is withheld, the
/// response cannot be parsed, or the backend call fails for good.
pub fn default_result(kind: ThinkKind) -> Value {
    match kind {
        ThinkKind::HeartbeatDecision => json!({
            "reasoning": "fallback: no usable decision",
            "actions": [{ "action": "rest", "params": {} }],
        }),
        ThinkKind::BrainstormGoals => json!({ "goals": [], "summary": "" }),
        ThinkKind::InquireShallow | ThinkKind::InquireDeep => {
            json!({ "answer": "", "confidence": 0 })
        }
        ThinkKind::Reflect => json!({ "reflection": "", "insights": [] }),
        ThinkKind::TerminationConfirm => json!({ "confirm": false }),
    }
}

pub fn default_observations() -> Value {
    json!({ "observations": [] })
}
