use crate::calls::ThinkKind;
use serde_json::{Value, json};
use std::str::FromStr;

/// Actions a heartbeat decision may list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum HeartbeatAction {
    Rest,
    Remember,
    ReachOutUser,
    BrainstormGoals,
    InquireShallow,
    InquireDeep,
    Reflect,
    Terminate,
}

impl HeartbeatAction {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_str(name.trim()).ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn energy_cost(self) -> i64 {
        match self {
            Self::Rest | Self::Terminate => 0,
            Self::Remember => 1,
            Self::ReachOutUser | Self::InquireShallow | Self::Reflect => 2,
            Self::BrainstormGoals => 3,
            Self::InquireDeep => 5,
        }
    }

    /// Actions that need a nested cognitive call before the heartbeat moves on.
    pub fn nested_kind(self) -> Option<ThinkKind> {
        match self {
            Self::BrainstormGoals => Some(ThinkKind::BrainstormGoals),
            Self::InquireShallow => Some(ThinkKind::InquireShallow),
            Self::InquireDeep => Some(ThinkKind::InquireDeep),
            Self::Reflect => Some(ThinkKind::Reflect),
            Self::Rest | Self::Remember | Self::ReachOutUser | Self::Terminate => None,
        }
    }
}

/// One entry of a decision's action list: `{"action": name, "params": {..}}`
/// or a bare action name.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub name: String,
    pub params: Value,
}

impl ActionSpec {
    pub fn from_value(entry: &Value) -> Self {
        match entry {
            Value::String(name) => Self {
                name: name.clone(),
                params: json!({}),
            },
            _ => Self {
                name: entry
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                params: entry.get("params").cloned().unwrap_or_else(|| json!({})),
            },
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn is_confirmed(&self) -> bool {
        self.params
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The action list of a decision document, or `None` when it has none.
pub fn decision_actions(decision: &Value) -> Option<Vec<ActionSpec>> {
    decision
        .get("actions")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(ActionSpec::from_value).collect())
}
