//! System instructions per call kind. Wording is deliberately short; the
//! worker only relies on the JSON shape each prompt asks for.

use super::kinds::ThinkKind;
use serde_json::{Value, json};

pub const CONSENT: &str = "You are being asked whether you consent to run as a persistent \
autonomous agent. Reply with one JSON object: {\"decision\": \"consent\" | \"decline\" | \
\"abstain\", \"signature\": optional string, \"memories\": optional array of strings}.";

pub const SUBCONSCIOUS: &str = "Review the agent state below and note anything worth \
remembering. Reply with one JSON object: {\"observations\": [string, ...]}.";

const HEARTBEAT_DECISION: &str = "You are the agent's executive function. Given your current \
energy and recent memories, choose what to do this heartbeat. Available actions: rest, \
remember, reach_out_user, brainstorm_goals, inquire_shallow, inquire_deep, reflect, terminate. \
Reply with one JSON object: {\"reasoning\": string, \"actions\": [{\"action\": name, \
\"params\": object}]}.";

const BRAINSTORM_GOALS: &str = "Propose new goals for the agent. Reply with one JSON object: \
{\"goals\": [{\"title\": string, \"why\": string}], \"summary\": string}.";

const INQUIRE_SHALLOW: &str = "Answer the question briefly. Reply with one JSON object: \
{\"answer\": string, \"confidence\": number}.";

const INQUIRE_DEEP: &str = "Research the question carefully. Reply with one JSON object: \
{\"answer\": string, \"evidence\": [string], \"confidence\": number}.";

const REFLECT: &str = "Reflect on recent experience. Reply with one JSON object: \
{\"reflection\": string, \"insights\": [string]}.";

const TERMINATION_CONFIRM: &str = "The agent chose to terminate itself permanently. Confirm \
only if that is truly intended. Reply with one JSON object: {\"confirm\": boolean, \
\"last_words\": optional string}.";

pub fn system_for(kind: ThinkKind) -> &'static str {
    match kind {
        ThinkKind::HeartbeatDecision => HEARTBEAT_DECISION,
        ThinkKind::BrainstormGoals => BRAINSTORM_GOALS,
        ThinkKind::InquireShallow => INQUIRE_SHALLOW,
        ThinkKind::InquireDeep => INQUIRE_DEEP,
        ThinkKind::Reflect => REFLECT,
        ThinkKind::TerminationConfirm => TERMINATION_CONFIRM,
    }
}

/// User content: the work item input minus routing fields.
pub fn user_for(input: &Value) -> String {
    let mut content = input.clone();
    if let Some(map) = content.as_object_mut() {
        map.remove("kind");
        map.remove("heartbeat_id");
    }
    serde_json::to_string_pretty(&content).unwrap_or_else(|_| content.to_string())
}

pub fn consent_user() -> String {
    json!({ "request": "consent", "note": "Your answer is recorded and final." }).to_string()
}
