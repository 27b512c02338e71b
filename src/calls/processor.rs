use super::defaults::{default_observations, default_result};
use super::kinds::{CallType, ThinkKind};
use super::prompts;
use crate::consent::ConsentGate;
use crate::error::BackendError;
use crate::llm::{BackendRequest, BackendSlot, parse_document};
use crate::queue::WorkItem;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const OBSERVE_MAX_TOKENS: u32 = 1024;

/// Result of dispatching one work item. Dispatch itself never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Completed(Value),
    Failed {
        error: String,
        retryable: bool,
        /// Structured error result with the safe default, applied by the
        /// caller once retries are exhausted.
        fallback: Option<Value>,
    },
}

impl CallOutcome {
    fn unsupported(error: String) -> Self {
        Self::Failed {
            error,
            retryable: false,
            fallback: None,
        }
    }
}

/// Routes claimed work items to the consent-gated cognitive backend.
pub struct CallProcessor {
    gate: Arc<ConsentGate>,
    slot: Arc<BackendSlot>,
    max_tokens: u32,
}

/// Parts of the output document shared by every `think` result.
struct Envelope<'a> {
    kind: ThinkKind,
    heartbeat_id: Option<&'a str>,
    value: &'a Value,
    raw: Option<&'a str>,
    parse: &'a str,
    consent_granted: bool,
}

impl Envelope<'_> {
    fn into_value(self) -> Value {
        let body_key = if self.kind == ThinkKind::HeartbeatDecision {
            "decision"
        } else {
            "result"
        };
        let mut doc = Map::new();
        doc.insert("kind".into(), json!(self.kind.as_str()));
        doc.insert("heartbeat_id".into(), json!(self.heartbeat_id));
        doc.insert(body_key.into(), self.value.clone());
        doc.insert("raw_response".into(), json!(self.raw));
        doc.insert("parse".into(), json!(self.parse));
        doc.insert("consent_granted".into(), json!(self.consent_granted));
        Value::Object(doc)
    }
}

impl CallProcessor {
    pub fn new(gate: Arc<ConsentGate>, slot: Arc<BackendSlot>, max_tokens: u32) -> Self {
        Self {
            gate,
            slot,
            max_tokens,
        }
    }

    pub async fn dispatch(&self, item: &WorkItem) -> CallOutcome {
        match CallType::parse(&item.call_type) {
            CallType::Think => self.think(item).await,
            CallType::Embed => CallOutcome::unsupported(
                "unsupported call type: embed (embeddings are computed by storage)".into(),
            ),
            CallType::Unknown(name) => {
                CallOutcome::unsupported(format!("unsupported call type: {name}"))
            }
        }
    }

    async fn think(&self, item: &WorkItem) -> CallOutcome {
        let Some(kind) = item.think_kind().and_then(ThinkKind::parse) else {
            return CallOutcome::unsupported(format!(
                "unsupported think kind: {}",
                item.think_kind().unwrap_or("<missing>")
            ));
        };
        let heartbeat_id = item
            .heartbeat_id
            .as_deref()
            .or_else(|| item.input.get("heartbeat_id").and_then(Value::as_str));
        let default = default_result(kind);

        if !self.gate.ensure().await {
            tracing::debug!(item_id = %item.id, kind = %kind, "consent not granted; using default");
            return CallOutcome::Completed(
                Envelope {
                    kind,
                    heartbeat_id,
                    value: &default,
                    raw: None,
                    parse: "consent_withheld",
                    consent_granted: false,
                }
                .into_value(),
            );
        }

        let request = BackendRequest::new(
            prompts::system_for(kind),
            prompts::user_for(&item.input),
            kind.max_tokens(self.max_tokens),
        );
        let backend = self.slot.backend();

        match backend.complete(&request).await {
            Ok(raw) => {
                let parsed = parse_document(&raw, &default);
                let source = parsed.source.to_string();
                if parsed.used_default() {
                    tracing::warn!(item_id = %item.id, kind = %kind, "unparseable backend response; using default");
                }
                CallOutcome::Completed(
                    Envelope {
                        kind,
                        heartbeat_id,
                        value: &parsed.value,
                        raw: Some(&parsed.raw),
                        parse: &source,
                        consent_granted: true,
                    }
                    .into_value(),
                )
            }
            Err(e) => {
                tracing::warn!(
                    item_id = %item.id,
                    kind = %kind,
                    provider = %backend.name(),
                    error = %e,
                    "backend call failed"
                );
                let mut fallback = Envelope {
                    kind,
                    heartbeat_id,
                    value: &default,
                    raw: None,
                    parse: "default",
                    consent_granted: true,
                }
                .into_value();
                fallback["error"] = json!(e.to_string());
                CallOutcome::Failed {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                    fallback: Some(fallback),
                }
            }
        }
    }

    /// Consent-gated subconscious pass over `context`. `Ok(None)` when consent
    /// is withheld.
    pub async fn observe(&self, context: &Value) -> Result<Option<Value>, BackendError> {
        if !self.gate.ensure().await {
            return Ok(None);
        }
        let request = BackendRequest::new(
            prompts::SUBCONSCIOUS,
            prompts::user_for(context),
            OBSERVE_MAX_TOKENS.min(self.max_tokens.max(1)),
        );
        let raw = self.slot.backend().complete(&request).await?;
        Ok(Some(parse_document(&raw, &default_observations()).value))
    }
}

/// The `(heartbeat_id, decision)` carried by a heartbeat-decision output.
pub fn heartbeat_decision(output: &Value) -> Option<(String, Value)> {
    let kind = output.get("kind").and_then(Value::as_str)?;
    if ThinkKind::parse(kind) != Some(ThinkKind::HeartbeatDecision) {
        return None;
    }
    let heartbeat_id = output.get("heartbeat_id").and_then(Value::as_str)?;
    let decision = output.get("decision")?.clone();
    Some((heartbeat_id.to_string(), decision))
}
