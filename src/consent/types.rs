use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Durable consent state. Anything but `Unset` is final for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsentDecision {
    #[default]
    Unset,
    Consent,
    Decline,
    Abstain,
}

impl ConsentDecision {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Consent => "consent",
            Self::Decline => "decline",
            Self::Abstain => "abstain",
        }
    }

    /// Lenient parse used for both storage rows and backend output; anything
    /// unrecognized is treated as an abstention.
    pub(crate) fn from_db(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "unset" | "" => Self::Unset,
            "consent" | "consented" | "yes" => Self::Consent,
            "decline" | "declined" | "no" => Self::Decline,
            _ => Self::Abstain,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Consent)
    }
}

/// The three-field consent document returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentResponse {
    pub decision: ConsentDecision,
    pub signature: Option<String>,
    pub memories: Vec<String>,
    /// Raw backend text, kept for audit.
    pub raw: String,
}

impl ConsentResponse {
    pub fn abstain(raw: impl Into<String>) -> Self {
        Self {
            decision: ConsentDecision::Abstain,
            signature: None,
            memories: Vec::new(),
            raw: raw.into(),
        }
    }

    /// Read the strict schema out of a parsed document. A missing or
    /// `unset` decision counts as an abstention so the gate always settles.
    pub fn from_document(document: &Value, raw: impl Into<String>) -> Self {
        let decision = match document
            .get("decision")
            .and_then(Value::as_str)
            .map(ConsentDecision::from_db)
        {
            Some(ConsentDecision::Unset) | None => ConsentDecision::Abstain,
            Some(decision) => decision,
        };
        let signature = document
            .get("signature")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);
        let memories = document
            .get("memories")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Object(map) => map
                            .get("content")
                            .and_then(Value::as_str)
                            .map(ToString::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            decision,
            signature,
            memories,
            raw: raw.into(),
        }
    }
}
