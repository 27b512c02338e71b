use super::http_client::build_http_client;
use super::scrub::{status_error, transport_error};
use super::traits::{BackendFuture, CognitiveBackend};
use super::types::BackendRequest;
use crate::error::BackendError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages-API backend: instructions travel in `system`, content in
/// `messages`.
pub struct AnthropicBackend {
    model: String,
    messages_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

impl AnthropicBackend {
    pub fn new(model: &str, base_url: Option<&str>, api_key: &str, timeout_secs: u64) -> Self {
        let base = base_url.map_or(ANTHROPIC_BASE_URL, |u| u.trim_end_matches('/'));
        Self {
            model: model.to_string(),
            messages_url: format!("{base}/v1/messages"),
            api_key: api_key.trim().to_string(),
            client: build_http_client(timeout_secs),
        }
    }

    fn extract_text(response: ChatResponse) -> Option<String> {
        let text = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() { None } else { Some(text) }
    }

    async fn call_api(&self, request: &BackendRequest) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: [Message {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .client
            .post(&self.messages_url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", &e))?;
        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let chat: ChatResponse = response.json().await.map_err(|e| BackendError::Request {
            provider: "anthropic".into(),
            message: format!("unreadable response: {e}"),
        })?;
        Self::extract_text(chat).ok_or_else(|| BackendError::EmptyResponse {
            provider: "anthropic".into(),
        })
    }
}

impl CognitiveBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, request: &'a BackendRequest) -> BackendFuture<'a> {
        Box::pin(self.call_api(request))
    }
}
