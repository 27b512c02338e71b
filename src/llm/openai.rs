use super::http_client::build_http_client;
use super::scrub::{status_error, transport_error};
use super::traits::{BackendFuture, CognitiveBackend};
use super::types::BackendRequest;
use crate::error::BackendError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions backend with forced JSON output. Also serves
/// OpenAI-compatible servers (Ollama, vLLM, LM Studio) via `base_url`.
pub struct OpenAiBackend {
    provider: String,
    model: String,
    completions_url: String,
    /// Pre-computed `"Bearer <key>"`; local servers run without one.
    auth_header: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(
        provider: &str,
        model: &str,
        base_url: Option<&str>,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Self {
        let base = base_url
            .map_or(OPENAI_BASE_URL, |u| u.trim_end_matches('/'))
            .to_string();
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            completions_url: format!("{base}/chat/completions"),
            auth_header: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
            client: build_http_client(timeout_secs),
        }
    }

    fn build_request<'a>(&'a self, request: &'a BackendRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        }
    }

    async fn call_api(&self, request: &BackendRequest) -> Result<String, BackendError> {
        let mut builder = self
            .client
            .post(&self.completions_url)
            .json(&self.build_request(request));
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&self.provider, &e))?;
        if !response.status().is_success() {
            return Err(status_error(&self.provider, response).await);
        }

        let chat: ChatResponse = response.json().await.map_err(|e| BackendError::Request {
            provider: self.provider.clone(),
            message: format!("unreadable response: {e}"),
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| BackendError::EmptyResponse {
                provider: self.provider.clone(),
            })
    }
}

impl CognitiveBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, request: &'a BackendRequest) -> BackendFuture<'a> {
        Box::pin(self.call_api(request))
    }
}
