use super::anthropic::AnthropicBackend;
use super::openai::OpenAiBackend;
use super::traits::{CognitiveBackend, UnavailableBackend};
use crate::config::LlmConfig;
use std::sync::Arc;

const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Resolve an API key: explicit config, then the provider's own env var,
/// then the generic `CORTEXD_API_KEY`.
pub fn resolve_api_key(configured: Option<&str>, provider_env: Option<&str>) -> Option<String> {
    let non_empty = |value: &str| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };

    configured
        .and_then(non_empty)
        .or_else(|| {
            provider_env
                .and_then(|var| std::env::var(var).ok())
                .and_then(|value| non_empty(&value))
        })
        .or_else(|| {
            std::env::var("CORTEXD_API_KEY")
                .ok()
                .and_then(|value| non_empty(&value))
        })
}

/// Build the backend named by `config.provider`.
///
/// Never fails: a provider that cannot be built becomes an
/// [`UnavailableBackend`], which reports the reason on first use.
pub fn create_backend(config: &LlmConfig) -> Arc<dyn CognitiveBackend> {
    let provider = config.provider.trim().to_ascii_lowercase();
    let endpoint = config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());

    match provider.as_str() {
        "openai" => match resolve_api_key(config.api_key.as_deref(), Some("OPENAI_API_KEY")) {
            Some(key) => Arc::new(OpenAiBackend::new(
                "openai",
                &config.model,
                endpoint,
                Some(&key),
                config.timeout_secs,
            )),
            None => unavailable(&provider, "missing API key (set OPENAI_API_KEY)"),
        },
        "openai-compatible" | "compatible" => match endpoint {
            Some(endpoint) => {
                let key = resolve_api_key(config.api_key.as_deref(), None);
                Arc::new(OpenAiBackend::new(
                    "openai-compatible",
                    &config.model,
                    Some(endpoint),
                    key.as_deref(),
                    config.timeout_secs,
                ))
            }
            None => unavailable(&provider, "llm.endpoint is required for compatible providers"),
        },
        "ollama" => Arc::new(OpenAiBackend::new(
            "ollama",
            &config.model,
            Some(endpoint.unwrap_or(OLLAMA_BASE_URL)),
            None,
            config.timeout_secs,
        )),
        "anthropic" => {
            match resolve_api_key(config.api_key.as_deref(), Some("ANTHROPIC_API_KEY")) {
                Some(key) => Arc::new(AnthropicBackend::new(
                    &config.model,
                    endpoint,
                    &key,
                    config.timeout_secs,
                )),
                None => unavailable(&provider, "missing API key (set ANTHROPIC_API_KEY)"),
            }
        }
        _ => unavailable(&provider, "unknown provider"),
    }
}

fn unavailable(provider: &str, reason: &str) -> Arc<dyn CognitiveBackend> {
    tracing::warn!(provider, reason, "cognitive backend unavailable");
    Arc::new(UnavailableBackend::new(provider, reason))
}
