use crate::error::BackendError;
use std::borrow::Cow;

const MAX_ERROR_BODY_CHARS: usize = 200;
const REDACTED: &str = "[REDACTED]";

/// Prefixes and markers after which the following token is a credential.
const SECRET_MARKERS: [&str; 16] = [
    "sk-",
    "sk-ant-",
    "xoxb-",
    "ghp_",
    "github_pat_",
    "hf_",
    "AKIA",
    "eyJ",
    "Bearer ",
    "bearer ",
    "api_key=",
    "access_token=",
    "password=",
    "\"api_key\":\"",
    "\"access_token\":\"",
    "\"password\":\"",
];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+' | '/' | '=')
}

/// Redact the token following every occurrence of `marker`. The marker
/// itself is replaced too so a redacted prefix leaks nothing.
fn redact_after(text: &mut String, marker: &str) {
    let mut from = 0;
    while let Some(rel) = text[from..].find(marker) {
        let start = from + rel;
        let value_start = start + marker.len();
        let value_len: usize = text[value_start..]
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();
        if value_len == 0 {
            from = value_start;
            continue;
        }
        text.replace_range(start..value_start + value_len, REDACTED);
        from = start + REDACTED.len();
    }
}

/// Remove credential-looking tokens from provider or broker text.
pub fn scrub_secret_patterns(input: &str) -> Cow<'_, str> {
    if !SECRET_MARKERS.iter().any(|marker| input.contains(marker)) {
        return Cow::Borrowed(input);
    }
    let mut scrubbed = input.to_string();
    for marker in SECRET_MARKERS {
        redact_after(&mut scrubbed, marker);
    }
    Cow::Owned(scrubbed)
}

/// Scrub and truncate an error body before it is logged or stored.
pub fn sanitize_error_body(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input.trim());
    if scrubbed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return scrubbed.into_owned();
    }
    let truncated: String = scrubbed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{truncated}...")
}

/// Map a transport failure onto the backend error taxonomy.
pub fn transport_error(provider: &str, error: &reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        BackendError::Request {
            provider: provider.to_string(),
            message: sanitize_error_body(&error.to_string()),
        }
    }
}

/// Build a sanitized backend error from a non-success HTTP response.
pub async fn status_error(provider: &str, response: reqwest::Response) -> BackendError {
    let status = response.status();
    if matches!(status.as_u16(), 401 | 403) {
        return BackendError::Auth {
            provider: provider.to_string(),
        };
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable error body>".to_string());
    BackendError::Request {
        provider: provider.to_string(),
        message: format!("{status}: {}", sanitize_error_body(&body)),
    }
}
