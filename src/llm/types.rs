use serde::Serialize;

/// One structured-output request to a cognitive backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl BackendRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: max_tokens.max(1),
        }
    }
}
