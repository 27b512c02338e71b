//! Cognitive backends: one capability trait, two HTTP families
//! (forced-JSON chat completions and the system/messages API), and the
//! per-worker refreshable slot that holds the active one.

pub mod anthropic;
pub mod factory;
pub mod http_client;
pub mod openai;
pub mod parse;
pub mod scrub;
pub mod slot;
pub mod traits;
pub mod types;

pub use factory::{create_backend, resolve_api_key};
pub use parse::{ParseSource, ParsedDocument, parse_document};
pub use slot::BackendSlot;
pub use traits::{BackendFuture, CognitiveBackend, UnavailableBackend};
pub use types::BackendRequest;
