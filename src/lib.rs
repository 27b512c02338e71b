#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod app;
pub mod broker;
pub mod calls;
pub mod config;
pub mod consent;
pub mod error;
pub mod heartbeat;
pub mod llm;
pub mod queue;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::CortexError;
