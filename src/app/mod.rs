//! Command-line surface of the `cortexd` binary.

pub mod cli;
pub mod dispatch;
pub mod status;

pub use cli::{Cli, Commands, RunMode};
pub use dispatch::dispatch;
