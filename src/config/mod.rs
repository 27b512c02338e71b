mod env_overrides;
mod loader;
mod types;

pub use types::{
    BridgeConfig, Config, DatabaseConfig, LlmConfig, MaintenanceConfig, WorkerConfig,
};
