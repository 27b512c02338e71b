use crate::error::ConfigError;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Providers the backend factory knows how to build.
pub(crate) const KNOWN_PROVIDERS: [&str; 5] =
    ["openai", "openai-compatible", "compatible", "ollama", "anthropic"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

pub(crate) fn cortexd_home() -> PathBuf {
    let home =
        UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".cortexd")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: cortexd_home().join("config.toml"),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            worker: WorkerConfig::default(),
            maintenance: MaintenanceConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.worker.heartbeat_batch_size == 0 {
            return Err(ConfigError::Validation(
                "worker.heartbeat_batch_size must be at least 1".into(),
            ));
        }
        if self.worker.max_nested_calls == 0 {
            return Err(ConfigError::Validation(
                "worker.max_nested_calls must be at least 1".into(),
            ));
        }
        if self.worker.max_engine_iterations == 0 {
            return Err(ConfigError::Validation(
                "worker.max_engine_iterations must be at least 1".into(),
            ));
        }
        self.llm.validate()?;
        // A decision item is renewed between backend calls; the consent
        // request plus one call must fit inside a claim.
        let claim_floor = self.llm.timeout_secs.saturating_mul(2);
        if self.maintenance.stale_claim_secs <= claim_floor {
            return Err(ConfigError::Validation(format!(
                "maintenance.stale_claim_secs must exceed {claim_floor} (twice llm.timeout_secs)"
            )));
        }
        if self.bridge.enabled && self.bridge.management_url.is_none() {
            tracing::warn!("bridge.enabled is set without bridge.management_url; bridges stay idle");
        }
        Ok(())
    }
}

// ── Database ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    cortexd_home().join("agent.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ── Cognitive backend ─────────────────────────────────────────────

/// Provider selection for the cognitive backend.
///
/// Also stored as JSON in the `settings` table so a running worker can
/// pick up a new provider/model without a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = self.provider.trim().to_ascii_lowercase();
        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown llm.provider '{}' (expected one of: {})",
                self.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "llm.max_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Decision loop ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_heartbeat_batch_size")]
    pub heartbeat_batch_size: usize,
    #[serde(default = "default_max_nested_calls")]
    pub max_nested_calls: u32,
    #[serde(default = "default_max_engine_iterations")]
    pub max_engine_iterations: u32,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_heartbeat_batch_size() -> usize {
    5
}

fn default_max_nested_calls() -> u32 {
    16
}

fn default_max_engine_iterations() -> u32 {
    64
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            heartbeat_batch_size: default_heartbeat_batch_size(),
            max_nested_calls: default_max_nested_calls(),
            max_engine_iterations: default_max_engine_iterations(),
        }
    }
}

// ── Maintenance loop ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    #[serde(default = "default_completed_retention_hours")]
    pub completed_retention_hours: u64,
    #[serde(default = "default_true")]
    pub subconscious_enabled: bool,
    #[serde(default = "default_subconscious_interval_secs")]
    pub subconscious_interval_secs: u64,
}

fn default_maintenance_poll_ms() -> u64 {
    5_000
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_stale_claim_secs() -> u64 {
    900
}

fn default_completed_retention_hours() -> u64 {
    168
}

fn default_true() -> bool {
    true
}

fn default_subconscious_interval_secs() -> u64 {
    300
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_maintenance_poll_ms(),
            interval_secs: default_maintenance_interval_secs(),
            stale_claim_secs: default_stale_claim_secs(),
            completed_retention_hours: default_completed_retention_hours(),
            subconscious_enabled: true,
            subconscious_interval_secs: default_subconscious_interval_secs(),
        }
    }
}

// ── Broker bridges ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// RabbitMQ management API base, e.g. `http://localhost:15672`.
    #[serde(default)]
    pub management_url: Option<String>,
    #[serde(default = "default_broker_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_outbox_queue")]
    pub outbox_queue: String,
    #[serde(default = "default_inbox_queue")]
    pub inbox_queue: String,
    #[serde(default = "default_bridge_batch")]
    pub outbox_batch: usize,
    #[serde(default = "default_bridge_batch")]
    pub inbox_batch: usize,
    #[serde(default = "default_inbox_min_interval_ms")]
    pub inbox_min_interval_ms: u64,
    #[serde(default = "default_broker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_broker_username() -> String {
    "guest".into()
}

fn default_vhost() -> String {
    "/".into()
}

fn default_outbox_queue() -> String {
    "cortexd.outbox".into()
}

fn default_inbox_queue() -> String {
    "cortexd.inbox".into()
}

fn default_bridge_batch() -> usize {
    20
}

fn default_inbox_min_interval_ms() -> u64 {
    1_000
}

fn default_broker_timeout_secs() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            management_url: None,
            username: default_broker_username(),
            password: None,
            vhost: default_vhost(),
            outbox_queue: default_outbox_queue(),
            inbox_queue: default_inbox_queue(),
            outbox_batch: default_bridge_batch(),
            inbox_batch: default_bridge_batch(),
            inbox_min_interval_ms: default_inbox_min_interval_ms(),
            timeout_secs: default_broker_timeout_secs(),
        }
    }
}
