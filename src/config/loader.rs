use super::Config;
use super::types::cortexd_home;
use crate::error::ConfigError;
use std::fs;
use std::path::Path;

impl Config {
    /// Load `~/.cortexd/config.toml`, writing a default file on first run.
    pub fn load_or_init() -> Result<Self, ConfigError> {
        let cortexd_dir = cortexd_home();
        let config_path = cortexd_dir.join("config.toml");

        if !cortexd_dir.exists() {
            fs::create_dir_all(&cortexd_dir)?;
        }

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let mut config = Self {
            config_path,
            ..Self::default()
        };
        config.save()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file. Missing sections fall back to defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::Load(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|e| {
            ConfigError::Load(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Load(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, toml_str)?;
        Ok(())
    }
}
