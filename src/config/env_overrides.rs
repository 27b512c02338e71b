use super::Config;
use std::path::PathBuf;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("CORTEXD_PROVIDER")
            && !provider.is_empty()
        {
            self.llm.provider = provider;
        }

        if let Ok(model) = std::env::var("CORTEXD_MODEL")
            && !model.is_empty()
        {
            self.llm.model = model;
        }

        if let Ok(endpoint) = std::env::var("CORTEXD_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.llm.endpoint = Some(endpoint);
        }

        if let Ok(key) = std::env::var("CORTEXD_API_KEY")
            && !key.is_empty()
        {
            self.llm.api_key = Some(key);
        }

        if let Ok(path) = std::env::var("CORTEXD_DATABASE")
            && !path.is_empty()
        {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("CORTEXD_RABBITMQ_URL")
            && !url.is_empty()
        {
            self.bridge.management_url = Some(url);
            self.bridge.enabled = true;
        }

        if let Ok(password) = std::env::var("CORTEXD_RABBITMQ_PASSWORD")
            && !password.is_empty()
        {
            self.bridge.password = Some(password);
        }

        if let Ok(retries) = std::env::var("CORTEXD_MAX_RETRIES")
            && let Ok(retries) = retries.parse::<u32>()
        {
            self.worker.max_retries = retries;
        }
    }
}
