use super::{SqliteStore, now_ts};
use crate::config::LlmConfig;
use crate::error::StorageError;
use crate::store::{BackendSettingsStore, StoreFuture};
use anyhow::Context;

const LLM_SETTINGS_KEY: &str = "llm";

impl BackendSettingsStore for SqliteStore {
    fn backend_settings(&self) -> StoreFuture<'_, Option<LlmConfig>> {
        Box::pin(async move {
            let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
                .bind(LLM_SETTINGS_KEY)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read backend settings")?;

            let Some((raw,)) = row else {
                return Ok(None);
            };
            let settings = serde_json::from_str(&raw)
                .map_err(|e| StorageError::Corrupt(format!("invalid llm settings: {e}")))?;
            Ok(Some(settings))
        })
    }

    fn set_backend_settings<'a>(&'a self, settings: &'a LlmConfig) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, $3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(LLM_SETTINGS_KEY)
            .bind(serde_json::to_string(settings)?)
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .context("Failed to store backend settings")?;
            Ok(())
        })
    }
}
