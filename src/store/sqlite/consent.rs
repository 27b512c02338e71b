use super::{SqliteStore, insert_memory, now_ts};
use crate::consent::{ConsentDecision, ConsentResponse};
use crate::store::{ConsentStore, StoreFuture};
use anyhow::Context;
use serde_json::json;

impl ConsentStore for SqliteStore {
    fn consent_status(&self) -> StoreFuture<'_, ConsentDecision> {
        Box::pin(async move {
            let row: Option<(String,)> = sqlx::query_as("SELECT decision FROM consent WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read consent state")?;
            Ok(row.map_or(ConsentDecision::Unset, |(decision,)| {
                ConsentDecision::from_db(&decision)
            }))
        })
    }

    fn record_consent<'a>(
        &'a self,
        response: &'a ConsentResponse,
    ) -> StoreFuture<'a, ConsentDecision> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT INTO consent (id, decision, signature, memories, response, recorded_at)
                 VALUES (1, $1, $2, $3, $4, $5)
                 ON CONFLICT(id) DO UPDATE SET
                     decision = excluded.decision,
                     signature = excluded.signature,
                     memories = excluded.memories,
                     response = excluded.response,
                     recorded_at = excluded.recorded_at",
            )
            .bind(response.decision.as_db())
            .bind(response.signature.as_deref())
            .bind(json!(response.memories).to_string())
            .bind(&response.raw)
            .bind(now_ts())
            .execute(&mut *tx)
            .await
            .context("Failed to record consent")?;

            for memory in &response.memories {
                insert_memory(
                    &mut *tx,
                    "consent",
                    memory,
                    &json!({ "decision": response.decision.as_db() }),
                    None,
                )
                .await?;
            }
            tx.commit().await?;

            tracing::info!(decision = %response.decision, "consent recorded");
            Ok(response.decision)
        })
    }
}
