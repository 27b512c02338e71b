use super::{SqliteStore, insert_memory, new_id, now_ts, parse_json, parse_ts};
use crate::broker::{InboundMessage, OutboxMessage, OutboxStatus};
use crate::error::StorageError;
use crate::store::{MessageStore, StoreFuture};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

fn map_outbox_row(row: &SqliteRow) -> Result<OutboxMessage> {
    let status_raw: String = row.try_get("status")?;
    let payload_raw: String = row.try_get("payload")?;
    let created_raw: String = row.try_get("created_at")?;

    Ok(OutboxMessage {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        payload: parse_json(&payload_raw)?,
        status: OutboxStatus::from_db(&status_raw).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown outbox status: {status_raw}"))
        })?,
        error: row.try_get("error")?,
        created_at: parse_ts(&created_raw)?,
    })
}

impl SqliteStore {
    pub(super) async fn insert_outbox<'e, E>(
        executor: E,
        kind: &str,
        payload: &Value,
    ) -> Result<OutboxMessage>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query(
            "INSERT INTO outbox_messages (id, kind, payload, status, created_at)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING id, kind, payload, status, error, created_at",
        )
        .bind(new_id())
        .bind(kind)
        .bind(payload.to_string())
        .bind(now_ts())
        .fetch_one(executor)
        .await
        .with_context(|| format!("Failed to queue {kind} outbox message"))?;

        map_outbox_row(&row)
    }

    async fn finish_outbox(&self, id: &str, status: OutboxStatus, error: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_messages
             SET status = $2, error = $3, sent_at = CASE WHEN $2 = 'sent' THEN $4 ELSE sent_at END
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_db())
        .bind(error)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark outbox message {id} {status}"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotActive {
                entity: "outbox message",
                id: id.to_string(),
                status: "not pending".into(),
            }
            .into());
        }
        Ok(())
    }
}

impl MessageStore for SqliteStore {
    fn enqueue_outbox<'a>(
        &'a self,
        kind: &'a str,
        payload: &'a Value,
    ) -> StoreFuture<'a, OutboxMessage> {
        Box::pin(async move { Self::insert_outbox(&self.pool, kind, payload).await })
    }

    fn pending_outbox(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxMessage>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, kind, payload, status, error, created_at
                 FROM outbox_messages
                 WHERE status = 'pending'
                 ORDER BY seq ASC
                 LIMIT $1",
            )
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load pending outbox messages")?;

            rows.iter().map(map_outbox_row).collect()
        })
    }

    fn mark_outbox_sent<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.finish_outbox(id, OutboxStatus::Sent, None).await })
    }

    fn mark_outbox_failed<'a>(&'a self, id: &'a str, error: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.finish_outbox(id, OutboxStatus::Failed, Some(error))
                .await
        })
    }

    fn ingest_inbound<'a>(&'a self, message: &'a InboundMessage) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let content = message.content();
            let text = content
                .get("text")
                .or_else(|| content.get("content"))
                .and_then(Value::as_str)
                .map_or_else(|| content.to_string(), ToString::to_string);
            let metadata = json!({
                "routing_key": message.routing_key,
                "message_id": message.message_id,
                "properties": message.properties,
                "content": content,
            });
            insert_memory(&self.pool, "inbound_message", &text, &metadata, None).await
        })
    }

    fn touch_last_contact(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE agent_state SET last_contact_at = $1 WHERE id = 1")
                .bind(now_ts())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}
