use super::{SqliteStore, cutoff_ts, insert_memory, now_ts, recent_memories};
use crate::store::{MaintenancePolicy, MaintenanceStore, StoreFuture};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::time::Duration;

const SUBCONSCIOUS_MEMORY_LIMIT: i64 = 10;

/// `column` is one of the fixed `agent_state` run stamps.
async fn stamp_due(pool: &SqlitePool, column: &str, interval: Duration) -> Result<bool> {
    let (due,): (bool,) = sqlx::query_as(&format!(
        "SELECT COALESCE({column} IS NULL
                OR (julianday($1) - julianday({column})) * 86400.0 >= $2, 0)
         FROM agent_state WHERE id = 1"
    ))
    .bind(now_ts())
    .bind(interval.as_secs_f64())
    .fetch_one(pool)
    .await
    .with_context(|| format!("Failed to check {column}"))?;
    Ok(due)
}

fn observation_text(entry: &Value) -> Option<String> {
    match entry {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("content")
            .or_else(|| map.get("observation"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
    .filter(|text| !text.trim().is_empty())
}

impl MaintenanceStore for SqliteStore {
    fn maintenance_due<'a>(&'a self, interval: Duration) -> StoreFuture<'a, bool> {
        Box::pin(async move { stamp_due(&self.pool, "last_maintenance_at", interval).await })
    }

    fn run_maintenance_tick<'a>(&'a self, policy: &'a MaintenancePolicy) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let now = now_ts();
            let stale_cutoff = cutoff_ts(policy.stale_after);
            let mut tx = self.pool.begin().await?;

            sqlx::query("UPDATE agent_state SET last_maintenance_at = $1 WHERE id = 1")
                .bind(&now)
                .execute(&mut *tx)
                .await?;

            // Abandoned claims count as an attempt, so a poison item that
            // keeps crashing its worker still reaches `failed`.
            let reaped = sqlx::query(
                "UPDATE work_items
                 SET status = CASE WHEN retry_count < $2 THEN 'pending' ELSE 'failed' END,
                     retry_count = CASE WHEN retry_count < $2
                                        THEN retry_count + 1 ELSE retry_count END,
                     started_at = CASE WHEN retry_count < $2 THEN NULL ELSE started_at END,
                     completed_at = CASE WHEN retry_count < $2 THEN NULL ELSE $3 END,
                     error = 'claim expired'
                 WHERE status = 'processing' AND started_at < $1",
            )
            .bind(&stale_cutoff)
            .bind(i64::from(policy.max_retries))
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("Failed to reap stale claims")?
            .rows_affected();

            let halted = sqlx::query(
                "UPDATE heartbeats
                 SET status = 'halted', halt_reason = 'stale', finished_at = $2
                 WHERE status = 'running' AND started_at < $1
                   AND NOT EXISTS (
                       SELECT 1 FROM work_items w
                       WHERE w.heartbeat_id = heartbeats.id
                         AND w.status IN ('pending', 'processing')
                   )",
            )
            .bind(&stale_cutoff)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("Failed to halt stale heartbeats")?
            .rows_affected();

            let pruned = sqlx::query(
                "DELETE FROM work_items WHERE status = 'complete' AND completed_at < $1",
            )
            .bind(cutoff_ts(policy.retention))
            .execute(&mut *tx)
            .await
            .context("Failed to prune completed work items")?
            .rows_affected();

            tx.commit().await?;
            Ok(json!({
                "reaped": reaped,
                "halted_heartbeats": halted,
                "pruned": pruned,
            }))
        })
    }

    fn subconscious_due<'a>(&'a self, interval: Duration) -> StoreFuture<'a, bool> {
        Box::pin(async move { stamp_due(&self.pool, "last_subconscious_at", interval).await })
    }

    fn subconscious_context(&self) -> StoreFuture<'_, Value> {
        Box::pin(async move {
            let (energy, max_energy, last_contact_at): (i64, i64, Option<String>) =
                sqlx::query_as(
                    "SELECT energy, max_energy, last_contact_at FROM agent_state WHERE id = 1",
                )
                .fetch_one(&self.pool)
                .await?;
            let (pending,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM work_items WHERE status = 'pending'")
                    .fetch_one(&self.pool)
                    .await?;
            let memories = recent_memories(&self.pool, SUBCONSCIOUS_MEMORY_LIMIT).await?;

            Ok(json!({
                "energy": energy,
                "max_energy": max_energy,
                "last_contact_at": last_contact_at,
                "pending_calls": pending,
                "recent_memories": memories,
            }))
        })
    }

    fn apply_observations<'a>(&'a self, observations: &'a Value) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE agent_state SET last_subconscious_at = $1 WHERE id = 1")
                .bind(now_ts())
                .execute(&mut *tx)
                .await?;

            let entries = observations
                .get("observations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut recorded = 0usize;
            for entry in &entries {
                let Some(text) = observation_text(entry) else {
                    continue;
                };
                insert_memory(&mut *tx, "observation", &text, entry, None).await?;
                recorded += 1;
            }

            tx.commit().await?;
            Ok(recorded)
        })
    }
}
