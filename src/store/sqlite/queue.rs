use super::{SqliteStore, new_id, now_ts, parse_json, parse_opt_json, parse_opt_ts, parse_ts};
use crate::error::StorageError;
use crate::queue::{FailDisposition, QueueCounts, WorkItem, WorkStatus};
use crate::store::{StoreFuture, WorkQueue};
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

const WORK_ITEM_COLUMNS: &str = "id, call_type, input, status, retry_count, heartbeat_id, \
     output, error, requested_at, started_at, completed_at";

pub(super) fn map_work_item_row(row: &SqliteRow) -> Result<WorkItem> {
    let status_raw: String = row.try_get("status")?;
    let status = WorkStatus::from_db(&status_raw)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown work item status: {status_raw}")))?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let input_raw: String = row.try_get("input")?;
    let requested_raw: String = row.try_get("requested_at")?;

    Ok(WorkItem {
        id: row.try_get("id")?,
        call_type: row.try_get("call_type")?,
        input: parse_json(&input_raw)?,
        status,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| StorageError::Corrupt(format!("negative retry_count {retry_count}")))?,
        heartbeat_id: row.try_get("heartbeat_id")?,
        output: parse_opt_json(row.try_get("output")?)?,
        error: row.try_get("error")?,
        requested_at: parse_ts(&requested_raw)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
    })
}

impl SqliteStore {
    pub(super) async fn insert_work_item<'e, E>(
        executor: E,
        call_type: &str,
        input: &Value,
        heartbeat_id: Option<&str>,
    ) -> Result<WorkItem>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let id = new_id();
        let requested_at = now_ts();
        let row = sqlx::query(&format!(
            "INSERT INTO work_items (id, call_type, input, status, heartbeat_id, requested_at)
             VALUES ($1, $2, $3, 'pending', $4, $5)
             RETURNING {WORK_ITEM_COLUMNS}"
        ))
        .bind(&id)
        .bind(call_type)
        .bind(input.to_string())
        .bind(heartbeat_id)
        .bind(&requested_at)
        .fetch_one(executor)
        .await
        .with_context(|| format!("Failed to enqueue {call_type} work item"))?;

        map_work_item_row(&row)
    }
}

impl WorkQueue for SqliteStore {
    fn enqueue<'a>(
        &'a self,
        call_type: &'a str,
        input: &'a Value,
        heartbeat_id: Option<&'a str>,
    ) -> StoreFuture<'a, WorkItem> {
        Box::pin(async move {
            let item = Self::insert_work_item(&self.pool, call_type, input, heartbeat_id).await?;
            tracing::debug!(item_id = %item.id, call_type, "work item enqueued");
            Ok(item)
        })
    }

    fn claim(&self) -> StoreFuture<'_, Option<WorkItem>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE work_items
                 SET status = 'processing', started_at = $1
                 WHERE seq = (
                     SELECT seq FROM work_items
                     WHERE status = 'pending'
                     ORDER BY requested_at ASC, seq ASC
                     LIMIT 1
                 )
                 AND status = 'pending'
                 RETURNING {WORK_ITEM_COLUMNS}"
            ))
            .bind(now_ts())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim work item")?;

            row.as_ref().map(map_work_item_row).transpose()
        })
    }

    fn claim_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<WorkItem>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE work_items
                 SET status = 'processing', started_at = $2
                 WHERE id = $1 AND status = 'pending'
                 RETURNING {WORK_ITEM_COLUMNS}"
            ))
            .bind(id)
            .bind(now_ts())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to claim work item {id}"))?;

            row.as_ref().map(map_work_item_row).transpose()
        })
    }

    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<WorkItem>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(map_work_item_row).transpose()
        })
    }

    fn renew_claim<'a>(&'a self, id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE work_items SET started_at = $2 WHERE id = $1 AND status = 'processing'",
            )
            .bind(id)
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to renew claim on work item {id}"))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn complete<'a>(&'a self, id: &'a str, output: &'a Value) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE work_items
                 SET status = 'complete', output = $2, error = NULL, completed_at = $3
                 WHERE id = $1 AND status NOT IN ('complete', 'failed')",
            )
            .bind(id)
            .bind(output.to_string())
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to complete work item {id}"))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn fail<'a>(
        &'a self,
        id: &'a str,
        error: &'a str,
        retryable: bool,
        max_retries: u32,
    ) -> StoreFuture<'a, FailDisposition> {
        Box::pin(async move {
            // Every CASE reads the pre-update row, so the requeue test is
            // evaluated once against the old retry_count.
            let row = sqlx::query(
                "UPDATE work_items
                 SET status = CASE WHEN $2 AND retry_count < $3 THEN 'pending' ELSE 'failed' END,
                     retry_count = CASE WHEN $2 AND retry_count < $3
                                        THEN retry_count + 1 ELSE retry_count END,
                     started_at = CASE WHEN $2 AND retry_count < $3 THEN NULL ELSE started_at END,
                     completed_at = CASE WHEN $2 AND retry_count < $3 THEN NULL ELSE $4 END,
                     error = $5
                 WHERE id = $1 AND status IN ('pending', 'processing')
                 RETURNING status, retry_count",
            )
            .bind(id)
            .bind(retryable)
            .bind(i64::from(max_retries))
            .bind(now_ts())
            .bind(error)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to record failure for work item {id}"))?;

            let Some(row) = row else {
                let status = self
                    .get(id)
                    .await?
                    .map_or_else(|| "missing".to_string(), |item| item.status.to_string());
                return Err(StorageError::NotActive {
                    entity: "work item",
                    id: id.to_string(),
                    status,
                }
                .into());
            };

            let status: String = row.try_get("status")?;
            let retry_count: i64 = row.try_get("retry_count")?;
            if status == WorkStatus::Pending.as_db() {
                Ok(FailDisposition::Requeued {
                    retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
                })
            } else {
                Ok(FailDisposition::Failed)
            }
        })
    }

    fn counts(&self) -> StoreFuture<'_, QueueCounts> {
        Box::pin(async move {
            let rows: Vec<(String, i64)> =
                sqlx::query_as("SELECT status, COUNT(*) FROM work_items GROUP BY status")
                    .fetch_all(&self.pool)
                    .await?;

            let mut counts = QueueCounts::default();
            for (status, count) in rows {
                let count = usize::try_from(count).unwrap_or(0);
                match WorkStatus::from_db(&status) {
                    Some(WorkStatus::Pending) => counts.pending = count,
                    Some(WorkStatus::Processing) => counts.processing = count,
                    Some(WorkStatus::Complete) => counts.complete = count,
                    Some(WorkStatus::Failed) => counts.failed = count,
                    None => tracing::warn!(status = %status, "ignoring unknown work item status"),
                }
            }
            Ok(counts)
        })
    }
}
