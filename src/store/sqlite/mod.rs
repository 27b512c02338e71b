//! SQLite-backed storage using the sqlx async pool.
//!
//! SQLite has no row locks, so the skip-locked claim is expressed as one
//! conditional `UPDATE ... RETURNING`. SQLite serialises writers, which makes
//! the `status = 'pending'` guard sufficient: at most one statement can flip a
//! given row, and rows already `processing` are never candidates.

mod consent;
mod heartbeat;
mod maintenance;
mod messages;
mod queue;
mod settings;

use crate::config::DatabaseConfig;
use crate::error::StorageError;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 5;

pub struct SqliteStore {
    pool: SqlitePool,
    batch_size: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database file described by `config`.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", config.path.display()))?;

        Self::new(pool).await
    }

    /// Single-connection in-memory database, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::new(pool).await
    }

    /// Wrap an existing pool and run schema setup.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_schema(&pool).await?;
        Ok(Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Maximum number of actions applied per `apply_decision` call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ── Schema ──────────────────────────────────────────────────────────────────

const SCHEMA: [&str; 12] = [
    "CREATE TABLE IF NOT EXISTS work_items (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        id           TEXT NOT NULL UNIQUE,
        call_type    TEXT NOT NULL,
        input        TEXT NOT NULL,
        status       TEXT NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'processing', 'complete', 'failed')),
        retry_count  INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        heartbeat_id TEXT,
        output       TEXT,
        error        TEXT,
        requested_at TEXT NOT NULL,
        started_at   TEXT,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_work_items_claim
        ON work_items(status, requested_at, seq)",
    "CREATE TABLE IF NOT EXISTS agent_state (
        id                   INTEGER PRIMARY KEY CHECK (id = 1),
        energy               INTEGER NOT NULL,
        max_energy           INTEGER NOT NULL,
        energy_regen         INTEGER NOT NULL,
        heartbeat_interval   INTEGER NOT NULL,
        last_heartbeat_at    TEXT,
        last_maintenance_at  TEXT,
        last_subconscious_at TEXT,
        last_contact_at      TEXT,
        terminated           INTEGER NOT NULL DEFAULT 0,
        terminated_at        TEXT
    )",
    "INSERT OR IGNORE INTO agent_state (id, energy, max_energy, energy_regen, heartbeat_interval)
        VALUES (1, 20, 20, 10, 3600)",
    "CREATE TABLE IF NOT EXISTS heartbeats (
        id            TEXT PRIMARY KEY,
        status        TEXT NOT NULL
                      CHECK (status IN ('running', 'completed', 'terminated', 'halted')),
        decision      TEXT,
        action_cursor INTEGER NOT NULL DEFAULT 0,
        halt_reason   TEXT,
        memory_id     TEXT,
        started_at    TEXT NOT NULL,
        finished_at   TEXT
    )",
    "CREATE TABLE IF NOT EXISTS heartbeat_actions (
        heartbeat_id TEXT NOT NULL REFERENCES heartbeats(id) ON DELETE CASCADE,
        action_index INTEGER NOT NULL,
        action       TEXT NOT NULL,
        result       TEXT,
        applied_at   TEXT NOT NULL,
        PRIMARY KEY (heartbeat_id, action_index)
    )",
    "CREATE TABLE IF NOT EXISTS consent (
        id          INTEGER PRIMARY KEY CHECK (id = 1),
        decision    TEXT NOT NULL,
        signature   TEXT,
        memories    TEXT,
        response    TEXT,
        recorded_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS memories (
        id           TEXT PRIMARY KEY,
        kind         TEXT NOT NULL,
        content      TEXT NOT NULL,
        metadata     TEXT,
        heartbeat_id TEXT,
        created_at   TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at)",
    "CREATE TABLE IF NOT EXISTS outbox_messages (
        seq        INTEGER PRIMARY KEY AUTOINCREMENT,
        id         TEXT NOT NULL UNIQUE,
        kind       TEXT NOT NULL,
        payload    TEXT NOT NULL,
        status     TEXT NOT NULL DEFAULT 'pending'
                   CHECK (status IN ('pending', 'sent', 'failed')),
        error      TEXT,
        created_at TEXT NOT NULL,
        sent_at    TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox_messages(status, seq)",
    "CREATE TABLE IF NOT EXISTS settings (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
    }
    Ok(())
}

// ── Internal helpers ────────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_ts() -> String {
    format_ts(Utc::now())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp {raw}: {e}")))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt(format!("invalid json: {e}")).into())
}

fn parse_opt_json(raw: Option<String>) -> Result<Option<Value>> {
    raw.as_deref().map(parse_json).transpose()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Timestamp `age` before now, clamped at the earliest representable time.
fn cutoff_ts(age: Duration) -> String {
    let cutoff = chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    format_ts(cutoff)
}

async fn insert_memory<'e, E>(
    executor: E,
    kind: &str,
    content: &str,
    metadata: &Value,
    heartbeat_id: Option<&str>,
) -> Result<String>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = new_id();
    sqlx::query(
        "INSERT INTO memories (id, kind, content, metadata, heartbeat_id, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&id)
    .bind(kind)
    .bind(content)
    .bind(metadata.to_string())
    .bind(heartbeat_id)
    .bind(now_ts())
    .execute(executor)
    .await
    .with_context(|| format!("Failed to store {kind} memory"))?;
    Ok(id)
}

/// Newest-first memory summaries fed to the backend as context.
async fn recent_memories<'e, E>(executor: E, limit: i64) -> Result<Vec<Value>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT kind, content, created_at FROM memories
         ORDER BY created_at DESC, rowid DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(kind, content, created_at)| {
            serde_json::json!({"kind": kind, "content": content, "created_at": created_at})
        })
        .collect())
}
