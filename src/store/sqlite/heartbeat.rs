use super::{
    SqliteStore, insert_memory, new_id, now_ts, parse_json, parse_opt_json, parse_opt_ts,
    parse_ts, recent_memories,
};
use crate::calls::ThinkKind;
use crate::error::StorageError;
use crate::heartbeat::{
    ActionSpec, BatchResult, Heartbeat, HeartbeatAction, HeartbeatStatus, decision_actions,
};
use crate::store::{HeartbeatStore, StoreFuture};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use std::collections::HashSet;

/// Heartbeat cadence check shared by the due check and the atomic start.
const HEARTBEAT_DUE: &str = "terminated = 0
    AND NOT EXISTS (SELECT 1 FROM heartbeats WHERE status = 'running')
    AND (last_heartbeat_at IS NULL
         OR (julianday($1) - julianday(last_heartbeat_at)) * 86400.0 >= heartbeat_interval)";

const RECENT_MEMORY_LIMIT: i64 = 5;

/// What applying one action did.
enum Step {
    Applied(Value),
    Nested { call_id: String, result: Value },
    Terminated(Value),
}

fn map_heartbeat_row(row: &SqliteRow) -> Result<Heartbeat> {
    let status_raw: String = row.try_get("status")?;
    let cursor: i64 = row.try_get("action_cursor")?;
    let started_raw: String = row.try_get("started_at")?;

    Ok(Heartbeat {
        id: row.try_get("id")?,
        status: HeartbeatStatus::from_db(&status_raw).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown heartbeat status: {status_raw}"))
        })?,
        decision: parse_opt_json(row.try_get("decision")?)?,
        action_cursor: usize::try_from(cursor).unwrap_or(0),
        halt_reason: row.try_get("halt_reason")?,
        memory_id: row.try_get("memory_id")?,
        started_at: parse_ts(&started_raw)?,
        finished_at: parse_opt_ts(row.try_get("finished_at")?)?,
    })
}

/// Terminate both the heartbeat and the agent.
async fn terminate_agent(conn: &mut SqliteConnection, heartbeat_id: &str) -> Result<()> {
    let now = now_ts();
    sqlx::query(
        "UPDATE heartbeats SET status = 'terminated', finished_at = $2
         WHERE id = $1 AND status = 'running'",
    )
    .bind(heartbeat_id)
    .bind(&now)
    .execute(&mut *conn)
    .await?;
    sqlx::query("UPDATE agent_state SET terminated = 1, terminated_at = $1 WHERE id = 1")
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn enqueue_nested(
    conn: &mut SqliteConnection,
    kind: ThinkKind,
    heartbeat_id: &str,
    index: usize,
    spec: &ActionSpec,
    energy: i64,
) -> Result<String> {
    let input = json!({
        "kind": kind.as_str(),
        "heartbeat_id": heartbeat_id,
        "action_index": index,
        "params": spec.params,
        "context": { "energy": energy },
    });
    let item = SqliteStore::insert_work_item(&mut *conn, "think", &input, Some(heartbeat_id)).await?;
    Ok(item.id)
}

async fn apply_action(
    conn: &mut SqliteConnection,
    heartbeat_id: &str,
    index: usize,
    action: HeartbeatAction,
    spec: &ActionSpec,
    energy: i64,
) -> Result<Step> {
    if let Some(kind) = action.nested_kind() {
        let call_id = enqueue_nested(conn, kind, heartbeat_id, index, spec, energy).await?;
        let result = json!({ "call_id": call_id });
        return Ok(Step::Nested { call_id, result });
    }

    match action {
        HeartbeatAction::Rest => Ok(Step::Applied(json!({ "rested": true }))),
        HeartbeatAction::Remember => {
            let content = spec
                .param_str("content")
                .map_or_else(|| spec.params.to_string(), ToString::to_string);
            let memory_id = insert_memory(
                &mut *conn,
                "remembered",
                &content,
                &json!({ "action_index": index }),
                Some(heartbeat_id),
            )
            .await?;
            Ok(Step::Applied(json!({ "memory_id": memory_id })))
        }
        HeartbeatAction::ReachOutUser => {
            let payload = json!({
                "heartbeat_id": heartbeat_id,
                "message": spec.param_str("message").or_else(|| spec.param_str("content")),
                "params": spec.params,
            });
            let message = SqliteStore::insert_outbox(&mut *conn, "reach_out_user", &payload).await?;
            Ok(Step::Applied(json!({ "outbox_id": message.id })))
        }
        HeartbeatAction::Terminate if spec.is_confirmed() => {
            terminate_agent(conn, heartbeat_id).await?;
            Ok(Step::Terminated(json!({ "terminated": true })))
        }
        HeartbeatAction::Terminate => {
            let call_id = enqueue_nested(
                conn,
                ThinkKind::TerminationConfirm,
                heartbeat_id,
                index,
                spec,
                energy,
            )
            .await?;
            let result = json!({ "call_id": call_id, "awaiting_confirmation": true });
            Ok(Step::Nested { call_id, result })
        }
        // Routed above through `nested_kind`.
        HeartbeatAction::BrainstormGoals
        | HeartbeatAction::InquireShallow
        | HeartbeatAction::InquireDeep
        | HeartbeatAction::Reflect => Err(anyhow::anyhow!(
            "action {} requires a nested call",
            action.name()
        )),
    }
}

async fn record_action(
    conn: &mut SqliteConnection,
    heartbeat_id: &str,
    index: usize,
    spec: &ActionSpec,
    result: &Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO heartbeat_actions (heartbeat_id, action_index, action, result, applied_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(heartbeat_id)
    .bind(i64::try_from(index)?)
    .bind(json!({ "action": spec.name, "params": spec.params }).to_string())
    .bind(result.to_string())
    .bind(now_ts())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to record action {index} of heartbeat {heartbeat_id}"))?;
    Ok(())
}

/// Text stored for a nested call's result memory.
fn result_content(result: &Value) -> String {
    ["content", "summary", "answer", "reflection"]
        .iter()
        .find_map(|key| result.get(*key).and_then(Value::as_str))
        .map_or_else(|| result.to_string(), ToString::to_string)
}

fn confirms_termination(output: &Value) -> bool {
    output
        .get("result")
        .and_then(|r| r.get("confirm"))
        .or_else(|| output.get("confirm"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl HeartbeatStore for SqliteStore {
    fn should_run_heartbeat(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let (due,): (bool,) = sqlx::query_as(&format!(
                "SELECT COALESCE(({HEARTBEAT_DUE}), 0) FROM agent_state WHERE id = 1"
            ))
            .bind(now_ts())
            .fetch_one(&self.pool)
            .await
            .context("Failed to check heartbeat schedule")?;
            Ok(due)
        })
    }

    fn start_heartbeat(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let now = now_ts();
            let mut tx = self.pool.begin().await?;

            // Claim the slot first; the write takes the database lock, so a
            // concurrent starter sees this heartbeat as running.
            let row = sqlx::query(&format!(
                "UPDATE agent_state
                 SET last_heartbeat_at = $1,
                     energy = MIN(max_energy, energy + energy_regen)
                 WHERE id = 1 AND {HEARTBEAT_DUE}
                 RETURNING energy, max_energy"
            ))
            .bind(&now)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to start heartbeat")?;

            let Some(row) = row else {
                tx.rollback().await?;
                return Ok(None);
            };
            let energy: i64 = row.try_get("energy")?;
            let max_energy: i64 = row.try_get("max_energy")?;

            let heartbeat_id = new_id();
            sqlx::query(
                "INSERT INTO heartbeats (id, status, action_cursor, started_at)
                 VALUES ($1, 'running', 0, $2)",
            )
            .bind(&heartbeat_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let memories = recent_memories(&mut *tx, RECENT_MEMORY_LIMIT).await?;
            let input = json!({
                "kind": ThinkKind::HeartbeatDecision.as_str(),
                "heartbeat_id": heartbeat_id,
                "context": {
                    "energy": energy,
                    "max_energy": max_energy,
                    "recent_memories": memories,
                },
            });
            let item = Self::insert_work_item(&mut *tx, "think", &input, Some(&heartbeat_id)).await?;
            tx.commit().await?;

            tracing::info!(
                heartbeat_id = %heartbeat_id,
                item_id = %item.id,
                energy,
                "heartbeat started"
            );
            Ok(Some(heartbeat_id))
        })
    }

    fn apply_decision<'a>(
        &'a self,
        heartbeat_id: &'a str,
        decision: &'a Value,
        start_index: usize,
    ) -> StoreFuture<'a, BatchResult> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            // The first decision recorded wins, so a re-dispatched decision
            // call cannot swap the action list under already-applied indices.
            let row = sqlx::query(
                "UPDATE heartbeats SET decision = COALESCE(decision, $2)
                 WHERE id = $1
                 RETURNING status, decision, memory_id, halt_reason",
            )
            .bind(heartbeat_id)
            .bind(decision.to_string())
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("Failed to load heartbeat {heartbeat_id}"))?;

            let Some(row) = row else {
                return Err(StorageError::NotFound {
                    entity: "heartbeat",
                    id: heartbeat_id.to_string(),
                }
                .into());
            };

            let status_raw: String = row.try_get("status")?;
            let memory_id: Option<String> = row.try_get("memory_id")?;
            let early = match HeartbeatStatus::from_db(&status_raw) {
                Some(HeartbeatStatus::Running) => None,
                Some(HeartbeatStatus::Completed) => Some(BatchResult::completed(memory_id.clone())),
                Some(HeartbeatStatus::Terminated) => Some(BatchResult::terminated()),
                Some(HeartbeatStatus::Halted) => {
                    let reason: Option<String> = row.try_get("halt_reason")?;
                    Some(BatchResult::halted(
                        reason.unwrap_or_else(|| "heartbeat_halted".into()),
                    ))
                }
                None => {
                    return Err(StorageError::Corrupt(format!(
                        "unknown heartbeat status: {status_raw}"
                    ))
                    .into());
                }
            };
            if let Some(result) = early {
                tx.commit().await?;
                return Ok(result);
            }

            let stored: String = row.try_get("decision")?;
            let Some(actions) = decision_actions(&parse_json(&stored)?) else {
                tx.commit().await?;
                return Ok(BatchResult::halted("invalid_decision"));
            };

            let applied: HashSet<usize> = sqlx::query_as::<_, (i64,)>(
                "SELECT action_index FROM heartbeat_actions WHERE heartbeat_id = $1",
            )
            .bind(heartbeat_id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .filter_map(|(index,)| usize::try_from(index).ok())
            .collect();

            let (mut energy,): (i64,) =
                sqlx::query_as("SELECT energy FROM agent_state WHERE id = 1")
                    .fetch_one(&mut *tx)
                    .await?;

            let mut index = start_index;
            let mut applied_now = 0usize;
            let outcome = loop {
                if index >= actions.len() {
                    break None;
                }
                if applied.contains(&index) {
                    index += 1;
                    continue;
                }
                if applied_now >= self.batch_size {
                    break Some(BatchResult::resume_at(index));
                }

                let spec = &actions[index];
                let Some(action) = HeartbeatAction::parse(&spec.name) else {
                    break Some(BatchResult::halted(format!("invalid_action:{}", spec.name)));
                };
                if energy < action.energy_cost() {
                    break Some(BatchResult::halted("energy_exhausted"));
                }
                energy -= action.energy_cost();

                let step = apply_action(&mut tx, heartbeat_id, index, action, spec, energy).await?;
                let result = match &step {
                    Step::Applied(result) | Step::Terminated(result) => result,
                    Step::Nested { result, .. } => result,
                };
                record_action(&mut tx, heartbeat_id, index, spec, result).await?;
                applied_now += 1;
                index += 1;

                match step {
                    Step::Applied(_) => {}
                    Step::Nested { call_id, .. } => {
                        break Some(BatchResult::pending_call(call_id, Some(index)));
                    }
                    Step::Terminated(_) => break Some(BatchResult::terminated()),
                }
            };

            sqlx::query("UPDATE agent_state SET energy = $1 WHERE id = 1")
                .bind(energy)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE heartbeats SET action_cursor = MAX(action_cursor, $2) WHERE id = $1",
            )
            .bind(heartbeat_id)
            .bind(i64::try_from(index.min(actions.len()))?)
            .execute(&mut *tx)
            .await?;

            let result = match outcome {
                Some(result) => result,
                None => {
                    let memory_id = match memory_id {
                        Some(existing) => existing,
                        None => {
                            let names: Vec<&str> =
                                actions.iter().map(|spec| spec.name.as_str()).collect();
                            let content = format!(
                                "Heartbeat applied {} action(s): {}",
                                actions.len(),
                                names.join(", ")
                            );
                            let id = insert_memory(
                                &mut *tx,
                                "heartbeat_summary",
                                &content,
                                &json!({ "actions": names, "energy": energy }),
                                Some(heartbeat_id),
                            )
                            .await?;
                            sqlx::query("UPDATE heartbeats SET memory_id = $2 WHERE id = $1")
                                .bind(heartbeat_id)
                                .bind(&id)
                                .execute(&mut *tx)
                                .await?;
                            id
                        }
                    };
                    BatchResult::completed(Some(memory_id))
                }
            };

            tx.commit().await?;
            tracing::debug!(
                heartbeat_id,
                start_index,
                applied = applied_now,
                energy,
                "decision batch applied"
            );
            Ok(result)
        })
    }

    fn apply_call_result<'a>(
        &'a self,
        item_id: &'a str,
        output: &'a Value,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "UPDATE work_items
                 SET status = 'complete', output = $2, error = NULL, completed_at = $3
                 WHERE id = $1 AND status NOT IN ('complete', 'failed')
                 RETURNING input, heartbeat_id",
            )
            .bind(item_id)
            .bind(output.to_string())
            .bind(now_ts())
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("Failed to apply result of work item {item_id}"))?;

            let Some(row) = row else {
                // Someone else already finished the item; report the heartbeat's
                // current state without applying twice.
                let existing: Option<(Option<String>,)> =
                    sqlx::query_as("SELECT heartbeat_id FROM work_items WHERE id = $1")
                        .bind(item_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                let Some((heartbeat_id,)) = existing else {
                    return Err(StorageError::NotFound {
                        entity: "work item",
                        id: item_id.to_string(),
                    }
                    .into());
                };
                let terminated = match heartbeat_id {
                    Some(hb) => {
                        let status: Option<(String,)> =
                            sqlx::query_as("SELECT status FROM heartbeats WHERE id = $1")
                                .bind(&hb)
                                .fetch_optional(&mut *tx)
                                .await?;
                        status.is_some_and(|(s,)| s == HeartbeatStatus::Terminated.as_db())
                    }
                    None => false,
                };
                tx.commit().await?;
                return Ok(json!({ "applied": false, "terminated": terminated }));
            };

            let input_raw: String = row.try_get("input")?;
            let input = parse_json(&input_raw)?;
            let heartbeat_id: Option<String> = row.try_get("heartbeat_id")?;
            let kind = input.get("kind").and_then(Value::as_str).and_then(ThinkKind::parse);

            let resolution = if kind == Some(ThinkKind::TerminationConfirm) {
                let confirmed = confirms_termination(output);
                if confirmed && let Some(hb) = heartbeat_id.as_deref() {
                    terminate_agent(&mut tx, hb).await?;
                    tracing::warn!(heartbeat_id = %hb, "agent termination confirmed");
                }
                json!({
                    "applied": true,
                    "terminated": confirmed && heartbeat_id.is_some(),
                })
            } else {
                let result = output.get("result").unwrap_or(output);
                let memory_kind = kind.map_or("call_result", ThinkKind::as_str);
                let memory_id = insert_memory(
                    &mut *tx,
                    memory_kind,
                    &result_content(result),
                    &json!({ "item_id": item_id, "result": result }),
                    heartbeat_id.as_deref(),
                )
                .await?;
                json!({ "applied": true, "memory_id": memory_id })
            };

            tx.commit().await?;
            Ok(resolution)
        })
    }

    fn complete_heartbeat<'a>(
        &'a self,
        heartbeat_id: &'a str,
        memory_id: Option<&'a str>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE heartbeats
                 SET status = 'completed', memory_id = COALESCE($2, memory_id), finished_at = $3
                 WHERE id = $1 AND status = 'running'",
            )
            .bind(heartbeat_id)
            .bind(memory_id)
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to complete heartbeat {heartbeat_id}"))?;

            if result.rows_affected() == 0 {
                tracing::debug!(heartbeat_id, "heartbeat already finished; completion skipped");
            }
            Ok(())
        })
    }

    fn halt_heartbeat<'a>(
        &'a self,
        heartbeat_id: &'a str,
        reason: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE heartbeats
                 SET status = 'halted', halt_reason = $2, finished_at = $3
                 WHERE id = $1 AND status = 'running'",
            )
            .bind(heartbeat_id)
            .bind(reason)
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to halt heartbeat {heartbeat_id}"))?;
            Ok(())
        })
    }

    fn get_heartbeat<'a>(&'a self, heartbeat_id: &'a str) -> StoreFuture<'a, Option<Heartbeat>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, status, decision, action_cursor, halt_reason, memory_id,
                        started_at, finished_at
                 FROM heartbeats WHERE id = $1",
            )
            .bind(heartbeat_id)
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(map_heartbeat_row).transpose()
        })
    }

    fn is_agent_terminated(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let (terminated,): (bool,) =
                sqlx::query_as("SELECT terminated FROM agent_state WHERE id = 1")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(terminated)
        })
    }
}
