use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use cortexd::error::BackendError;
use cortexd::heartbeat::{BatchResult, EngineLimits, Heartbeat, HeartbeatActionEngine, HeartbeatOutcome};
use cortexd::queue::{RetryPolicy, WorkStatus};
use cortexd::store::{
    HeartbeatStore, MaintenancePolicy, MaintenanceStore, SqliteStore, StoreFuture, WorkQueue,
};
use serde_json::{Value, json};

use super::worker_harness::{
    GOALS, RuleBackend, TERMINATION, grant_consent, processor, temp_store,
};

/// Heartbeat storage that replays scripted batch results and records every
/// call the engine makes.
#[derive(Default)]
struct ScriptedHeartbeats {
    batches: Mutex<Vec<BatchResult>>,
    /// Returned once the script runs out.
    repeat: Option<BatchResult>,
    resolution: Option<Value>,
    fail_resolution: bool,
    starts: Mutex<Vec<usize>>,
    resolved: Mutex<Vec<String>>,
    completed: Mutex<Vec<Option<String>>>,
    halted: Mutex<Vec<String>>,
    /// A held item whose claim is pushed into the past on each resolution,
    /// standing in for a slow nested call.
    age_on_resolve: Mutex<Option<(Arc<SqliteStore>, String)>>,
}

impl ScriptedHeartbeats {
    fn new(batches: Vec<BatchResult>) -> Self {
        Self {
            batches: Mutex::new(batches),
            ..Self::default()
        }
    }

    fn starts(&self) -> Vec<usize> {
        self.starts.lock().unwrap().clone()
    }
}

impl HeartbeatStore for ScriptedHeartbeats {
    fn should_run_heartbeat(&self) -> StoreFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }

    fn start_heartbeat(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    fn apply_decision<'a>(
        &'a self,
        _heartbeat_id: &'a str,
        _decision: &'a Value,
        start_index: usize,
    ) -> StoreFuture<'a, BatchResult> {
        self.starts.lock().unwrap().push(start_index);
        let next = {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                self.repeat.clone()
            } else {
                Some(batches.remove(0))
            }
        };
        Box::pin(async move { next.ok_or_else(|| anyhow!("script exhausted")) })
    }

    fn apply_call_result<'a>(&'a self, item_id: &'a str, output: &'a Value) -> StoreFuture<'a, Value> {
        self.resolved.lock().unwrap().push(item_id.to_string());
        let result = if self.fail_resolution {
            Err(anyhow!("memory table locked"))
        } else {
            Ok(self
                .resolution
                .clone()
                .unwrap_or_else(|| json!({ "applied": true, "echo": output.clone() })))
        };
        let aged = self.age_on_resolve.lock().unwrap().clone();
        Box::pin(async move {
            if let Some((store, held_id)) = aged {
                sqlx::query("UPDATE work_items SET started_at = $1 WHERE id = $2")
                    .bind("2000-01-01T00:00:00.000000Z")
                    .bind(&held_id)
                    .execute(store.pool())
                    .await?;
            }
            result
        })
    }

    fn complete_heartbeat<'a>(
        &'a self,
        _heartbeat_id: &'a str,
        memory_id: Option<&'a str>,
    ) -> StoreFuture<'a, ()> {
        self.completed.lock().unwrap().push(memory_id.map(str::to_string));
        Box::pin(async { Ok(()) })
    }

    fn halt_heartbeat<'a>(&'a self, _heartbeat_id: &'a str, reason: &'a str) -> StoreFuture<'a, ()> {
        self.halted.lock().unwrap().push(reason.to_string());
        Box::pin(async { Ok(()) })
    }

    fn get_heartbeat<'a>(&'a self, _heartbeat_id: &'a str) -> StoreFuture<'a, Option<Heartbeat>> {
        Box::pin(async { Ok(None) })
    }

    fn is_agent_terminated(&self) -> StoreFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }
}

struct Rig {
    _dir: tempfile::TempDir,
    queue: Arc<SqliteStore>,
    heartbeats: Arc<ScriptedHeartbeats>,
    backend: Arc<RuleBackend>,
    engine: HeartbeatActionEngine,
}

async fn rig(heartbeats: ScriptedHeartbeats, limits: EngineLimits) -> Rig {
    let backend = RuleBackend::new().reply(GOALS, r#"{"goals":[],"summary":"none"}"#);
    rig_with(heartbeats, limits, backend).await
}

async fn rig_with(heartbeats: ScriptedHeartbeats, limits: EngineLimits, backend: RuleBackend) -> Rig {
    let (dir, queue) = temp_store().await;
    grant_consent(&queue).await;
    let backend = Arc::new(backend);
    let heartbeats = Arc::new(heartbeats);
    let engine = HeartbeatActionEngine::new(
        heartbeats.clone(),
        queue.clone(),
        processor(&queue, backend.clone()),
        RetryPolicy::new(queue.clone(), 3),
        limits,
    );
    Rig {
        _dir: dir,
        queue,
        heartbeats,
        backend,
        engine,
    }
}

async fn nested_item(queue: &SqliteStore) -> String {
    queue
        .enqueue("think", &json!({"kind": "brainstorm_goals"}), Some("hb-1"))
        .await
        .unwrap()
        .id
}

fn decision() -> Value {
    json!({"actions": [{"action": "brainstorm_goals"}, {"action": "rest"}]})
}

#[tokio::test]
async fn terminated_batch_skips_completion() {
    let rig = rig(
        ScriptedHeartbeats::new(vec![BatchResult::terminated()]),
        EngineLimits::default(),
    )
    .await;

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Terminated);
    assert!(rig.heartbeats.completed.lock().unwrap().is_empty());
    assert!(rig.heartbeats.halted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn nested_call_resolves_then_resumes_from_given_cursor() {
    let rig = rig(ScriptedHeartbeats::default(), EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id.clone(), Some(1)),
        BatchResult::completed(Some("mem-1".into())),
    ]);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(
        outcome,
        HeartbeatOutcome::Completed {
            memory_id: Some("mem-1".into())
        }
    );
    assert_eq!(rig.heartbeats.starts(), vec![0, 1]);
    assert_eq!(*rig.heartbeats.resolved.lock().unwrap(), vec![call_id]);
    assert_eq!(
        *rig.heartbeats.completed.lock().unwrap(),
        vec![Some("mem-1".to_string())]
    );
    assert_eq!(rig.backend.calls(), 1);
}

#[tokio::test]
async fn missing_cursor_resumes_from_zero() {
    let rig = rig(ScriptedHeartbeats::default(), EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id, None),
        BatchResult::completed(None),
    ]);

    rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(rig.heartbeats.starts(), vec![0, 0]);
}

#[tokio::test]
async fn nested_termination_flag_stops_the_engine() {
    let mut heartbeats = ScriptedHeartbeats::default();
    heartbeats.resolution = Some(json!({"applied": true, "termination": {"terminated": true}}));
    let rig = rig(heartbeats, EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id, Some(1)),
        BatchResult::completed(None),
    ]);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Terminated);
    assert_eq!(rig.heartbeats.starts(), vec![0]);
    assert!(rig.heartbeats.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn item_claimed_elsewhere_uses_its_stored_state() {
    let rig = rig(ScriptedHeartbeats::default(), EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    // Another worker already holds the nested item.
    let taken = rig.queue.claim().await.unwrap().unwrap();
    assert_eq!(taken.id, call_id);
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id, Some(1)),
        BatchResult::completed(None),
    ]);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert!(matches!(outcome, HeartbeatOutcome::Completed { .. }));
    assert_eq!(rig.backend.calls(), 0);
    assert!(rig.heartbeats.resolved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn item_completed_elsewhere_reports_its_stored_result() {
    let rig = rig(ScriptedHeartbeats::default(), EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    let taken = rig.queue.claim().await.unwrap().unwrap();
    rig.queue.complete(&taken.id, &json!({"result": {"goals": []}})).await.unwrap();
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id.clone(), Some(1)),
        BatchResult::completed(None),
    ]);

    rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(rig.backend.calls(), 0);
    assert_eq!(*rig.heartbeats.resolved.lock().unwrap(), vec![call_id]);
}

#[tokio::test]
async fn endless_nested_chain_hits_the_hop_limit() {
    let limits = EngineLimits {
        max_nested_calls: 3,
        max_iterations: 100,
    };
    let rig = rig(ScriptedHeartbeats::default(), limits).await;
    let mut script = Vec::new();
    for _ in 0..10 {
        let id = nested_item(&rig.queue).await;
        script.push(BatchResult::pending_call(id, Some(1)));
    }
    rig.heartbeats.batches.lock().unwrap().extend(script);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(
        outcome,
        HeartbeatOutcome::Halted {
            reason: "nested_call_limit".into()
        }
    );
    assert_eq!(rig.heartbeats.starts().len(), 4);
    assert_eq!(rig.backend.calls(), 3);
    assert_eq!(*rig.heartbeats.halted.lock().unwrap(), vec!["nested_call_limit"]);
}

#[tokio::test]
async fn batch_boundaries_are_bounded_by_the_iteration_cap() {
    let heartbeats = ScriptedHeartbeats {
        repeat: Some(BatchResult::resume_at(1)),
        ..ScriptedHeartbeats::default()
    };
    let limits = EngineLimits {
        max_nested_calls: 3,
        max_iterations: 5,
    };
    let rig = rig(heartbeats, limits).await;

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(
        outcome,
        HeartbeatOutcome::Halted {
            reason: "iteration_limit".into()
        }
    );
    assert_eq!(rig.heartbeats.starts(), vec![0, 1, 1, 1, 1]);
}

#[tokio::test]
async fn halt_reason_is_recorded() {
    let rig = rig(
        ScriptedHeartbeats::new(vec![BatchResult::halted("energy_exhausted")]),
        EngineLimits::default(),
    )
    .await;

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert_eq!(
        outcome,
        HeartbeatOutcome::Halted {
            reason: "energy_exhausted".into()
        }
    );
    assert_eq!(*rig.heartbeats.halted.lock().unwrap(), vec!["energy_exhausted"]);
}

#[tokio::test]
async fn failed_application_still_stores_the_output() {
    let heartbeats = ScriptedHeartbeats {
        fail_resolution: true,
        ..ScriptedHeartbeats::default()
    };
    let rig = rig(heartbeats, EngineLimits::default()).await;
    let call_id = nested_item(&rig.queue).await;
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id.clone(), Some(1)),
        BatchResult::completed(None),
    ]);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert!(matches!(outcome, HeartbeatOutcome::Completed { .. }));

    let stored = rig.queue.get(&call_id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkStatus::Complete);
    assert_eq!(stored.output.unwrap()["result"]["summary"], json!("none"));
}

#[tokio::test]
async fn held_decision_survives_reaping_after_nested_calls() {
    let rig = rig(ScriptedHeartbeats::default(), EngineLimits::default()).await;
    let held = rig
        .queue
        .enqueue("think", &json!({"kind": "heartbeat_decision"}), None)
        .await
        .unwrap();
    let held = rig.queue.claim_by_id(&held.id).await.unwrap().unwrap();
    let call_id = nested_item(&rig.queue).await;
    *rig.heartbeats.age_on_resolve.lock().unwrap() = Some((rig.queue.clone(), held.id.clone()));
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id, Some(1)),
        BatchResult::completed(None),
    ]);

    rig.engine
        .execute_holding(&held, "hb-1", &decision())
        .await
        .unwrap();

    let policy = MaintenancePolicy {
        stale_after: Duration::from_secs(60),
        retention: Duration::from_secs(3600),
        max_retries: 3,
    };
    let summary = rig.queue.run_maintenance_tick(&policy).await.unwrap();
    assert_eq!(summary["reaped"], json!(0));
    let still_held = rig.queue.get(&held.id).await.unwrap().unwrap();
    assert_eq!(still_held.status, WorkStatus::Processing);
}

#[tokio::test]
async fn failed_termination_confirm_leaves_the_agent_running() {
    let backend = RuleBackend::new().fail(
        TERMINATION,
        BackendError::Auth {
            provider: "rules".into(),
        },
    );
    let rig = rig_with(ScriptedHeartbeats::default(), EngineLimits::default(), backend).await;
    let call_id = rig
        .queue
        .enqueue("think", &json!({"kind": "termination_confirm"}), Some("hb-1"))
        .await
        .unwrap()
        .id;
    rig.heartbeats.batches.lock().unwrap().extend([
        BatchResult::pending_call(call_id.clone(), Some(1)),
        BatchResult::completed(None),
    ]);

    let outcome = rig.engine.execute("hb-1", &decision()).await.unwrap();
    assert!(matches!(outcome, HeartbeatOutcome::Completed { .. }));
    assert!(rig.heartbeats.resolved.lock().unwrap().is_empty());
    assert_eq!(rig.heartbeats.starts(), vec![0, 1]);
    let failed = rig.queue.get(&call_id).await.unwrap().unwrap();
    assert_eq!(failed.status, WorkStatus::Failed);
    assert!(!rig.queue.is_agent_terminated().await.unwrap());
}
