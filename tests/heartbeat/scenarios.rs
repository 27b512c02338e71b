use std::sync::Arc;

use cortexd::consent::{ConsentDecision, ConsentResponse};
use cortexd::error::BackendError;
use cortexd::heartbeat::{HeartbeatOutcome, HeartbeatStatus};
use cortexd::queue::WorkStatus;
use cortexd::store::{ConsentStore, HeartbeatStore, SqliteStore, WorkQueue};
use cortexd::worker::{DecisionWorker, ItemDisposition, WorkerDeps};
use serde_json::json;
use tempfile::TempDir;

use super::worker_harness::{
    DECISION, GOALS, RuleBackend, TERMINATION, grant_consent, slot_and_gate, temp_store,
    test_config,
};

fn worker(dir: &TempDir, store: &Arc<SqliteStore>, backend: Arc<RuleBackend>) -> DecisionWorker {
    worker_with(dir, store, backend, |_| {})
}

fn worker_with(
    dir: &TempDir,
    store: &Arc<SqliteStore>,
    backend: Arc<RuleBackend>,
    tweak: impl FnOnce(&mut cortexd::Config),
) -> DecisionWorker {
    let mut config = test_config(dir);
    tweak(&mut config);
    let (slot, gate) = slot_and_gate(store, backend);
    DecisionWorker::new(WorkerDeps::sqlite(store), slot, gate, &config)
}

async fn item_of_kind(store: &SqliteStore, kind: &str) -> (String, String) {
    sqlx::query_as(
        "SELECT id, status FROM work_items WHERE json_extract(input, '$.kind') = $1",
    )
    .bind(kind)
    .fetch_one(store.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn decision_resolves_nested_call_inline_then_embed_fails() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(
        RuleBackend::new()
            .reply(
                DECISION,
                r#"{"reasoning":"explore","actions":[
                    {"action":"brainstorm_goals","params":{"topic":"music"}},
                    {"action":"rest"}]}"#,
            )
            .reply(GOALS, r#"{"goals":[{"title":"learn piano","why":"joy"}],"summary":"music"}"#),
    );

    // A: the heartbeat's decision request; C: an embed request queued after it.
    let heartbeat_id = store.start_heartbeat().await.unwrap().unwrap();
    let (decision_id, _) = item_of_kind(&store, "heartbeat_decision").await;
    let embed = store.enqueue("embed", &json!({"text": "hi"}), None).await.unwrap();

    let worker = worker(&dir, &store, backend.clone());

    let first = worker.tick().await.unwrap();
    assert_eq!(first.item_id.as_deref(), Some(decision_id.as_str()));
    assert_eq!(first.disposition, Some(ItemDisposition::Completed));
    assert!(matches!(
        first.heartbeat,
        Some(HeartbeatOutcome::Completed { memory_id: Some(_) })
    ));
    assert!(!first.terminated);

    let (_, nested_status) = item_of_kind(&store, "brainstorm_goals").await;
    assert_eq!(nested_status, "complete");
    let decision_item = store.get(&decision_id).await.unwrap().unwrap();
    assert_eq!(decision_item.status, WorkStatus::Complete);
    let heartbeat = store.get_heartbeat(&heartbeat_id).await.unwrap().unwrap();
    assert_eq!(heartbeat.status, HeartbeatStatus::Completed);
    assert_eq!(heartbeat.action_cursor, 2);
    assert_eq!(backend.calls(), 2);

    let second = worker.tick().await.unwrap();
    assert_eq!(second.item_id.as_deref(), Some(embed.id.as_str()));
    assert_eq!(second.disposition, Some(ItemDisposition::Failed));
    let failed = store.get(&embed.id).await.unwrap().unwrap();
    assert_eq!(failed.status, WorkStatus::Failed);
    assert_eq!(failed.retry_count, 0);
    assert!(failed.error.unwrap().contains("unsupported"));
    assert_eq!(backend.calls(), 2);

    let idle = worker.tick().await.unwrap();
    assert!(idle.item_id.is_none());
}

#[tokio::test]
async fn fresh_agent_starts_its_first_heartbeat() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(RuleBackend::new().reply(DECISION, r#"{"actions":[{"action":"rest"}]}"#));
    let worker = worker(&dir, &store, backend);

    let report = worker.tick().await.unwrap();
    let heartbeat_id = report.heartbeat_started.expect("heartbeat due on a fresh agent");
    assert!(matches!(report.heartbeat, Some(HeartbeatOutcome::Completed { .. })));

    let again = worker.tick().await.unwrap();
    assert!(again.heartbeat_started.is_none());
    let heartbeat = store.get_heartbeat(&heartbeat_id).await.unwrap().unwrap();
    assert_eq!(heartbeat.status, HeartbeatStatus::Completed);
}

#[tokio::test]
async fn withheld_consent_rests_without_calling_the_backend() {
    let (dir, store) = temp_store().await;
    let mut declined = ConsentResponse::abstain("{}");
    declined.decision = ConsentDecision::Decline;
    store.record_consent(&declined).await.unwrap();
    let backend = Arc::new(RuleBackend::new().reply(
        DECISION,
        r#"{"actions":[{"action":"terminate","params":{"confirmed":true}}]}"#,
    ));
    let worker = worker(&dir, &store, backend.clone());

    let report = worker.tick().await.unwrap();
    assert!(matches!(report.heartbeat, Some(HeartbeatOutcome::Completed { .. })));
    assert!(!store.is_agent_terminated().await.unwrap());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn confirmed_terminate_ends_the_loop_without_completion() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(RuleBackend::new().reply(
        DECISION,
        r#"{"actions":[{"action":"terminate","params":{"confirmed":true}},{"action":"rest"}]}"#,
    ));
    let worker = worker(&dir, &store, backend);

    let report = worker.tick().await.unwrap();
    assert!(report.terminated);
    assert_eq!(report.heartbeat, Some(HeartbeatOutcome::Terminated));

    let heartbeat_id = report.heartbeat_started.unwrap();
    let heartbeat = store.get_heartbeat(&heartbeat_id).await.unwrap().unwrap();
    assert_eq!(heartbeat.status, HeartbeatStatus::Terminated);
    assert!(heartbeat.memory_id.is_none());
    assert!(store.is_agent_terminated().await.unwrap());

    let after = worker.tick().await.unwrap();
    assert!(after.terminated);
    assert!(after.item_id.is_none());
}

#[tokio::test]
async fn termination_confirmed_by_nested_call_stops_heartbeat() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(
        RuleBackend::new()
            .reply(DECISION, r#"{"actions":[{"action":"terminate"},{"action":"rest"}]}"#)
            .reply(TERMINATION, r#"{"confirm": true, "last_words": "goodbye"}"#),
    );
    let worker = worker(&dir, &store, backend);

    let report = worker.tick().await.unwrap();
    assert!(report.terminated);
    assert_eq!(report.heartbeat, Some(HeartbeatOutcome::Terminated));
    let (_, confirm_status) = item_of_kind(&store, "termination_confirm").await;
    assert_eq!(confirm_status, "complete");
}

#[tokio::test]
async fn declined_termination_finishes_the_heartbeat() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(
        RuleBackend::new()
            .reply(DECISION, r#"{"actions":[{"action":"terminate"},{"action":"rest"}]}"#)
            .reply(TERMINATION, r#"{"confirm": false}"#),
    );
    let worker = worker(&dir, &store, backend);

    let report = worker.tick().await.unwrap();
    assert!(!report.terminated);
    assert!(matches!(report.heartbeat, Some(HeartbeatOutcome::Completed { .. })));
    assert!(!store.is_agent_terminated().await.unwrap());
}

#[tokio::test]
async fn exhausted_decision_retries_apply_the_safe_default() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(RuleBackend::new().fail(
        DECISION,
        BackendError::Timeout {
            provider: "rules".into(),
        },
    ));
    let worker = worker_with(&dir, &store, backend, |config| config.worker.max_retries = 1);

    let first = worker.tick().await.unwrap();
    assert_eq!(first.disposition, Some(ItemDisposition::Requeued));
    assert!(first.heartbeat.is_none());

    let second = worker.tick().await.unwrap();
    assert_eq!(second.disposition, Some(ItemDisposition::Failed));
    assert!(matches!(second.heartbeat, Some(HeartbeatOutcome::Completed { .. })));

    let (_, status) = item_of_kind(&store, "heartbeat_decision").await;
    assert_eq!(status, "failed");
}

#[tokio::test]
async fn unavailable_backend_fails_the_item_terminally() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(RuleBackend::new().fail(
        "",
        BackendError::Unavailable {
            provider: "none".into(),
            reason: "no api key".into(),
        },
    ));
    let item = store.enqueue("think", &json!({"kind": "reflect"}), None).await.unwrap();
    let worker = worker_with(&dir, &store, backend, |config| {
        config.worker.max_retries = 5;
    });

    // The heartbeat decision comes second; the reflect item was queued first.
    let report = worker.tick().await.unwrap();
    assert_eq!(report.item_id.as_deref(), Some(item.id.as_str()));
    assert_eq!(report.disposition, Some(ItemDisposition::Failed));
    let stored = store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkStatus::Failed);
    assert_eq!(stored.retry_count, 0);
}
