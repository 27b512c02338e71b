use std::sync::Arc;
use std::time::Duration;

use cortexd::consent::{ConsentDecision, ConsentResponse};
use cortexd::queue::WorkStatus;
use cortexd::store::{ConsentStore, MessageStore, SqliteStore, WorkQueue};
use cortexd::worker::{MaintenanceWorker, WorkerDeps};
use serde_json::json;
use tempfile::TempDir;

use super::worker_harness::{
    RuleBackend, SUBCONSCIOUS, grant_consent, slot_and_gate, temp_store, test_config,
};

fn worker(
    dir: &TempDir,
    store: &Arc<SqliteStore>,
    backend: Arc<RuleBackend>,
    tweak: impl FnOnce(&mut cortexd::Config),
) -> MaintenanceWorker {
    let mut config = test_config(dir);
    tweak(&mut config);
    let (slot, gate) = slot_and_gate(store, backend);
    MaintenanceWorker::new(WorkerDeps::sqlite(store), slot, gate, None, &config)
}

async fn memory_count(store: &SqliteStore, kind: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE kind = $1")
        .bind(kind)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn abandoned_claim_is_reaped_back_to_pending() {
    let (dir, store) = temp_store().await;
    let item = store.enqueue("think", &json!({"kind": "reflect"}), None).await.unwrap();
    store.claim().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let worker = worker(&dir, &store, Arc::new(RuleBackend::new()), |config| {
        config.maintenance.stale_claim_secs = 0;
        config.maintenance.subconscious_enabled = false;
    });
    let report = worker.tick().await.unwrap();

    let summary = report.maintenance.unwrap();
    assert_eq!(summary["reaped"], json!(1));
    let reaped = store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(reaped.status, WorkStatus::Pending);
    assert_eq!(reaped.retry_count, 1);
    assert_eq!(reaped.error.as_deref(), Some("claim expired"));
}

#[tokio::test]
async fn maintenance_waits_for_its_interval() {
    let (dir, store) = temp_store().await;
    let worker = worker(&dir, &store, Arc::new(RuleBackend::new()), |config| {
        config.maintenance.subconscious_enabled = false;
    });

    assert!(worker.tick().await.unwrap().maintenance.is_some());
    let second = worker.tick().await.unwrap();
    assert!(second.maintenance.is_none());
    assert!(second.observations.is_none());
}

#[tokio::test]
async fn subconscious_pass_records_observations() {
    let (dir, store) = temp_store().await;
    grant_consent(&store).await;
    let backend = Arc::new(RuleBackend::new().reply(
        SUBCONSCIOUS,
        r#"{"observations": ["the user has been quiet", {"content": "energy is full"}, ""]}"#,
    ));
    let worker = worker(&dir, &store, backend.clone(), |_| {});

    let report = worker.tick().await.unwrap();
    assert_eq!(report.observations, Some(2));
    assert_eq!(memory_count(&store, "observation").await, 2);
    assert_eq!(backend.calls(), 1);

    // Stamped; not due again within the interval.
    let again = worker.tick().await.unwrap();
    assert!(again.observations.is_none());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn declined_consent_still_stamps_the_subconscious_run() {
    let (dir, store) = temp_store().await;
    let mut declined = ConsentResponse::abstain("{}");
    declined.decision = ConsentDecision::Decline;
    store.record_consent(&declined).await.unwrap();
    let backend = Arc::new(RuleBackend::new());
    let worker = worker(&dir, &store, backend.clone(), |_| {});

    assert_eq!(worker.tick().await.unwrap().observations, Some(0));
    assert_eq!(backend.calls(), 0);
    assert!(worker.tick().await.unwrap().observations.is_none());
}

#[tokio::test]
async fn bridges_without_a_broker_do_nothing() {
    let (dir, store) = temp_store().await;
    store.enqueue_outbox("note", &json!({"text": "hi"})).await.unwrap();
    let worker = worker(&dir, &store, Arc::new(RuleBackend::new()), |config| {
        config.maintenance.subconscious_enabled = false;
    });

    let report = worker.tick().await.unwrap();
    assert_eq!(report.outbox_sent, 0);
    assert_eq!(report.inbox_ingested, 0);
    assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn terminated_agent_skips_housekeeping() {
    let (dir, store) = temp_store().await;
    sqlx::query("UPDATE agent_state SET terminated = 1 WHERE id = 1")
        .execute(store.pool())
        .await
        .unwrap();
    let worker = worker(&dir, &store, Arc::new(RuleBackend::new()), |_| {});

    let report = worker.tick().await.unwrap();
    assert!(report.terminated);
    assert!(report.maintenance.is_none());
}
