use std::sync::Arc;

use cortexd::broker::{self, OutboxBridge, OutboxStatus};
use cortexd::config::BridgeConfig;
use cortexd::store::{MessageStore, SqliteStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::bridge_config;

const PUBLISH: &str = "/api/exchanges/%2F/amq.default/publish";

async fn mount_declare(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/api/queues/%2F/cortexd.outbox"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(server)
        .await;
}

async fn status_of(store: &SqliteStore, id: &str) -> (String, Option<String>) {
    sqlx::query_as("SELECT status, error FROM outbox_messages WHERE id = $1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn unrouted_message_fails_and_stops_the_batch() {
    let server = MockServer::start().await;
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut ids = Vec::new();
    for n in 1..=3 {
        let message = store
            .enqueue_outbox("note", &json!({ "n": n }))
            .await
            .unwrap();
        ids.push(message.id);
    }

    mount_declare(&server).await;
    Mock::given(method("POST"))
        .and(path(PUBLISH))
        .and(body_partial_json(json!({"properties": {"message_id": ids[1]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": false})))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PUBLISH))
        .and(body_partial_json(json!({"properties": {"message_id": ids[2]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": true})))
        .with_priority(1)
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PUBLISH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker::connect(&bridge_config(&server));
    assert!(broker.is_some());
    let outbox = OutboxBridge::new(store.clone(), broker, &bridge_config(&server));

    assert_eq!(outbox.publish(10).await.unwrap(), 1);

    assert_eq!(status_of(&store, &ids[0]).await.0, OutboxStatus::Sent.to_string());
    let (status, error) = status_of(&store, &ids[1]).await;
    assert_eq!(status, OutboxStatus::Failed.to_string());
    assert!(error.unwrap().contains("not routed"));
    assert_eq!(status_of(&store, &ids[2]).await.0, OutboxStatus::Pending.to_string());

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[2]);
}

#[tokio::test]
async fn broker_outage_marks_the_head_message_failed() {
    let server = MockServer::start().await;
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let first = store.enqueue_outbox("note", &json!({})).await.unwrap();
    store.enqueue_outbox("note", &json!({})).await.unwrap();

    mount_declare(&server).await;
    Mock::given(method("POST"))
        .and(path(PUBLISH))
        .respond_with(ResponseTemplate::new(503).set_body_string("node down"))
        .expect(1)
        .mount(&server)
        .await;

    let config = bridge_config(&server);
    let outbox = OutboxBridge::new(store.clone(), broker::connect(&config), &config);
    assert_eq!(outbox.publish(10).await.unwrap(), 0);

    let (status, error) = status_of(&store, &first.id).await;
    assert_eq!(status, OutboxStatus::Failed.to_string());
    assert!(error.unwrap().contains("503"));
    assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_declaration_is_retried_next_tick() {
    let server = MockServer::start().await;
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.enqueue_outbox("note", &json!({})).await.unwrap();

    Mock::given(method("PUT"))
        .and(path("/api/queues/%2F/cortexd.outbox"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_declare(&server).await;
    Mock::given(method("POST"))
        .and(path(PUBLISH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let config = bridge_config(&server);
    let outbox = OutboxBridge::new(store.clone(), broker::connect(&config), &config);
    assert_eq!(outbox.publish(10).await.unwrap(), 0);
    assert_eq!(outbox.publish(10).await.unwrap(), 1);
    // Declared once; no further PUTs.
    assert_eq!(outbox.publish(10).await.unwrap(), 0);
}

#[tokio::test]
async fn disabled_bridge_leaves_messages_pending() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.enqueue_outbox("note", &json!({})).await.unwrap();

    let config = BridgeConfig {
        management_url: Some("http://127.0.0.1:9".into()),
        ..BridgeConfig::default()
    };
    let broker = broker::connect(&config);
    assert!(broker.is_none());

    let outbox = OutboxBridge::new(store.clone(), broker, &config);
    assert_eq!(outbox.publish(10).await.unwrap(), 0);
    assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
}
