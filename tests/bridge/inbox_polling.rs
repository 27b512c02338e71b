use std::sync::Arc;

use cortexd::broker::{self, InboxBridge};
use cortexd::store::SqliteStore;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::bridge_config;

async fn mount_inbox(server: &MockServer, deliveries: serde_json::Value, fetches: u64) {
    Mock::given(method("PUT"))
        .and(path("/api/queues/%2F/cortexd.inbox"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/queues/%2F/cortexd.inbox/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deliveries))
        .expect(fetches)
        .mount(server)
        .await;
}

#[tokio::test]
async fn polls_within_the_interval_fetch_once() {
    let server = MockServer::start().await;
    mount_inbox(
        &server,
        json!([
            {"payload": "{\"text\":\"are you there?\"}", "payload_encoding": "string", "properties": {"message_id": "in-1"}},
            {"payload": "plain words", "payload_encoding": "string", "properties": {}}
        ]),
        1,
    )
    .await;

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = bridge_config(&server);
    let inbox = InboxBridge::new(store.clone(), broker::connect(&config), &config);

    assert_eq!(inbox.poll(10).await.unwrap(), 2);
    assert_eq!(inbox.poll(10).await.unwrap(), 0);

    let contents: Vec<String> = sqlx::query_scalar(
        "SELECT content FROM memories WHERE kind = 'inbound_message' ORDER BY created_at",
    )
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert_eq!(contents.len(), 2);
    assert!(contents.iter().any(|c| c == "are you there?"));

    let last_contact: Option<String> =
        sqlx::query_scalar("SELECT last_contact_at FROM agent_state WHERE id = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert!(last_contact.is_some());
}

#[tokio::test]
async fn fetch_failure_ingests_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/queues/%2F/cortexd.inbox"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/queues/%2F/cortexd.inbox/get"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = bridge_config(&server);
    let inbox = InboxBridge::new(store.clone(), broker::connect(&config), &config);
    assert_eq!(inbox.poll(10).await.unwrap(), 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn empty_queue_is_quiet() {
    let server = MockServer::start().await;
    mount_inbox(&server, json!([]), 1).await;

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = bridge_config(&server);
    let inbox = InboxBridge::new(store, broker::connect(&config), &config);
    assert_eq!(inbox.poll(10).await.unwrap(), 0);
}

#[tokio::test]
async fn undecodable_delivery_keeps_earlier_messages() {
    let server = MockServer::start().await;
    mount_inbox(
        &server,
        json!([
            {"payload": "good one", "payload_encoding": "string", "properties": {}},
            {"payload": "!!!not base64!!!", "payload_encoding": "base64", "properties": {}},
            {"payload": "after the bad one", "payload_encoding": "string", "properties": {}}
        ]),
        1,
    )
    .await;

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = bridge_config(&server);
    let inbox = InboxBridge::new(store.clone(), broker::connect(&config), &config);
    assert_eq!(inbox.poll(10).await.unwrap(), 1);

    let contents: Vec<String> =
        sqlx::query_scalar("SELECT content FROM memories WHERE kind = 'inbound_message'")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(contents, vec!["good one".to_string()]);
}
