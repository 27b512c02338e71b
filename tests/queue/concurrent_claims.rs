use std::collections::HashSet;

use cortexd::store::WorkQueue;
use serde_json::json;

use super::worker_harness::temp_store;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_an_item() {
    let (_dir, store) = temp_store().await;
    let total = 40;
    for n in 0..total {
        store
            .enqueue("think", &json!({ "kind": "reflect", "n": n }), None)
            .await
            .unwrap();
    }

    let mut claimers = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        claimers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = store.claim().await.unwrap() {
                claimed.push(item.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for claimer in claimers {
        all.extend(claimer.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), total);
    assert_eq!(unique.len(), total);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.processing, total);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn claim_takes_oldest_first() {
    let (_dir, store) = temp_store().await;
    let first = store.enqueue("think", &json!({"kind": "reflect"}), None).await.unwrap();
    let second = store.enqueue("embed", &json!({}), None).await.unwrap();

    assert_eq!(store.claim().await.unwrap().unwrap().id, first.id);
    assert_eq!(store.claim().await.unwrap().unwrap().id, second.id);
    assert!(store.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn completed_item_is_never_claimed_again() {
    let (_dir, store) = temp_store().await;
    store.enqueue("think", &json!({"kind": "reflect"}), None).await.unwrap();
    let item = store.claim().await.unwrap().unwrap();
    assert!(store.complete(&item.id, &json!({"ok": true})).await.unwrap());

    assert!(store.claim().await.unwrap().is_none());
    assert!(store.claim_by_id(&item.id).await.unwrap().is_none());
    let stored = store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.output, Some(json!({"ok": true})));
    assert!(stored.completed_at.is_some());
}
