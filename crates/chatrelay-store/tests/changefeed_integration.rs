//! Integration tests for live change feeds.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_store::{Direction, Query, Store};
use serde_json::json;

async fn next_change(feed: &mut chatrelay_store::ChangeFeed) -> chatrelay_store::Change {
    tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("timed out waiting for change")
        .expect("feed ended")
}

#[tokio::test]
async fn test_initial_snapshot_then_live_inserts() {
    let store = Store::temporary().unwrap();
    store.insert("channel", json!({"name": "lobby"})).unwrap();

    let mut feed = store
        .changes(Query::table("channel").include_initial(true))
        .unwrap();

    let initial = next_change(&mut feed).await;
    assert!(initial.old_val.is_none());
    assert_eq!(initial.new_val.unwrap()["name"], "lobby");

    store.insert("channel", json!({"name": "general"})).unwrap();
    let live = next_change(&mut feed).await;
    assert_eq!(live.new_val.unwrap()["name"], "general");
}

#[tokio::test]
async fn test_update_and_delete_pairs() {
    let store = Store::temporary().unwrap();
    let id = store.insert("user", json!({"name": "anonymous"})).unwrap();
    let mut feed = store.changes(Query::table("user")).unwrap();

    store.update("user", &id, json!({"name": "ann"})).unwrap();
    let edit = next_change(&mut feed).await;
    assert_eq!(edit.old_val.unwrap()["name"], "anonymous");
    assert_eq!(edit.new_val.unwrap()["name"], "ann");

    store.delete("user", &id).unwrap();
    let removal = next_change(&mut feed).await;
    assert_eq!(removal.old_val.unwrap()["name"], "ann");
    assert!(removal.new_val.is_none());
}

#[tokio::test]
async fn test_unchanged_update_is_silent() {
    let store = Store::temporary().unwrap();
    let id = store.insert("user", json!({"name": "ann"})).unwrap();
    let mut feed = store.changes(Query::table("user")).unwrap();

    store.update("user", &id, json!({"name": "ann"})).unwrap();
    store.insert("user", json!({"name": "bob"})).unwrap();

    let change = next_change(&mut feed).await;
    assert_eq!(change.new_val.unwrap()["name"], "bob");
}

#[tokio::test]
async fn test_filtered_snapshot_is_ordered_descending() {
    let store = Store::temporary().unwrap();
    store
        .insert("message", json!({"channelId": "42", "body": "first", "createdAt": 1}))
        .unwrap();
    store
        .insert("message", json!({"channelId": "42", "body": "second", "createdAt": 2}))
        .unwrap();
    store
        .insert("message", json!({"channelId": "7", "body": "other", "createdAt": 3}))
        .unwrap();

    let mut feed = store
        .changes(
            Query::table("message")
                .filter_eq("channelId", "42")
                .order_by("createdAt", Direction::Desc)
                .include_initial(true),
        )
        .unwrap();

    assert_eq!(next_change(&mut feed).await.new_val.unwrap()["body"], "second");
    assert_eq!(next_change(&mut feed).await.new_val.unwrap()["body"], "first");

    store
        .insert("message", json!({"channelId": "7", "body": "skip", "createdAt": 4}))
        .unwrap();
    store
        .insert("message", json!({"channelId": "42", "body": "third", "createdAt": 5}))
        .unwrap();
    assert_eq!(next_change(&mut feed).await.new_val.unwrap()["body"], "third");
}

#[tokio::test]
async fn test_concurrent_writers_are_seen_once() {
    let store = Arc::new(Store::temporary().unwrap());
    let mut feed = store
        .changes(Query::table("channel").include_initial(true))
        .unwrap();

    let mut writers = Vec::new();
    for writer in 0..4 {
        let store = store.clone();
        writers.push(tokio::spawn(async move {
            for n in 0..25 {
                store
                    .insert("channel", json!({"name": format!("w{writer}-{n}")}))
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let change = next_change(&mut feed).await;
        let id = change.new_val.unwrap()["id"].as_str().unwrap().to_string();
        assert!(seen.insert(id), "change delivered twice");
    }
}

#[tokio::test]
async fn test_close_releases_feed() {
    let store = Store::temporary().unwrap();
    let feed = store.changes(Query::table("channel")).unwrap();
    let other = store.changes(Query::table("user")).unwrap();
    assert_eq!(store.active_feeds(), 2);

    feed.close();
    assert_eq!(store.active_feeds(), 1);

    drop(other);
    assert_eq!(store.active_feeds(), 0);
}

#[tokio::test]
async fn test_close_feeds_ends_streams() {
    let store = Store::temporary().unwrap();
    let mut feed = store.changes(Query::table("channel")).unwrap();

    store.close_feeds();
    assert_eq!(store.active_feeds(), 0);
    assert!(feed.next().await.is_none());
}
