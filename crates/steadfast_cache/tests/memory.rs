// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the L1 memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use steadfast_cache::{CacheConfig, CacheStore, MemoryStore};

fn store(max_size: usize) -> MemoryStore<Value> {
    MemoryStore::new(CacheConfig::builder("test").max_size(max_size).build().unwrap())
}

#[tokio::test(start_paused = true)]
async fn round_trip_then_expiry() {
    let store = store(10);

    store.set("k", json!({"a": 1}), Duration::from_millis(1000));
    assert_eq!(store.get("k"), Some(json!({"a": 1})));

    tokio::time::advance(Duration::from_millis(1001)).await;

    assert_eq!(store.get("k"), None);
    assert!(store.peek("k").is_none(), "expired entry should be deleted by get");
}

#[tokio::test(start_paused = true)]
async fn entry_at_exact_ttl_is_still_fresh() {
    let store = store(10);
    store.set("k", json!(1), Duration::from_millis(1000));

    tokio::time::advance(Duration::from_millis(1000)).await;

    assert_eq!(store.get("k"), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn capacity_bound_holds_after_many_inserts() {
    let store = store(1000);

    for i in 0..1100 {
        store.set(format!("key-{i}"), json!(i), Duration::from_secs(300));
    }

    assert!(store.len() <= 1000);
    assert_eq!(store.len(), 1000);
    assert!(store.peek("key-0").is_none());
    assert!(store.peek("key-99").is_none());
    assert!(store.peek("key-100").is_some());
    assert!(store.peek("key-1099").is_some());
    assert_eq!(store.metrics().evictions, 100);
}

#[tokio::test(start_paused = true)]
async fn peek_returns_expired_entries_without_deleting() {
    let store = store(10);
    store.set("k", json!("stale"), Duration::from_secs(1));

    tokio::time::advance(Duration::from_secs(5)).await;

    let entry = store.peek("k").unwrap();
    assert!(entry.is_expired());
    assert_eq!(entry.value(), &json!("stale"));
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidate_removes_regardless_of_ttl() {
    let store = store(10);
    store.set("user:1", json!(1), Duration::from_secs(300));
    store.set("user:2", json!(2), Duration::from_secs(300));
    store.set("account:1", json!(3), Duration::from_secs(300));

    assert_eq!(store.invalidate("user:*").unwrap(), 2);
    assert_eq!(store.invalidate("account:1").unwrap(), 1);
    assert_eq!(store.invalidate("account:1").unwrap(), 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stats_describe_entries_in_insertion_order() {
    let store = store(10);
    store.set("a", json!(1), Duration::from_secs(1));
    tokio::time::advance(Duration::from_secs(2)).await;
    store.set("b", json!(2), Duration::from_secs(10));

    let stats = store.stats();

    assert_eq!(stats.size, 2);
    assert_eq!(stats.entries[0].key, "a");
    assert_eq!(stats.entries[0].age, Duration::from_secs(2));
    assert!(stats.entries[0].expired);
    assert_eq!(stats.entries[1].key, "b");
    assert_eq!(stats.entries[1].ttl, Duration::from_secs(10));
    assert!(!stats.entries[1].expired);
}

#[tokio::test(start_paused = true)]
async fn sweeper_removes_expired_entries() {
    let store = Arc::new(store(10));
    store.set("short", json!(1), Duration::from_secs(1));
    store.set("long", json!(2), Duration::from_secs(60));

    let sweeper = store.spawn_sweeper(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(store.keys(), ["long"]);

    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn hit_and_miss_counters() {
    let store = store(10);
    store.set("k", json!(1), Duration::from_secs(60));

    let _ = store.get("k");
    let _ = store.get("k");
    let _ = store.get("missing");

    let metrics = store.metrics();
    assert_eq!(metrics.hits, 2);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.writes, 1);
}

#[tokio::test(start_paused = true)]
async fn usable_through_store_trait() {
    async fn exercise<S: CacheStore<Value>>(store: &S) {
        store.set("k", json!("v"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await, Some(json!("v")));
        assert_eq!(store.peek("k").await.map(|entry| entry.into_value()), Some(json!("v")));
        assert_eq!(store.stats().size, 1);
        assert_eq!(store.invalidate("*").await.unwrap(), 1);
        assert_eq!(store.get("k").await, None);
    }

    exercise(&store(10)).await;
}

#[tokio::test(start_paused = true)]
async fn clear_removes_everything() {
    let store = store(10);
    store.set("a", json!(1), Duration::from_secs(60));
    store.set("b", json!(2), Duration::from_secs(60));

    assert_eq!(store.clear(), 2);
    assert!(store.is_empty());
    assert_eq!(store.metrics().memory_usage, 0);
}
