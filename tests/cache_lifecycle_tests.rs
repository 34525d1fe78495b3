//! Integration tests for the cache store and the loader
//!
//! These tests verify:
//! - Round-trips of set/get and delete/get
//! - Prune veto semantics, including guards
//! - Bulk invalidation
//! - Hydration from a serialized snapshot
//! - GraphQL results, including error-shaped ones, flowing through loads

use parking_lot::Mutex;
use request_cache::{
    Cache, CacheConfig, CacheError, CacheEventKind, CacheSnapshot, ClientErrorCode, GraphQLError,
    GraphQLOperation, GraphQLResult, InvalidationReason, LoadSource, Loader, PendingLoad,
    PruneOutcome, PrunePrevention,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn count_events(cache: &Cache<String>, key: &str, kind: CacheEventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    cache
        .subscribe(key, kind, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    count
}

#[test]
fn test_set_and_delete_round_trip() {
    let cache = Cache::new(CacheConfig::default());

    cache.set("k", "v".to_string()).unwrap();
    assert_eq!(cache.get("k"), Some("v".to_string()));

    cache.delete("k").unwrap();
    assert_eq!(cache.get("k"), None);
}

#[test]
fn test_prune_vetoed_by_any_subscriber() {
    let cache = Cache::new(CacheConfig::default());
    let deletes = count_events(&cache, "k", CacheEventKind::Delete);

    // One passive subscriber, one vetoing subscriber
    count_events(&cache, "k", CacheEventKind::Prune);
    cache
        .subscribe("k", CacheEventKind::Prune, |n| n.prevent_default())
        .unwrap();

    cache.set("k", "v".to_string()).unwrap();
    assert_eq!(cache.prune("k").unwrap(), PruneOutcome::Vetoed);

    assert_eq!(cache.get("k"), Some("v".to_string()));
    assert_eq!(deletes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_prune_without_veto_deletes_exactly_once() {
    let cache = Cache::new(CacheConfig::default());
    let deletes = count_events(&cache, "k", CacheEventKind::Delete);
    let prunes = count_events(&cache, "k", CacheEventKind::Prune);

    cache.set("k", "v".to_string()).unwrap();
    assert_eq!(cache.prune("k").unwrap(), PruneOutcome::Deleted);
    assert_eq!(cache.prune("k").unwrap(), PruneOutcome::Absent);

    assert_eq!(cache.get("k"), None);
    assert_eq!(prunes.load(Ordering::SeqCst), 1);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_prune_prevention_guard_scopes_veto() {
    let cache = Cache::new(CacheConfig::default());
    cache.set("session", "token".to_string()).unwrap();
    cache.set("page:1", "html".to_string()).unwrap();

    {
        let _mounted = PrunePrevention::new(&cache, "session").unwrap();
        let event = cache.prune_all();

        assert_eq!(event.reason, InvalidationReason::Pruned);
        assert_eq!(event.keys, vec!["page:1".to_string()]);
        assert_eq!(event.vetoed, vec!["session".to_string()]);
    }

    let event = cache.prune_all();
    assert_eq!(event.keys, vec!["session".to_string()]);
    assert!(cache.is_empty());
}

#[test]
fn test_logout_style_bulk_invalidation() {
    let cache = Cache::new(CacheConfig::default());
    for key in ["me", "user:1", "user:2", "public:home"] {
        cache.set(key, key.to_uppercase()).unwrap();
    }
    let stales = count_events(&cache, "public:home", CacheEventKind::Stale);

    let deleted = cache.delete_matching(|key| !key.starts_with("public:"));
    assert_eq!(deleted.len(), 3);

    let staled = cache.stale_all();
    assert_eq!(staled.keys, vec!["public:home".to_string()]);
    assert_eq!(stales.load(Ordering::SeqCst), 1);
    assert_eq!(cache.keys(), vec!["public:home".to_string()]);
}

#[test]
fn test_stale_on_absent_key_is_not_found() {
    let cache: Cache<String> = Cache::new(CacheConfig::default());
    assert!(matches!(cache.stale("nope"), Err(CacheError::NotFound { .. })));
}

#[test]
fn test_listener_deleting_during_bulk_stale() {
    let cache = Cache::new(CacheConfig::default());
    cache.set("a", "A".to_string()).unwrap();
    cache.set("b", "B".to_string()).unwrap();

    let handle = cache.clone();
    cache
        .subscribe("a", CacheEventKind::Stale, move |_| {
            handle.delete("b").unwrap();
        })
        .unwrap();

    let event = cache.stale_all();
    assert_eq!(event.keys, vec!["a".to_string()]);
    assert_eq!(cache.keys(), vec!["a".to_string()]);
}

#[test]
fn test_hydration_from_server_snapshot() {
    let server = Cache::new(CacheConfig::default());
    server
        .set("graphql:Home?hash=1", GraphQLResult::data(json!({ "title": "Home" })))
        .unwrap();
    let payload = server.snapshot().to_json().unwrap();

    let client: Cache<GraphQLResult> = Cache::from_snapshot(
        CacheConfig::default(),
        CacheSnapshot::from_json(&payload).unwrap(),
    )
    .unwrap();

    let value = client.get("graphql:Home?hash=1").unwrap();
    assert!(value.is_ok());
    assert_eq!(value.data, Some(json!({ "title": "Home" })));
}

/// A fake transport that answers after a delay, honouring cancellation
struct FakeTransport {
    delay: Duration,
    requests: AtomicUsize,
}

impl LoadSource<GraphQLResult> for FakeTransport {
    fn begin(&self, key: &str) -> PendingLoad<GraphQLResult> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let delay = self.delay;
        let key = key.to_string();

        PendingLoad::new(
            async move {
                tokio::select! {
                    _ = token.cancelled() => GraphQLResult::cancelled(),
                    _ = tokio::time::sleep(delay) => {
                        if key.contains("Broken") {
                            GraphQLResult::error(GraphQLError::client(
                                ClientErrorCode::ResponseHttpStatus,
                                "HTTP 500",
                            ))
                        } else {
                            GraphQLResult::data(json!({ "key": key }))
                        }
                    }
                }
            },
            cancellation,
        )
    }
}

#[tokio::test]
async fn test_error_shaped_results_are_cached_like_values() {
    let loader = Loader::new(CacheConfig::default()).unwrap();
    let transport = FakeTransport {
        delay: Duration::from_millis(5),
        requests: AtomicUsize::new(0),
    };

    let key = GraphQLOperation::new("{ boom }").with_operation_name("Broken").cache_key();
    let result = loader.load(&key, &transport).unwrap().outcome().await.unwrap();

    assert!(result.has_client_error());
    assert_eq!(loader.cache().get(&key), Some(result));
}

#[tokio::test]
async fn test_abort_discards_and_work_observes_cancellation() {
    let loader = Loader::new(CacheConfig::default()).unwrap();
    let transport = FakeTransport {
        delay: Duration::from_secs(60),
        requests: AtomicUsize::new(0),
    };

    let key = GraphQLOperation::new("{ slow }").cache_key();
    let load = loader.load(&key, &transport).unwrap();
    assert_eq!(loader.abort(&key), 1);

    let settled = tokio::time::timeout(Duration::from_secs(1), load.outcome())
        .await
        .expect("work observes cancellation")
        .unwrap();

    assert_eq!(settled, GraphQLResult::cancelled());
    assert!(!loader.cache().contains_key(&key));
    assert!(!loader.loading().is_loading(&key));
}

#[tokio::test]
async fn test_loader_events_seen_by_subscribers() {
    let loader = Loader::new(CacheConfig::default()).unwrap();
    let transport = FakeTransport {
        delay: Duration::from_millis(1),
        requests: AtomicUsize::new(0),
    };
    let key = GraphQLOperation::new("{ me { id } }").cache_key();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    loader
        .cache()
        .subscribe(&key, CacheEventKind::Set, move |n| {
            sink.lock().push(n.payload().value().cloned());
        })
        .unwrap();

    loader.load(&key, &transport).unwrap().outcome().await.unwrap();
    loader.load_if_absent(&key, &transport).unwrap();

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
}
