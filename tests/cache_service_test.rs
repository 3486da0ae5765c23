//! Behavioral tests for the cache facade

mod common;

use common::{init_test_logging, manager_over, service_over, test_config, FailureMode, FlakyStore};
use futures::future::join_all;
use hybrid_cache::cache::{BackendStore, CacheService};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Page {
    items: Vec<String>,
    total: u64,
    cursor: Option<String>,
}

#[tokio::test]
async fn test_set_then_get_returns_same_value() {
    init_test_logging();
    let (cache, _, _) = service_over(test_config());

    let values = [
        json!(null),
        json!(true),
        json!(-42),
        json!(3.5),
        json!("olá, mundo"),
        json!([1, "two", {"three": 3}]),
        json!({"a": 1, "nested": {"b": [true, false]}}),
    ];
    for (i, value) in values.iter().enumerate() {
        let key = format!("p1:{i}");
        cache.set(&key, value, None).await;
        assert_eq!(cache.get::<serde_json::Value>(&key).await.as_ref(), Some(value));
    }

    let page = Page {
        items: vec!["Ana".into(), "Bruno".into()],
        total: 2,
        cursor: None,
    };
    cache.set("alunos:page:1:limit:50:sort:nome", &page, Some(Duration::from_secs(60))).await;
    assert_eq!(
        cache.get::<Page>("alunos:page:1:limit:50:sort:nome").await,
        Some(page)
    );
}

#[tokio::test(start_paused = true)]
async fn test_get_of_unset_or_expired_key_is_none() {
    let (cache, _, _) = service_over(test_config());

    assert_eq!(cache.get::<String>("never-set").await, None);

    cache.set("short", &"lived", Some(Duration::from_secs(1))).await;
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get::<String>("short").await, None);
}

async fn assert_sentinels(cache: &CacheService) {
    cache.set("k", &"v", None).await;
    assert_eq!(cache.get::<String>("k").await, None);
    cache.delete("k").await;
    assert_eq!(cache.invalidate("k*").await, 0);
    assert_eq!(cache.increment("counter", 1).await, 0);
    assert!(!cache.exists("k").await);
    assert_eq!(cache.ttl("k").await, -1);
    assert!(!cache.expire("k", Duration::from_secs(5)).await);
    cache.set_many(vec![("a", 1, None)]).await;
    assert_eq!(cache.get_many::<i32, _>(&["a", "b"]).await, vec![None, None]);
    cache.flush().await;
}

#[tokio::test]
async fn test_operations_never_fail_when_backends_reject_calls() {
    let local = FlakyStore::with_mode(FailureMode::RejectOperations);
    let cloud = FlakyStore::with_mode(FailureMode::RejectOperations);
    let cache = CacheService::new(manager_over(test_config(), &local, &cloud));

    assert_sentinels(&cache).await;
    assert!(cache.stats().errors > 0);
}

#[tokio::test]
async fn test_operations_never_fail_when_backends_are_unreachable() {
    let local = FlakyStore::with_mode(FailureMode::RejectConnections);
    let cloud = FlakyStore::with_mode(FailureMode::RejectConnections);
    let cache = CacheService::new(manager_over(test_config(), &local, &cloud));

    assert_sentinels(&cache).await;
    assert!(!cache.is_available());
}

#[tokio::test]
async fn test_operations_never_fail_when_backends_drop_mid_flight() {
    let (cache, local, cloud) = service_over(test_config());
    cache.set("warm", &1, None).await;

    local.set_mode(FailureMode::RejectConnections);
    cloud.set_mode(FailureMode::RejectConnections);

    assert_sentinels(&cache).await;
    assert!(!cache.is_available());
}

#[tokio::test]
async fn test_availability_gate_skips_backend_calls() {
    let local = FlakyStore::with_mode(FailureMode::RejectConnections);
    let cloud = FlakyStore::with_mode(FailureMode::RejectConnections);
    let cache = CacheService::new(manager_over(test_config(), &local, &cloud));

    assert_eq!(cache.get::<String>("k").await, None);
    cache.set("k", &"v", None).await;

    assert_eq!(local.operations(), 0);
    assert_eq!(cloud.operations(), 0);
    assert_eq!(cache.stats().skipped, 2);
}

#[tokio::test]
async fn test_set_survives_local_failure_and_reads_back_from_cloud() {
    let (cache, local, cloud) = service_over(test_config());
    local.set_mode(FailureMode::RejectOperations);

    cache.set("k", &json!({"v": 1}), None).await;

    assert!(cloud.data().get("k").await.unwrap().is_some());
    assert_eq!(cache.get::<serde_json::Value>("k").await, Some(json!({"v": 1})));
}

#[tokio::test]
async fn test_invalidate_removes_only_matching_keys() {
    let (cache, local, cloud) = service_over(test_config());

    cache.set("alunos:1", &"a", None).await;
    cache.set("alunos:2", &"b", None).await;
    cache.set("outro:1", &"c", None).await;

    assert_eq!(cache.invalidate("alunos:*").await, 2);

    assert_eq!(cache.get::<String>("alunos:1").await, None);
    assert_eq!(cache.get::<String>("alunos:2").await, None);
    assert_eq!(cache.get::<String>("outro:1").await.as_deref(), Some("c"));
    // dual-mode deletes reach both copies
    assert!(!local.data().exists("alunos:1").await.unwrap());
    assert!(!cloud.data().exists("alunos:1").await.unwrap());
}

#[tokio::test]
async fn test_invalidate_with_failed_scan_is_noop() {
    let (cache, local, cloud) = service_over(test_config());
    cache.set("alunos:1", &"a", None).await;

    local.set_mode(FailureMode::RejectOperations);
    cloud.set_mode(FailureMode::RejectOperations);
    assert_eq!(cache.invalidate("alunos:*").await, 0);

    assert!(local.data().exists("alunos:1").await.unwrap());
}

#[tokio::test]
async fn test_get_or_set_fetches_once_then_serves_cache() {
    let (cache, _, _) = service_over(test_config());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let value: Result<Page, Infallible> = cache
            .get_or_set(
                "x",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Page {
                        items: vec!["from-db".into()],
                        total: 1,
                        cursor: Some("next".into()),
                    })
                },
                Some(Duration::from_secs(60)),
            )
            .await;
        assert_eq!(value.unwrap().total, 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().fetches, 1);
    assert!(cache.ttl("x").await <= 60);
}

/// Concurrent cold misses are not coalesced: every caller may run its own
/// fetch. The count is bounded by the number of callers and every caller
/// gets a value.
#[tokio::test]
async fn test_concurrent_get_or_set_may_fetch_more_than_once() {
    let (cache, _, _) = service_over(test_config());
    let calls = Arc::new(AtomicUsize::new(0));

    let results = join_all((0..10).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            cache
                .get_or_set(
                    "y",
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, Infallible>(42u32)
                    },
                    None,
                )
                .await
        }
    }))
    .await;

    let fetches = calls.load(Ordering::SeqCst);
    assert!((1..=10).contains(&fetches), "fetch ran {fetches} times");
    assert!(results.into_iter().all(|r| r == Ok(42)));
    assert_eq!(cache.get::<u32>("y").await, Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_ttl_is_stored_without_expiry() {
    let (cache, _, _) = service_over(test_config());

    cache.set("config:global", &json!({"tema": "escuro"}), Some(Duration::MAX)).await;
    assert!(cache.expire("config:global", Duration::MAX).await);
    tokio::time::advance(Duration::from_secs(3600)).await;

    assert_eq!(
        cache.get::<serde_json::Value>("config:global").await,
        Some(json!({"tema": "escuro"}))
    );
    assert_eq!(cache.ttl("config:global").await, -1);
    assert_eq!(cache.stats().errors, 0);
}

#[tokio::test]
async fn test_delete_of_absent_key_is_fine() {
    let (cache, _, _) = service_over(test_config());

    cache.delete("ghost").await;
    cache.delete("ghost").await;

    assert_eq!(cache.stats().errors, 0);
    assert!(!cache.exists("ghost").await);
}

#[tokio::test(start_paused = true)]
async fn test_value_expires_after_its_ttl() {
    let (cache, _, _) = service_over(test_config());

    cache.set("s:1", &json!({"a": 1}), Some(Duration::from_secs(5))).await;
    assert_eq!(cache.get::<serde_json::Value>("s:1").await, Some(json!({"a": 1})));

    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(cache.get::<serde_json::Value>("s:1").await, None);
    assert_eq!(cache.ttl("s:1").await, -2);
}

#[tokio::test]
async fn test_read_falls_back_to_cloud_when_local_is_disconnected() {
    let local = FlakyStore::with_mode(FailureMode::RejectConnections);
    let cloud = FlakyStore::new();
    cloud
        .data()
        .set("k", &serde_json::to_string("cloud-value").unwrap(), None)
        .await
        .unwrap();
    let cache = CacheService::new(manager_over(test_config(), &local, &cloud));

    assert_eq!(cache.get::<String>("k").await.as_deref(), Some("cloud-value"));
    assert!(!cache.manager().get_health().local.connected);
    assert_eq!(local.operations(), 0);
}

#[tokio::test]
async fn test_counters_follow_dual_write() {
    let (cache, local, cloud) = service_over(test_config());

    assert_eq!(cache.increment("rate:1.2.3.4", 1).await, 1);
    assert_eq!(cache.increment("rate:1.2.3.4", 1).await, 2);
    assert!(cache.expire("rate:1.2.3.4", Duration::from_secs(60)).await);

    assert_eq!(local.data().get("rate:1.2.3.4").await.unwrap(), Some("2".into()));
    assert_eq!(cloud.data().get("rate:1.2.3.4").await.unwrap(), Some("2".into()));
}

#[tokio::test]
async fn test_get_many_fills_from_both_backends() {
    let (cache, local, cloud) = service_over(test_config());
    cache.set_many(vec![("m:1", "one", None), ("m:2", "two", None)]).await;
    local.data().del("m:2").await.unwrap();
    cloud.data().del("m:1").await.unwrap();

    let values: Vec<Option<String>> = cache.get_many(&["m:1", "m:2", "m:3"]).await;

    assert_eq!(
        values,
        vec![Some("one".to_string()), Some("two".to_string()), None]
    );
}
