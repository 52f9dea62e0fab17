use carelink_resilience::cache::{read_key, search_key, type_prefixes};
use carelink_resilience::{CacheConfig, ResponseCache};
use serde_json::json;
use std::time::Duration;

fn small_cache(max_entries: usize) -> ResponseCache {
    ResponseCache::new(CacheConfig {
        max_entries,
        ..CacheConfig::default()
    })
}

// ── Lookup and TTL ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn hit_then_expire() {
    let cache = ResponseCache::default();
    cache.put("read:Patient/1", json!({"id": "1"}), None).await;

    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(cache.get("read:Patient/1").await, Some(json!({"id": "1"})));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("read:Patient/1").await, None);
    // Expired entries are removed on lookup.
    assert_eq!(cache.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn ttl_override_applies() {
    let cache = ResponseCache::default();
    cache
        .put("search:Patient?", json!([]), Some(cache.search_ttl()))
        .await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.get("search:Patient?").await.is_none());
}

#[tokio::test]
async fn disabled_cache_never_stores() {
    let cache = ResponseCache::new(CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    });
    cache.put("k", json!(1), None).await;
    assert!(cache.get("k").await.is_none());
    assert!(cache.is_empty().await);
    assert_eq!(cache.stats().await.misses, 1);
}

// ── Eviction ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn full_cache_evicts_oldest_tenth() {
    let cache = small_cache(20);
    for i in 0..20 {
        cache.put(format!("k{i}"), json!(i), None).await;
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.len().await, 20);

    cache.put("new", json!("new"), None).await;

    // 10% of 20 = 2 oldest evicted, then the new entry inserted.
    assert_eq!(cache.len().await, 19);
    assert!(cache.get("k0").await.is_none());
    assert!(cache.get("k1").await.is_none());
    assert!(cache.get("k2").await.is_some());
    assert!(cache.get("new").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn eviction_removes_at_least_one() {
    let cache = small_cache(3);
    assert_eq!(cache.config().eviction_count(), 1);
    for key in ["a", "b", "c"] {
        cache.put(key, json!(key), None).await;
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    cache.put("d", json!("d"), None).await;

    assert_eq!(cache.len().await, 3);
    assert!(cache.get("a").await.is_none());
}

#[tokio::test]
async fn replacing_existing_key_does_not_evict() {
    let cache = small_cache(2);
    cache.put("a", json!(1), None).await;
    cache.put("b", json!(2), None).await;
    cache.put("a", json!(3), None).await;

    assert_eq!(cache.len().await, 2);
    assert_eq!(cache.get("a").await, Some(json!(3)));
    assert_eq!(cache.get("b").await, Some(json!(2)));
}

// ── Invalidation ────────────────────────────────────────────────

#[tokio::test]
async fn invalidate_by_type_prefix() {
    let cache = ResponseCache::default();
    cache.put(read_key("Patient", "1"), json!({}), None).await;
    cache
        .put(
            search_key("Patient", &[("name".into(), "Ana".into())]),
            json!({}),
            None,
        )
        .await;
    cache.put(read_key("Observation", "9"), json!({}), None).await;

    let mut removed = 0;
    for prefix in type_prefixes("Patient") {
        removed += cache.invalidate_prefix(&prefix).await;
    }
    assert_eq!(removed, 2);
    assert_eq!(cache.len().await, 1);
    assert!(cache.invalidate(&read_key("Observation", "9")).await);
    assert!(!cache.invalidate(&read_key("Observation", "9")).await);
}

#[test]
fn search_key_is_order_independent() {
    let a = search_key(
        "Patient",
        &[("name".into(), "Ana".into()), ("birthdate".into(), "2000".into())],
    );
    let b = search_key(
        "Patient",
        &[("birthdate".into(), "2000".into()), ("name".into(), "Ana".into())],
    );
    assert_eq!(a, b);
    assert_eq!(a, "search:Patient?birthdate=2000&name=Ana");
    assert_eq!(read_key("Patient", "1"), "read:Patient/1");
}

#[test]
fn search_key_encodes_reserved_characters() {
    let smuggled = search_key("Patient", &[("family".into(), "y&name=x".into())]);
    let split = search_key(
        "Patient",
        &[("family".into(), "y".into()), ("name".into(), "x".into())],
    );
    assert_ne!(smuggled, split);
    assert_eq!(smuggled, "search:Patient?family=y%26name%3Dx");
    assert_eq!(split, "search:Patient?family=y&name=x");
}

// ── Stats ───────────────────────────────────────────────────────

#[tokio::test]
async fn stats_track_hit_rate() {
    let cache = ResponseCache::default();
    cache.put("k", json!(1), None).await;
    cache.get("k").await;
    cache.get("k").await;
    cache.get("k").await;
    cache.get("missing").await;

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.hit_rate, 75.0);
    assert_eq!(stats.entry_count, 1);

    cache.reset_stats();
    let stats = cache.stats().await;
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.hit_rate, 0.0);
}
