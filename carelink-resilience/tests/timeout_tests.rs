use carelink_resilience::{AdaptiveTimeoutManager, EventBus, ResilienceEvent, TimeoutConfig};
use std::sync::{Arc, Mutex};

async fn record_all(manager: &AdaptiveTimeoutManager, endpoint: &str, durations: &[u64], success: bool) {
    for d in durations {
        manager.record_outcome(endpoint, *d, success).await;
    }
}

// ── Adaptive timeout ────────────────────────────────────────────

#[tokio::test]
async fn unknown_endpoint_uses_fallback() {
    let manager = AdaptiveTimeoutManager::default();
    assert_eq!(manager.get_adaptive_timeout("read:Patient", None).await, 30_000);
    assert_eq!(manager.get_current_timeout("read:Patient").await, 30_000);
}

#[tokio::test]
async fn fast_endpoint_clamps_to_minimum() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "read:Patient", &[5_000, 7_000, 6_000], true).await;
    assert_eq!(manager.get_adaptive_timeout("read:Patient", None).await, 30_000);
}

#[tokio::test]
async fn slow_endpoint_clamps_to_maximum() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[80_000, 90_000, 85_000], true).await;
    assert_eq!(manager.get_adaptive_timeout("batch", None).await, 120_000);
}

#[tokio::test]
async fn mean_times_multiplier_within_bounds() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(
        &manager,
        "search:Observation",
        &[20_000, 25_000, 22_000, 18_000, 24_000],
        true,
    )
    .await;
    assert_eq!(
        manager.get_adaptive_timeout("search:Observation", None).await,
        43_600
    );
    assert_eq!(manager.get_current_timeout("search:Observation").await, 43_600);
}

#[tokio::test]
async fn all_failures_escalate_fallback() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[30_000, 30_000], false).await;
    assert_eq!(manager.get_adaptive_timeout("batch", None).await, 45_000);
}

#[tokio::test]
async fn failed_durations_are_ignored_in_mean() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[20_000, 30_000], true).await;
    // A huge failure must not drag the mean up.
    manager.record_outcome("batch", 500_000, false).await;
    assert_eq!(manager.get_adaptive_timeout("batch", None).await, 50_000);

    let stats = manager.get_endpoint_stats("batch").await.unwrap();
    assert_eq!(stats.sample_count, 3);
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.mean_success_ms, Some(25_000.0));
}

#[tokio::test]
async fn override_wins() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[80_000], true).await;
    assert_eq!(manager.get_adaptive_timeout("batch", Some(5_000)).await, 5_000);
}

// ── Sample window ───────────────────────────────────────────────

#[tokio::test]
async fn samples_are_bounded_fifo() {
    let manager = AdaptiveTimeoutManager::default();
    for i in 0..15u64 {
        manager.record_outcome("batch", 20_000 + i * 1_000, true).await;
    }

    let profile = manager.get_profile("batch").await.unwrap();
    assert_eq!(profile.samples.len(), 10);
    // The five oldest (20s..24s) are gone.
    assert_eq!(profile.samples.front().unwrap().duration_ms, 25_000);
    assert_eq!(profile.samples.back().unwrap().duration_ms, 34_000);
    assert_eq!(profile.adjustment_count, 15);
    // mean(25..34s) = 29.5s → 59s
    assert_eq!(profile.current_timeout_ms, 59_000);
}

#[tokio::test]
async fn exactly_max_samples_keeps_all() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[20_000; 10], true).await;
    let profile = manager.get_profile("batch").await.unwrap();
    assert_eq!(profile.samples.len(), 10);
    assert_eq!(profile.current_timeout_ms, 40_000);
}

#[tokio::test]
async fn has_sufficient_data() {
    let manager = AdaptiveTimeoutManager::default();
    assert!(!manager.has_sufficient_data("batch", 1).await);
    record_all(&manager, "batch", &[1_000, 2_000], true).await;
    assert!(manager.has_sufficient_data("batch", 2).await);
    assert!(!manager.has_sufficient_data("batch", 3).await);
}

// ── Store management ────────────────────────────────────────────

#[tokio::test]
async fn stats_are_sorted_and_clearable() {
    let manager = AdaptiveTimeoutManager::default();
    manager.record_outcome("search:Patient", 1_000, true).await;
    manager.record_outcome("batch", 1_000, true).await;
    manager.record_outcome("read:Patient", 1_000, true).await;

    let keys: Vec<String> = manager
        .get_all_stats()
        .await
        .into_iter()
        .map(|s| s.endpoint_key)
        .collect();
    assert_eq!(keys, vec!["batch", "read:Patient", "search:Patient"]);

    manager.clear_endpoint_stats("batch").await;
    assert_eq!(manager.endpoint_count().await, 2);
    assert!(manager.get_profile("batch").await.is_none());

    manager.clear_all_stats().await;
    assert_eq!(manager.endpoint_count().await, 0);
}

#[tokio::test]
async fn update_config_applies_to_next_lookup() {
    let manager = AdaptiveTimeoutManager::default();
    record_all(&manager, "batch", &[10_000], true).await;
    assert_eq!(manager.get_adaptive_timeout("batch", None).await, 30_000);

    manager
        .update_config(TimeoutConfig {
            min_timeout_ms: 1_000,
            ..TimeoutConfig::default()
        })
        .await;
    assert_eq!(manager.get_config().await.min_timeout_ms, 1_000);
    assert_eq!(manager.get_adaptive_timeout("batch", None).await, 20_000);
}

#[tokio::test]
async fn adjustment_emits_event_only_on_change() {
    let events = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events
        .subscribe(Arc::new(move |e: &ResilienceEvent| {
            sink.lock().unwrap().push(e.clone());
        }))
        .await;

    let manager = AdaptiveTimeoutManager::with_events(TimeoutConfig::default(), events);
    // 2 × 10s = 20s, clamped to the 30s fallback: no change.
    manager.record_outcome("batch", 10_000, true).await;
    assert!(seen.lock().unwrap().is_empty());

    manager.record_outcome("batch", 50_000, true).await;
    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![ResilienceEvent::TimeoutAdjusted {
            endpoint_key: "batch".into(),
            previous_ms: 30_000,
            current_ms: 60_000,
        }]
    );
}
