use carelink_resilience::mock::{MockTransport, ScriptedFailure};
use carelink_resilience::sync::{SyncRecord, changed_since_search, extract_records};
use carelink_resilience::{
    AdaptiveTimeoutManager, BatchConfig, CompressionConfig, CompressionNegotiator,
    DifferentialSyncEngine, EventBus, RequestBatcher, ResilienceError, ResilienceEvent,
    RetryConfig, RetryController,
};
use carelink_types::{BatchOperation, OperationOutcome};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Full syncs return two records; incremental ones a change and a tombstone.
fn bundle(op: &BatchOperation) -> OperationOutcome {
    if op.target().contains("_lastUpdated") {
        OperationOutcome::ok(
            200,
            json!({"resourceType": "Bundle", "entry": [
                {"resource": {"resourceType": "Observation", "id": "o1"}},
                {"resource": {"resourceType": "Observation", "id": "o2"}, "deleted": true},
            ]}),
        )
    } else {
        OperationOutcome::ok(
            200,
            json!({"resourceType": "Bundle", "entry": [
                {"resource": {"resourceType": "Observation", "id": "o1"}},
                {"resource": {"resourceType": "Observation", "id": "o2"}},
            ]}),
        )
    }
}

struct Harness {
    mock: Arc<MockTransport>,
    events: Arc<EventBus>,
    engine: Arc<DifferentialSyncEngine>,
}

fn harness() -> Harness {
    let mock = Arc::new(MockTransport::with_handler(bundle));
    let events = Arc::new(EventBus::new());
    let batcher = Arc::new(RequestBatcher::new(
        BatchConfig::default(),
        mock.clone(),
        Arc::new(AdaptiveTimeoutManager::default()),
        Arc::new(CompressionNegotiator::gzip(CompressionConfig::default())),
        RetryController::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        }),
        events.clone(),
    ));
    let engine = Arc::new(DifferentialSyncEngine::new(batcher, events.clone()));
    Harness {
        mock,
        events,
        engine,
    }
}

// ── Watermarks ──────────────────────────────────────────────────

#[tokio::test]
async fn first_sync_reports_everything_as_added() {
    let h = harness();
    let report = h.engine.sync_resources(&["Observation"], None).await.unwrap();

    let changes = &report.changes["Observation"];
    assert_eq!(changes.added, vec!["o1", "o2"]);
    assert!(changes.modified.is_empty());
    assert!(changes.deleted.is_empty());
    assert_eq!(report.total_changes(), 2);

    assert_eq!(h.mock.executed()[0].target(), "Observation");
    assert_eq!(
        h.engine.watermark("Observation").await,
        Some(report.started_at)
    );
}

#[tokio::test]
async fn later_sync_filters_by_watermark() {
    let h = harness();
    let first = h.engine.sync_resources(&["Observation"], None).await.unwrap();
    let second = h.engine.sync_resources(&["Observation"], None).await.unwrap();

    let target = h.mock.executed()[1].target().to_string();
    assert!(target.starts_with("Observation?_lastUpdated=gt"), "{target}");

    let changes = &second.changes["Observation"];
    assert!(changes.added.is_empty());
    assert_eq!(changes.modified, vec!["o1"]);
    assert_eq!(changes.deleted, vec!["o2"]);
    assert!(h.engine.watermark("Observation").await.unwrap() >= first.started_at);
}

#[tokio::test]
async fn subject_filter_is_passed_through() {
    let h = harness();
    h.engine
        .sync_resources(&["Observation"], Some("123"))
        .await
        .unwrap();
    assert_eq!(h.mock.executed()[0].target(), "Observation?patient=123");
}

#[tokio::test]
async fn watermarks_are_per_type_and_clearable() {
    let h = harness();
    h.engine
        .sync_resources(&["Observation", "Condition"], None)
        .await
        .unwrap();

    let types: Vec<String> = h
        .engine
        .watermarks()
        .await
        .into_iter()
        .map(|w| w.resource_type)
        .collect();
    assert_eq!(types, vec!["Condition", "Observation"]);

    h.engine.clear_watermarks().await;
    assert!(h.engine.watermarks().await.is_empty());
}

// ── Single flight ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_sync_is_rejected() {
    let h = harness();
    h.mock.set_latency(Duration::from_millis(100));

    let engine = h.engine.clone();
    let running = tokio::spawn(async move { engine.sync_resources(&["Observation"], None).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(h.engine.is_syncing());
    let err = h
        .engine
        .sync_resources(&["Observation"], None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::SyncInProgress));
    assert!(err.is_recoverable());

    running.await.unwrap().unwrap();
    assert!(!h.engine.is_syncing());
}

#[tokio::test]
async fn failure_releases_flag_and_keeps_earlier_watermarks() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.events
        .subscribe(Arc::new(move |e: &ResilienceEvent| {
            sink.lock().unwrap().push(e.clone());
        }))
        .await;

    let engine = &h.engine;
    let first = engine.sync_resources(&["Observation"], None).await.unwrap();
    h.mock.fail_next(ScriptedFailure::Status(403));
    let err = engine
        .sync_resources(&["Condition"], None)
        .await
        .unwrap_err();

    assert!(matches!(err, ResilienceError::Operation { status: Some(403), .. }));
    assert!(!engine.is_syncing());
    assert_eq!(engine.watermark("Observation").await, Some(first.started_at));
    assert_eq!(engine.watermark("Condition").await, None);

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|e| matches!(
        e,
        ResilienceEvent::SyncCompleted { resource_type, added: 2, .. } if resource_type == "Observation"
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        ResilienceEvent::SyncFailed { resource_type, .. } if resource_type == "Condition"
    )));
}

#[tokio::test]
async fn failure_midway_stops_the_pass() {
    let h = harness();
    h.mock.fail_next(ScriptedFailure::Network("down".into()));

    let err = h
        .engine
        .sync_resources(&["Observation", "Condition"], None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::BatchOperation { .. }));
    // The second type was never attempted.
    assert_eq!(h.mock.execute_count(), 1);
    assert!(h.engine.watermarks().await.is_empty());
}

// ── Query building and parsing ──────────────────────────────────

#[test]
fn changed_since_query_format() {
    let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let op = changed_since_search("Observation", Some(since), Some("123"));
    assert_eq!(
        op.target(),
        "Observation?_lastUpdated=gt2024-01-02T03%3A04%3A05.000Z&patient=123"
    );
    assert_eq!(op.endpoint_key(), "search:Observation");
}

#[test]
fn extract_from_bundle_and_array() {
    let bundle = json!({"entry": [
        {"resource": {"id": "a"}},
        {"resource": {"id": "b"}, "deleted": true},
        {"resource": {"status": "no id"}},
    ]});
    assert_eq!(
        extract_records(&bundle),
        vec![
            SyncRecord { id: Some("a".into()), deleted: false },
            SyncRecord { id: Some("b".into()), deleted: true },
            SyncRecord { id: None, deleted: false },
        ]
    );

    let array = json!([{"id": "x"}, {"id": "y", "deleted": true}]);
    assert_eq!(
        extract_records(&array),
        vec![
            SyncRecord { id: Some("x".into()), deleted: false },
            SyncRecord { id: Some("y".into()), deleted: true },
        ]
    );

    assert!(extract_records(&json!({"resourceType": "Bundle"})).is_empty());
    assert!(extract_records(&json!(null)).is_empty());
}
