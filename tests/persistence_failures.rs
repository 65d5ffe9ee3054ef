use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use visit_throttle::infrastructure::mocks::{MockCaptureLayer, MockStore};
use visit_throttle::{
    AdmissionController, PersistenceMode, RateLimiterState, VisitKind, VisitObserver,
    VisitRecord, DEFAULT_STATE_KEY,
};

fn capture<R>(f: impl FnOnce() -> R) -> (R, MockCaptureLayer) {
    let layer = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, layer)
}

#[test]
fn test_write_failure_switches_to_memory_only() {
    let store = MockStore::new();
    store.fail_writes(true);
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();

    let (_, layer) = capture(|| {
        for i in 0..50 {
            assert!(controller.check_admission(i * 100).allowed);
        }
        // Enforcement continues from memory
        assert!(!controller.check_admission(5_000).allowed);
    });

    assert_eq!(controller.persistence_mode(), PersistenceMode::MemoryOnly);
    assert_eq!(store.get(DEFAULT_STATE_KEY), None);
    // Only the first failure is a warning; later writes are not attempted
    assert_eq!(controller.metrics().store_failures(), 1);

    let degraded = layer.find("Store failed");
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].level, Level::WARN);
    assert_eq!(degraded[0].field("key"), Some(DEFAULT_STATE_KEY));

    let blocked = layer.find("Request limit reached");
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].field("minute_count"), Some("50"));
}

#[test]
fn test_memory_only_survives_store_recovery() {
    let store = MockStore::new();
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();
    controller.check_admission(0);

    store.fail_writes(true);
    controller.check_admission(1_000);
    store.fail_writes(false);
    controller.check_admission(2_000);

    // The mode is sticky for the controller's lifetime
    assert_eq!(controller.persistence_mode(), PersistenceMode::MemoryOnly);
    let stored = RateLimiterState::decode(&store.get(DEFAULT_STATE_KEY).unwrap()).unwrap();
    assert_eq!(stored.total_requests, 1);
    assert_eq!(controller.stats(2_000).total_requests, 3);
}

#[test]
fn test_read_failure_while_blocked_fails_open() {
    let store = MockStore::new();
    let controller = AdmissionController::builder()
        .with_max_requests_per_minute(1)
        .build(store.clone())
        .unwrap();
    controller.check_admission(0);
    assert!(!controller.check_admission(10).allowed);

    store.fail_reads(true);
    let (result, layer) = capture(|| controller.check_admission(1_000));
    assert!(result.allowed);
    assert_eq!(result.blocked_until, None);
    assert_eq!(controller.persistence_mode(), PersistenceMode::MemoryOnly);
    assert_eq!(layer.find("Store failed").len(), 1);

    // Enforcement restarts from the fresh state, in memory
    assert!(!controller.check_admission(2_000).allowed);
    let stats = controller.stats(2_000);
    assert_eq!(stats.requests_last_minute, 1);
    assert_eq!(stats.total_requests, 2);
}

#[test]
fn test_unreadable_store_from_the_start_is_open() {
    let store = MockStore::new();
    store.insert(
        DEFAULT_STATE_KEY,
        r#"{"requests":[],"blockedUntil":99999999999999,"blockStartTime":0,"totalRequests":0}"#,
    );
    store.fail_reads(true);
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();

    let result = controller.check_admission(1_000);
    assert!(result.allowed);
    assert_eq!(controller.metrics().store_failures(), 1);
}

#[test]
fn test_corrupt_state_is_discarded_and_overwritten() {
    let store = MockStore::new();
    store.insert(DEFAULT_STATE_KEY, "{not json");
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();

    let (result, layer) = capture(|| controller.check_admission(1_000));
    assert!(result.allowed);
    assert_eq!(controller.persistence_mode(), PersistenceMode::Durable);
    assert_eq!(controller.metrics().corrupt_states(), 1);

    let events = layer.find("Discarding corrupt persisted state");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::WARN);

    let stored = RateLimiterState::decode(&store.get(DEFAULT_STATE_KEY).unwrap()).unwrap();
    assert_eq!(stored.total_requests, 1);
}

#[test]
fn test_reset_with_failing_clear() {
    let store = MockStore::new();
    let controller = AdmissionController::builder()
        .with_max_requests_per_minute(1)
        .build(store.clone())
        .unwrap();
    controller.check_admission(0);
    assert!(!controller.check_admission(10).allowed);

    store.fail_clears(true);
    let (_, layer) = capture(|| controller.reset());

    assert_eq!(controller.persistence_mode(), PersistenceMode::MemoryOnly);
    let reset = layer.find("Admission state reset");
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].field("memory_only"), Some("true"));

    // The in-memory state is Open even though the store still holds the block
    assert!(controller.check_admission(20).allowed);
    assert!(store.get(DEFAULT_STATE_KEY).is_some());
}

#[test]
fn test_observer_failures_share_controller_metrics() {
    let store = MockStore::new();
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();
    let observer = VisitObserver::builder()
        .build(store.clone(), controller.clone())
        .unwrap();

    store.fail_writes(true);
    let result = observer.record_visit(VisitRecord::new("/", VisitKind::Navigate, 1_000));
    assert!(result.allowed);

    // One failed write for the visit log, one for the admission state
    assert_eq!(controller.metrics().store_failures(), 2);
    assert_eq!(observer.persistence_mode(), PersistenceMode::MemoryOnly);
    assert_eq!(observer.visit_stats(1_000).total_visits, 1);
}

#[test]
fn test_metrics_snapshot_after_block_cycle() {
    let controller = AdmissionController::builder()
        .with_max_requests_per_minute(2)
        .with_block_duration(std::time::Duration::from_secs(10))
        .build(MockStore::new())
        .unwrap();

    controller.check_admission(0);
    controller.check_admission(1);
    controller.check_admission(2);
    controller.check_admission(5_000);
    controller.check_admission(10_002);

    let snapshot = controller.metrics().snapshot();
    assert_eq!(snapshot.admitted, 3);
    assert_eq!(snapshot.denied, 2);
    assert_eq!(snapshot.blocks_started, 1);
    assert_eq!(snapshot.blocks_expired, 1);
    assert_eq!(snapshot.store_failures, 0);
    assert_eq!(snapshot.total_checks(), 5);
}
