use visit_throttle::infrastructure::mocks::MockStore;
use visit_throttle::{
    AdmissionController, ObserverConfig, SuspicionRules, VisitKind, VisitLog, VisitObserver,
    VisitRecord, DEFAULT_VISITS_KEY,
};

fn observer(store: MockStore) -> VisitObserver<MockStore> {
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();
    VisitObserver::builder().build(store, controller).unwrap()
}

fn visit(kind: VisitKind, timestamp: u64) -> VisitRecord {
    VisitRecord::new("/feed", kind, timestamp)
}

#[test]
fn test_visit_log_is_capped_at_one_hundred() {
    let store = MockStore::new();
    let observer = observer(store.clone());

    // Two visits per minute stay well below the admission limits
    for i in 0..150 {
        observer.record_visit(visit(VisitKind::Navigate, i * 30_000));
    }

    let stored = VisitLog::decode(&store.get(DEFAULT_VISITS_KEY).unwrap(), 1_000).unwrap();
    assert_eq!(stored.len(), 100);
    let first = stored.iter().next().unwrap().timestamp;
    let last = stored.iter().last().unwrap().timestamp;
    assert_eq!(first, 50 * 30_000);
    assert_eq!(last, 149 * 30_000);

    assert_eq!(observer.visit_stats(last).total_visits, 100);
}

#[test]
fn test_record_visit_returns_admission_verdict() {
    let observer = observer(MockStore::new());

    for i in 0..50 {
        assert!(observer.record_visit(visit(VisitKind::Reload, i * 100)).allowed);
    }
    let verdict = observer.record_visit(visit(VisitKind::Reload, 5_000));
    assert!(!verdict.allowed);
    assert_eq!(verdict.blocked_until, Some(125_000));

    // The denied visit is still recorded
    assert_eq!(observer.visit_stats(5_000).total_visits, 51);
}

#[test]
fn test_suspicion_boundary() {
    let now = 50_000_000;

    let inside = observer(MockStore::new());
    for _ in 0..21 {
        inside.record_visit(visit(VisitKind::Unknown, now - 299_999));
    }
    let snapshot = inside.visit_stats(now);
    assert_eq!(snapshot.recent_visits, 21);
    assert!(snapshot.suspicious);

    let outside = observer(MockStore::new());
    for _ in 0..21 {
        outside.record_visit(visit(VisitKind::Unknown, now - 300_001));
    }
    let snapshot = outside.visit_stats(now);
    assert_eq!(snapshot.recent_visits, 0);
    assert_eq!(snapshot.hourly_visits, 21);
    assert!(!snapshot.suspicious);
}

#[test]
fn test_suspicion_never_affects_admission() {
    let observer = observer(MockStore::new());

    // Eleven reloads make the pattern suspicious but stay under 50/min
    for i in 0..11 {
        let verdict = observer.record_visit(visit(VisitKind::Reload, i * 1_000));
        assert!(verdict.allowed);
    }
    let snapshot = observer.visit_stats(11_000);
    assert_eq!(snapshot.refresh_count, 11);
    assert!(snapshot.suspicious);
    assert!(observer.controller().check_admission(11_000).allowed);
}

#[test]
fn test_navigation_classification_counts() {
    let observer = observer(MockStore::new());
    let now = 1_000_000;

    for signal in [Some("navigate"), Some("reload"), Some("back_forward"), None] {
        let kind = VisitKind::from_navigation_type(signal);
        observer.record_visit(visit(kind, now));
    }

    let snapshot = observer.visit_stats(now);
    assert_eq!(snapshot.recent_visits, 4);
    assert_eq!(snapshot.navigation_count, 1);
    assert_eq!(snapshot.refresh_count, 1);
}

#[test]
fn test_observers_share_visits_through_store() {
    let store = MockStore::new();
    let first = observer(store.clone());
    let second = observer(store);

    first.record_visit(visit(VisitKind::Navigate, 1_000));
    second.record_visit(visit(VisitKind::Navigate, 2_000));

    assert_eq!(first.visit_stats(3_000).total_visits, 2);
}

#[test]
fn test_custom_rules() {
    let store = MockStore::new();
    let controller = AdmissionController::builder()
        .build(store.clone())
        .unwrap();
    let config = ObserverConfig {
        capacity: 10,
        rules: SuspicionRules {
            max_recent_visits: 2,
            ..SuspicionRules::default()
        },
        ..ObserverConfig::default()
    };
    let observer = VisitObserver::builder()
        .with_config(config)
        .with_visits_key("visits-under-test")
        .build(store.clone(), controller)
        .unwrap();

    for t in 0..3 {
        observer.record_visit(visit(VisitKind::BackForward, t));
    }
    assert!(observer.visit_stats(3).suspicious);
    assert!(store.get("visits-under-test").is_some());
    assert!(store.get(DEFAULT_VISITS_KEY).is_none());
}

#[test]
fn test_rapid_unloads_raise_persistent_flag() {
    let store = MockStore::new();
    let tab = observer(store.clone());

    for i in 0..6 {
        assert!(!tab.record_unload(10_000 + i * 200));
    }
    assert!(tab.record_unload(10_000 + 6 * 200));

    // A fresh observer on the same store still sees the flag
    let reopened = observer(store);
    assert!(reopened.visit_stats(20_000).rapid_refresh_flagged);

    reopened.clear_visits();
    assert!(!reopened.visit_stats(20_000).rapid_refresh_flagged);
}

#[test]
fn test_reopened_observer_reports_existing_flag() {
    let store = MockStore::new();
    let tab = observer(store.clone());
    for i in 0..7 {
        tab.record_unload(10_000 + i * 200);
    }
    let writes = store.write_count();

    let reopened = observer(store.clone());
    // A single slow unload is not a burst, but the flag is already raised
    assert!(reopened.record_unload(60_000));
    assert_eq!(store.write_count(), writes);

    // Visits recorded by the reopened observer see the same flag
    reopened.record_visit(visit(VisitKind::Navigate, 61_000));
    assert!(reopened.visit_stats(61_000).rapid_refresh_flagged);
}

#[test]
fn test_flag_cleared_elsewhere_is_not_resurrected() {
    let store = MockStore::new();
    let first = observer(store.clone());
    let second = observer(store);
    for i in 0..7 {
        first.record_unload(10_000 + i * 200);
    }
    assert!(second.record_unload(20_000));

    first.clear_visits();
    assert!(!second.record_unload(40_000));
    assert!(!second.visit_stats(40_000).rapid_refresh_flagged);
}
