//! Visit recording and suspicion diagnostics.
//!
//! The observer keeps a bounded log of page visits next to the admission
//! state and asks the controller for a verdict on every visit. The
//! suspicion snapshot it derives is diagnostic only and never feeds back
//! into admission.

use crate::application::controller::{AdmissionController, BuildError};
use crate::application::metrics::Metrics;
use crate::application::persistence::{Loaded, PersistedSlot, PersistenceMode};
use crate::application::ports::Store;
use crate::domain::state::{AdmissionResult, StateError};
use crate::domain::visit::{
    RapidUnloadDetector, SuspicionRules, SuspicionSnapshot, VisitLog, VisitRecord,
    DEFAULT_VISIT_CAPACITY,
};
use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store key holding the visit log.
pub const DEFAULT_VISITS_KEY: &str = "page_visits";

/// Store key holding the rapid-refresh flag.
pub const DEFAULT_RAPID_REFRESH_KEY: &str = "suspicious_refresh_detected";

/// Error returned when observer configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverConfigError {
    /// Visit capacity must be greater than zero
    ZeroCapacity,
    /// A suspicion window must be greater than zero
    ZeroWindow(&'static str),
    /// The rapid-unload interval must be greater than zero
    ZeroUnloadInterval,
}

impl std::fmt::Display for ObserverConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObserverConfigError::ZeroCapacity => {
                write!(f, "visit capacity must be greater than 0")
            }
            ObserverConfigError::ZeroWindow(which) => {
                write!(f, "{} must be greater than 0", which)
            }
            ObserverConfigError::ZeroUnloadInterval => {
                write!(f, "unload interval must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ObserverConfigError {}

/// Configuration for a [`VisitObserver`].
///
/// Deserializes with defaults for every missing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Maximum retained visit records
    pub capacity: usize,
    /// Suspicion windows and thresholds
    pub rules: SuspicionRules,
    /// Unloads closer together than this count as rapid
    pub unload_interval_ms: u64,
    /// Rapid unloads tolerated before the flag is raised
    pub unload_threshold: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_VISIT_CAPACITY,
            rules: SuspicionRules::default(),
            unload_interval_ms: 1_000,
            unload_threshold: 5,
        }
    }
}

impl ObserverConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ObserverConfigError` if a capacity, window or interval is zero.
    pub fn validate(&self) -> Result<(), ObserverConfigError> {
        if self.capacity == 0 {
            return Err(ObserverConfigError::ZeroCapacity);
        }
        if self.rules.recent_window_ms == 0 {
            return Err(ObserverConfigError::ZeroWindow("recent window"));
        }
        if self.rules.hourly_window_ms == 0 {
            return Err(ObserverConfigError::ZeroWindow("hourly window"));
        }
        if self.unload_interval_ms == 0 {
            return Err(ObserverConfigError::ZeroUnloadInterval);
        }
        Ok(())
    }
}

/// Records visits, keeps the bounded visit log and reports suspicion.
///
/// # Example
/// ```
/// use visit_throttle::{AdmissionController, MemoryStore, VisitKind, VisitObserver, VisitRecord};
///
/// let store = MemoryStore::new();
/// let controller = AdmissionController::builder().build(store.clone()).unwrap();
/// let observer = VisitObserver::builder().build(store, controller).unwrap();
///
/// let result = observer.record_visit(VisitRecord::new("/feed", VisitKind::Navigate, 1_000));
/// assert!(result.allowed);
///
/// let snapshot = observer.visit_stats(2_000);
/// assert_eq!(snapshot.total_visits, 1);
/// assert_eq!(snapshot.navigation_count, 1);
/// assert!(!snapshot.suspicious);
/// ```
#[derive(Debug)]
pub struct VisitObserver<S> {
    controller: AdmissionController<S>,
    config: ObserverConfig,
    session: Mutex<ObserverSession<S>>,
}

#[derive(Debug)]
struct ObserverSession<S> {
    visits: PersistedSlot<S>,
    flag: PersistedSlot<S>,
    log: VisitLog,
    rapid_refresh_flagged: bool,
    unloads: RapidUnloadDetector,
}

fn decode_flag(bytes: &[u8]) -> Result<bool, StateError> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))
}

fn encode_flag(flag: bool) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec(&flag).map_err(|e| StateError::Encode(e.to_string()))
}

impl<S: Store> ObserverSession<S> {
    fn refresh(&mut self, capacity: usize) {
        match self.visits.load(|bytes| VisitLog::decode(bytes, capacity)) {
            Loaded::Value(log) => self.log = log,
            Loaded::Empty | Loaded::ReadFailed => self.log = VisitLog::new(capacity),
            Loaded::Unavailable => {}
        }
    }

    fn peek_log(&self, capacity: usize) -> VisitLog {
        match self.visits.peek(|bytes| VisitLog::decode(bytes, capacity)) {
            Loaded::Value(log) => log,
            Loaded::Empty => VisitLog::new(capacity),
            Loaded::ReadFailed | Loaded::Unavailable => self.log.clone(),
        }
    }

    fn peek_flag(&self) -> bool {
        match self.flag.peek(decode_flag) {
            Loaded::Value(flag) => flag,
            Loaded::Empty => false,
            Loaded::ReadFailed | Loaded::Unavailable => self.rapid_refresh_flagged,
        }
    }

    /// Adopt the persisted flag, which another handle may have raised or
    /// cleared since this one last looked.
    fn sync_flag(&mut self) {
        self.rapid_refresh_flagged = self.peek_flag();
    }
}

impl VisitObserver<()> {
    /// Create a builder for configuring an observer.
    pub fn builder() -> VisitObserverBuilder {
        VisitObserverBuilder::default()
    }
}

impl<S: Store> VisitObserver<S> {
    /// Record a visit and return the admission verdict for it.
    ///
    /// The visit is appended (evicting the oldest records beyond capacity)
    /// and persisted before the controller is asked for a verdict at
    /// `visit.timestamp`. Like the controller, this never fails.
    pub fn record_visit(&self, visit: VisitRecord) -> AdmissionResult {
        let now = visit.timestamp;
        let snapshot = {
            let mut session = self.lock();
            session.refresh(self.config.capacity);
            session.sync_flag();
            session.log.push(visit);
            let encoded = session.log.encode();
            session.visits.save(encoded);
            session
                .log
                .snapshot(&self.config.rules, now, session.rapid_refresh_flagged)
        };

        if snapshot.suspicious {
            tracing::debug!(
                recent_visits = snapshot.recent_visits,
                refresh_count = snapshot.refresh_count,
                hourly_visits = snapshot.hourly_visits,
                "Suspicious visit pattern"
            );
        }

        self.controller.check_admission(now)
    }

    /// Suspicion snapshot at `now`. Read-only.
    pub fn visit_stats(&self, now: Timestamp) -> SuspicionSnapshot {
        let session = self.lock();
        let log = session.peek_log(self.config.capacity);
        let flagged = session.peek_flag();
        log.snapshot(&self.config.rules, now, flagged)
    }

    /// Record a page unload at `now`.
    ///
    /// Once more than the configured number of unloads follow each other
    /// within the unload interval, the rapid-refresh flag is raised and
    /// persisted. Returns whether the flag is raised, including when another
    /// handle on the same store raised it earlier.
    pub fn record_unload(&self, now: Timestamp) -> bool {
        let mut session = self.lock();
        session.sync_flag();
        let burst = session.unloads.record(now);
        if burst && !session.rapid_refresh_flagged {
            session.rapid_refresh_flagged = true;
            session.flag.save(encode_flag(true));
            tracing::debug!(
                rapid_unloads = session.unloads.rapid_count(),
                "Rapid refresh detected"
            );
        }
        session.rapid_refresh_flagged
    }

    /// Drop every visit record and the rapid-refresh flag.
    ///
    /// Admission state is left alone; use [`AdmissionController::reset`]
    /// for that.
    pub fn clear_visits(&self) {
        let mut session = self.lock();
        session.log.clear();
        session.rapid_refresh_flagged = false;
        session.unloads = RapidUnloadDetector::new(
            self.config.unload_interval_ms,
            self.config.unload_threshold,
        );
        session.visits.clear();
        session.flag.clear();
    }

    /// Persistence mode of the visit log.
    pub fn persistence_mode(&self) -> PersistenceMode {
        self.lock().visits.mode()
    }

    fn lock(&self) -> MutexGuard<'_, ObserverSession<S>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> VisitObserver<S> {
    /// The controller consulted on every visit.
    pub fn controller(&self) -> &AdmissionController<S> {
        &self.controller
    }

    /// The observer configuration.
    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }
}

/// Builder for constructing a [`VisitObserver`].
#[derive(Debug)]
pub struct VisitObserverBuilder {
    config: ObserverConfig,
    visits_key: String,
    rapid_refresh_key: String,
}

impl Default for VisitObserverBuilder {
    fn default() -> Self {
        Self {
            config: ObserverConfig::default(),
            visits_key: DEFAULT_VISITS_KEY.to_string(),
            rapid_refresh_key: DEFAULT_RAPID_REFRESH_KEY.to_string(),
        }
    }
}

impl VisitObserverBuilder {
    /// Use the given configuration.
    pub fn with_config(mut self, config: ObserverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of retained visit records.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the suspicion windows and thresholds.
    pub fn with_rules(mut self, rules: SuspicionRules) -> Self {
        self.config.rules = rules;
        self
    }

    /// Set the store key holding the visit log.
    pub fn with_visits_key(mut self, key: impl Into<String>) -> Self {
        self.visits_key = key.into();
        self
    }

    /// Set the store key holding the rapid-refresh flag.
    pub fn with_rapid_refresh_key(mut self, key: impl Into<String>) -> Self {
        self.rapid_refresh_key = key.into();
        self
    }

    /// Build the observer over `store`, consulting `controller` on each visit.
    ///
    /// Store failures are counted in the controller's metrics.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid or a key is empty.
    pub fn build<S: Store + Clone>(
        self,
        store: S,
        controller: AdmissionController<S>,
    ) -> Result<VisitObserver<S>, BuildError> {
        self.config.validate()?;
        if self.visits_key.is_empty() {
            return Err(BuildError::EmptyKey("visits key"));
        }
        if self.rapid_refresh_key.is_empty() {
            return Err(BuildError::EmptyKey("rapid refresh key"));
        }

        let metrics: Metrics = controller.metrics().clone();
        let session = ObserverSession {
            visits: PersistedSlot::new(store.clone(), self.visits_key, metrics.clone()),
            flag: PersistedSlot::new(store, self.rapid_refresh_key, metrics),
            log: VisitLog::new(self.config.capacity),
            rapid_refresh_flagged: false,
            unloads: RapidUnloadDetector::new(
                self.config.unload_interval_ms,
                self.config.unload_threshold,
            ),
        };

        Ok(VisitObserver {
            controller,
            config: self.config,
            session: Mutex::new(session),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::visit::VisitKind;
    use crate::infrastructure::mocks::MockStore;

    fn observer(store: MockStore) -> VisitObserver<MockStore> {
        let controller = AdmissionController::builder()
            .build(store.clone())
            .unwrap();
        VisitObserver::builder()
            .with_capacity(3)
            .build(store, controller)
            .unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = ObserverConfig::default();
        assert!(config.validate().is_ok());

        config.capacity = 0;
        assert_eq!(config.validate(), Err(ObserverConfigError::ZeroCapacity));

        let controller = AdmissionController::builder()
            .build(MockStore::new())
            .unwrap();
        let err = VisitObserver::builder()
            .with_capacity(0)
            .build(MockStore::new(), controller)
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::ObserverConfig(ObserverConfigError::ZeroCapacity)
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ObserverConfig = serde_json::from_str(r#"{"capacity":10}"#).unwrap();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.rules, SuspicionRules::default());
        assert_eq!(config.unload_threshold, 5);
    }

    #[test]
    fn test_record_visit_persists_and_checks() {
        let store = MockStore::new();
        let observer = observer(store.clone());

        for t in 0..5 {
            let result = observer.record_visit(VisitRecord::new("/", VisitKind::Navigate, t));
            assert!(result.allowed);
        }

        let stored = VisitLog::decode(&store.get(DEFAULT_VISITS_KEY).unwrap(), 100).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(observer.controller().stats(10).total_requests, 5);
    }

    #[test]
    fn test_rapid_unload_flag_persists() {
        let store = MockStore::new();
        let observer = observer(store.clone());

        let mut flagged = false;
        for i in 0..7 {
            flagged = observer.record_unload(i * 100);
        }
        assert!(flagged);
        assert_eq!(store.get(DEFAULT_RAPID_REFRESH_KEY), Some(b"true".to_vec()));
        assert!(observer.visit_stats(1_000).rapid_refresh_flagged);
    }

    #[test]
    fn test_clear_visits_keeps_admission_state() {
        let store = MockStore::new();
        let observer = observer(store.clone());
        observer.record_visit(VisitRecord::new("/", VisitKind::Reload, 0));

        observer.clear_visits();
        assert_eq!(store.get(DEFAULT_VISITS_KEY), None);
        assert_eq!(observer.visit_stats(1).total_visits, 0);
        assert_eq!(observer.controller().stats(1).total_requests, 1);
    }
}
