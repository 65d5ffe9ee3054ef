//! Admission controller coordination logic.
//!
//! The controller decides whether an activity unit is admitted. Every check
//! re-reads the persisted state, runs the Open/Blocked state machine and
//! writes the result back when it changed. Storage problems never reach the
//! caller: the worst case is a controller that forgets its history and
//! treats the profile as Open.

use crate::application::metrics::Metrics;
use crate::application::persistence::{Loaded, PersistedSlot, PersistenceMode};
use crate::application::ports::{Clock, Store};
use crate::domain::policy::{
    AdmissionPolicy, PolicyError, DEFAULT_BLOCK_DURATION_MS, DEFAULT_LEGACY_BLOCK_DURATION_MS,
    DEFAULT_MAX_REQUESTS_PER_HOUR, DEFAULT_MAX_REQUESTS_PER_MINUTE,
};
use crate::domain::state::{
    AdmissionResult, AdmissionStats, Evaluation, RateLimiterState, Transition,
};
use crate::domain::Timestamp;
use crate::infrastructure::clock::SystemClock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Store key holding the request log, block timer and counters.
pub const DEFAULT_STATE_KEY: &str = "page_visit_tracker";

/// Error returned when building a controller or observer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Admission policy validation failed
    Policy(PolicyError),
    /// Observer configuration validation failed
    ObserverConfig(crate::application::observer::ObserverConfigError),
    /// A store key was empty
    EmptyKey(&'static str),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Policy(e) => write!(f, "policy error: {}", e),
            BuildError::ObserverConfig(e) => write!(f, "observer configuration error: {}", e),
            BuildError::EmptyKey(which) => write!(f, "{} must not be empty", which),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<PolicyError> for BuildError {
    fn from(e: PolicyError) -> Self {
        BuildError::Policy(e)
    }
}

impl From<crate::application::observer::ObserverConfigError> for BuildError {
    fn from(e: crate::application::observer::ObserverConfigError) -> Self {
        BuildError::ObserverConfig(e)
    }
}

/// Sliding-window admission controller with a persisted block timer.
///
/// Cloning is cheap and clones share state, so a controller can be handed
/// to an observer and a countdown ticker at the same time. Two controllers
/// built separately over the same store behave like two browser tabs: each
/// re-reads the store on every check and the last write wins.
///
/// # Example
/// ```
/// use visit_throttle::{AdmissionController, AdmissionPolicy, MemoryStore};
/// use std::time::Duration;
///
/// let policy = AdmissionPolicy::new(2, 100, Duration::from_secs(60)).unwrap();
/// let controller = AdmissionController::builder()
///     .with_policy(policy)
///     .build(MemoryStore::new())
///     .unwrap();
///
/// assert!(controller.check_admission(0).allowed);
/// assert!(controller.check_admission(1_000).allowed);
///
/// let result = controller.check_admission(2_000);
/// assert!(!result.allowed);
/// assert_eq!(result.blocked_until, Some(62_000));
/// assert_eq!(result.formatted_remaining(), "1:00");
/// ```
#[derive(Debug)]
pub struct AdmissionController<S> {
    inner: Arc<ControllerInner<S>>,
}

impl<S> Clone for AdmissionController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct ControllerInner<S> {
    policy: AdmissionPolicy,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    session: Mutex<Session<S>>,
}

/// Mutable per-handle state guarded by the controller's mutex.
#[derive(Debug)]
struct Session<S> {
    slot: PersistedSlot<S>,
    state: RateLimiterState,
    last_result: AdmissionResult,
}

impl<S: Store> Session<S> {
    /// Pick up whatever another writer persisted since the last check.
    ///
    /// A failed read fails open to the default state.
    fn refresh(&mut self) {
        match self.slot.load(RateLimiterState::decode) {
            Loaded::Value(state) => self.state = state,
            Loaded::Empty | Loaded::ReadFailed => self.state = RateLimiterState::default(),
            Loaded::Unavailable => {}
        }
    }

    fn persist(&mut self) {
        let encoded = self.state.encode();
        self.slot.save(encoded);
    }
}

impl AdmissionController<()> {
    /// Create a builder for configuring a controller.
    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder::default()
    }
}

impl<S: Store> AdmissionController<S> {
    /// Decide whether an activity unit at `now` is admitted.
    ///
    /// # Fail-Safe Behavior
    /// Never fails. Unreadable or corrupt persisted state is replaced by the
    /// default (Open) state; a failed write switches the controller to
    /// memory-only persistence for the rest of its lifetime.
    pub fn check_admission(&self, now: Timestamp) -> AdmissionResult {
        let mut session = self.lock();
        session.refresh();

        // Only the Open branch touches the request log
        let clock_skewed = session.state.block.blocked_until.is_none()
            && session
                .state
                .requests
                .newest()
                .is_some_and(|newest| newest > now);

        let Evaluation { result, transition } = session.state.evaluate(&self.inner.policy, now);
        if transition.mutates_state() {
            session.persist();
        }
        session.last_result = result;
        drop(session);

        if clock_skewed {
            self.inner.metrics.record_clock_correction();
            tracing::info!(now, "Request log ahead of clock, clamped to now");
        }
        self.observe(transition, &result, now);
        result
    }

    /// [`check_admission`](Self::check_admission) at the controller's clock.
    pub fn check_admission_now(&self) -> AdmissionResult {
        self.check_admission(self.inner.clock.now_millis())
    }

    fn observe(&self, transition: Transition, result: &AdmissionResult, now: Timestamp) {
        let metrics = &self.inner.metrics;
        if result.allowed {
            metrics.record_admitted();
        } else {
            metrics.record_denied();
        }

        match transition {
            Transition::Admitted | Transition::StillBlocked => {}
            Transition::BlockStarted {
                minute_count,
                hour_count,
            } => {
                metrics.record_block_started();
                tracing::warn!(
                    minute_count,
                    hour_count,
                    max_per_minute = self.inner.policy.max_requests_per_minute(),
                    max_per_hour = self.inner.policy.max_requests_per_hour(),
                    blocked_until = result.blocked_until,
                    "Request limit reached, blocking"
                );
            }
            Transition::BlockMigrated { previous_until } => {
                metrics.record_block_migrated();
                tracing::info!(
                    previous_until,
                    blocked_until = result.blocked_until,
                    "Stale block rewritten to current block duration"
                );
            }
            Transition::ClockRewound { previous_until } => {
                metrics.record_clock_correction();
                tracing::info!(
                    previous_until,
                    blocked_until = result.blocked_until,
                    now,
                    "Block started in the future, restarted at now"
                );
            }
            Transition::BlockExpired => {
                metrics.record_block_expired();
                tracing::debug!(now, "Block expired");
            }
        }
    }

    /// Clear the request log, block timer and counters.
    ///
    /// The controller is Open afterwards. Never fails observably: if the
    /// store cannot be cleared the cleared state lives in memory only.
    pub fn reset(&self) {
        let mut session = self.lock();
        session.state = RateLimiterState::default();
        session.last_result = AdmissionResult::open();
        session.slot.clear();
        let mode = session.slot.mode();
        drop(session);

        tracing::info!(memory_only = mode == PersistenceMode::MemoryOnly, "Admission state reset");
    }

    /// Lift any block immediately. Identical to [`reset`](Self::reset).
    pub fn force_unblock(&self) {
        self.reset();
    }

    /// Diagnostic counts at `now`.
    ///
    /// Read-only: nothing is purged or written, and a failed read falls back
    /// to the last state this handle saw without changing persistence mode.
    pub fn stats(&self, now: Timestamp) -> AdmissionStats {
        let session = self.lock();
        let state = match session.slot.peek(RateLimiterState::decode) {
            Loaded::Value(state) => state,
            Loaded::Empty => RateLimiterState::default(),
            Loaded::ReadFailed | Loaded::Unavailable => session.state.clone(),
        };
        state.stats(&self.inner.policy, now)
    }

    /// Verdict of the most recent check made through this controller.
    pub fn last_result(&self) -> AdmissionResult {
        self.lock().last_result
    }

    /// Current persistence mode.
    pub fn persistence_mode(&self) -> PersistenceMode {
        self.lock().slot.mode()
    }

    /// Store key holding this controller's state.
    pub fn state_key(&self) -> String {
        self.lock().slot.key().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, Session<S>> {
        // A panic while holding the lock leaves a consistent state value
        // behind, so keep going with it.
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> AdmissionController<S> {
    /// The admission policy.
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.inner.policy
    }

    /// Metrics shared by this controller and its clones.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Clock used by [`check_admission_now`](Self::check_admission_now).
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}

/// Builder for constructing an [`AdmissionController`].
#[derive(Debug)]
pub struct AdmissionControllerBuilder {
    max_requests_per_minute: usize,
    max_requests_per_hour: usize,
    block_duration: Duration,
    migration_threshold: Option<Duration>,
    legacy_block_duration: Duration,
    state_key: String,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Metrics>,
}

impl Default for AdmissionControllerBuilder {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: DEFAULT_MAX_REQUESTS_PER_HOUR,
            block_duration: Duration::from_millis(DEFAULT_BLOCK_DURATION_MS),
            migration_threshold: None,
            legacy_block_duration: Duration::from_millis(DEFAULT_LEGACY_BLOCK_DURATION_MS),
            state_key: DEFAULT_STATE_KEY.to_string(),
            clock: None,
            metrics: None,
        }
    }
}

impl AdmissionControllerBuilder {
    /// Use every threshold and duration from `policy`.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.max_requests_per_minute = policy.max_requests_per_minute();
        self.max_requests_per_hour = policy.max_requests_per_hour();
        self.block_duration = policy.block_duration();
        self.migration_threshold = Some(Duration::from_millis(policy.migration_threshold_ms()));
        self.legacy_block_duration = Duration::from_millis(policy.legacy_block_duration_ms());
        self
    }

    /// Set the maximum admitted requests in any rolling minute.
    pub fn with_max_requests_per_minute(mut self, max: usize) -> Self {
        self.max_requests_per_minute = max;
        self
    }

    /// Set the maximum admitted requests in any rolling hour.
    pub fn with_max_requests_per_hour(mut self, max: usize) -> Self {
        self.max_requests_per_hour = max;
        self
    }

    /// Set how long admission is denied once a limit is reached.
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    /// Set the span above which a persisted block is rewritten.
    ///
    /// Defaults to the block duration.
    pub fn with_migration_threshold(mut self, threshold: Duration) -> Self {
        self.migration_threshold = Some(threshold);
        self
    }

    /// Set the duration assumed for persisted blocks without a start time.
    pub fn with_legacy_block_duration(mut self, duration: Duration) -> Self {
        self.legacy_block_duration = duration;
        self
    }

    /// Set the store key holding the controller's state.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Set the clock used by [`AdmissionController::check_admission_now`].
    ///
    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Report into an existing metrics tracker.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the controller over `store`.
    ///
    /// Nothing is read from the store until the first check.
    ///
    /// # Errors
    /// Returns `BuildError` if the policy is invalid or the state key is empty.
    pub fn build<S: Store>(self, store: S) -> Result<AdmissionController<S>, BuildError> {
        let mut policy = AdmissionPolicy::new(
            self.max_requests_per_minute,
            self.max_requests_per_hour,
            self.block_duration,
        )?
        .with_legacy_block_duration(self.legacy_block_duration);
        if let Some(threshold) = self.migration_threshold {
            policy = policy.with_migration_threshold(threshold)?;
        }

        if self.state_key.is_empty() {
            return Err(BuildError::EmptyKey("state key"));
        }

        let metrics = self.metrics.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let slot = PersistedSlot::new(store, self.state_key, metrics.clone());

        Ok(AdmissionController {
            inner: Arc::new(ControllerInner {
                policy,
                clock,
                metrics,
                session: Mutex::new(Session {
                    slot,
                    state: RateLimiterState::default(),
                    last_result: AdmissionResult::open(),
                }),
            }),
        })
    }
}
