//! Mock clock for testing.

use crate::application::ports::Clock;
use crate::domain::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock clock for testing.
///
/// Allows tests to control wall-clock time explicitly, including moving it
/// backwards, so block expiry and clock anomalies can be tested
/// deterministically.
///
/// # Examples
///
/// ```
/// use visit_throttle::infrastructure::mocks::MockClock;
/// use visit_throttle::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_000);
/// assert_eq!(clock.now_millis(), 1_000);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_millis(), 11_000);
///
/// // Clones share the same time
/// let other = clock.clone();
/// other.set(500);
/// assert_eq!(clock.now_millis(), 500);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock reading `start` milliseconds since the epoch.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move the clock back by a duration, saturating at zero.
    pub fn rewind(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_sub(ms))
            });
    }

    /// Set the clock to a specific time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
