//! Clock adapters for time operations.
//!
//! Provides SystemClock implementation for production use.
//!
//! # Testing
//!
//! See `MockClock` (in `crate::infrastructure::mocks`) for a controllable test clock.
//! Available with the `test-helpers` feature or in test builds.

use crate::application::ports::Clock;
use crate::domain::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock reading milliseconds since the Unix epoch.
///
/// Persisted timestamps must survive restarts, so this is wall-clock time
/// rather than a monotonic `Instant`. A clock set before 1970 reads as 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().try_into().unwrap_or(Timestamp::MAX))
            .unwrap_or(0)
    }
}
