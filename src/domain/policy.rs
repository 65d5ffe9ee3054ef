//! Admission policy configuration.
//!
//! The policy holds the thresholds and durations that drive the admission
//! state machine. Values are validated on construction so the state machine
//! never has to handle a degenerate configuration.

use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum admitted requests in any rolling minute.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: usize = 50;

/// Default maximum admitted requests in any rolling hour.
pub const DEFAULT_MAX_REQUESTS_PER_HOUR: usize = 300;

/// Default block duration (2 minutes).
pub const DEFAULT_BLOCK_DURATION_MS: u64 = 2 * 60 * 1000;

/// Block duration assumed for persisted blocks that carry no start time (10 minutes).
pub const DEFAULT_LEGACY_BLOCK_DURATION_MS: u64 = 10 * 60 * 1000;

/// Error returned when policy validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Per-minute limit must be greater than zero
    ZeroMinuteLimit,
    /// Per-hour limit must be greater than zero
    ZeroHourLimit,
    /// Block duration must be greater than zero
    ZeroBlockDuration,
    /// Migration threshold must be at least the block duration
    MigrationThresholdBelowBlockDuration {
        /// Configured threshold in milliseconds
        threshold_ms: u64,
        /// Configured block duration in milliseconds
        block_duration_ms: u64,
    },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::ZeroMinuteLimit => {
                write!(f, "max requests per minute must be greater than 0")
            }
            PolicyError::ZeroHourLimit => write!(f, "max requests per hour must be greater than 0"),
            PolicyError::ZeroBlockDuration => write!(f, "block duration must be greater than 0"),
            PolicyError::MigrationThresholdBelowBlockDuration {
                threshold_ms,
                block_duration_ms,
            } => write!(
                f,
                "migration threshold ({}ms) must not be shorter than the block duration ({}ms)",
                threshold_ms, block_duration_ms
            ),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Thresholds and durations for admission decisions.
///
/// # Example
/// ```
/// use visit_throttle::AdmissionPolicy;
/// use std::time::Duration;
///
/// let policy = AdmissionPolicy::new(10, 100, Duration::from_secs(30)).unwrap();
/// assert_eq!(policy.max_requests_per_minute(), 10);
/// assert_eq!(policy.block_duration_ms(), 30_000);
///
/// // A block longer than the threshold is rewritten to the current duration
/// assert_eq!(policy.migration_threshold_ms(), 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAdmissionPolicy", into = "RawAdmissionPolicy")]
pub struct AdmissionPolicy {
    max_requests_per_minute: usize,
    max_requests_per_hour: usize,
    block_duration_ms: u64,
    migration_threshold_ms: u64,
    legacy_block_duration_ms: u64,
}

impl AdmissionPolicy {
    /// Create a policy with the given limits.
    ///
    /// The migration threshold defaults to the block duration.
    ///
    /// # Errors
    /// Returns `PolicyError` if a limit or the duration is zero.
    pub fn new(
        max_requests_per_minute: usize,
        max_requests_per_hour: usize,
        block_duration: Duration,
    ) -> Result<Self, PolicyError> {
        let block_duration_ms = duration_ms(block_duration);
        Self::from_parts(
            max_requests_per_minute,
            max_requests_per_hour,
            block_duration_ms,
            block_duration_ms,
            DEFAULT_LEGACY_BLOCK_DURATION_MS,
        )
    }

    fn from_parts(
        max_requests_per_minute: usize,
        max_requests_per_hour: usize,
        block_duration_ms: u64,
        migration_threshold_ms: u64,
        legacy_block_duration_ms: u64,
    ) -> Result<Self, PolicyError> {
        if max_requests_per_minute == 0 {
            return Err(PolicyError::ZeroMinuteLimit);
        }
        if max_requests_per_hour == 0 {
            return Err(PolicyError::ZeroHourLimit);
        }
        if block_duration_ms == 0 {
            return Err(PolicyError::ZeroBlockDuration);
        }
        // A lower threshold would rewrite every fresh block on each check,
        // pushing the end of the block forward forever.
        if migration_threshold_ms < block_duration_ms {
            return Err(PolicyError::MigrationThresholdBelowBlockDuration {
                threshold_ms: migration_threshold_ms,
                block_duration_ms,
            });
        }
        Ok(Self {
            max_requests_per_minute,
            max_requests_per_hour,
            block_duration_ms,
            migration_threshold_ms,
            legacy_block_duration_ms,
        })
    }

    /// Set the span above which a persisted block is considered stale.
    ///
    /// # Errors
    /// Returns `PolicyError::MigrationThresholdBelowBlockDuration` if the
    /// threshold is shorter than the block duration.
    pub fn with_migration_threshold(self, threshold: Duration) -> Result<Self, PolicyError> {
        Self::from_parts(
            self.max_requests_per_minute,
            self.max_requests_per_hour,
            self.block_duration_ms,
            duration_ms(threshold),
            self.legacy_block_duration_ms,
        )
    }

    /// Set the duration assumed for persisted blocks without a start time.
    pub fn with_legacy_block_duration(mut self, duration: Duration) -> Self {
        self.legacy_block_duration_ms = duration_ms(duration);
        self
    }

    /// Maximum admitted requests in any rolling minute.
    pub fn max_requests_per_minute(&self) -> usize {
        self.max_requests_per_minute
    }

    /// Maximum admitted requests in any rolling hour.
    pub fn max_requests_per_hour(&self) -> usize {
        self.max_requests_per_hour
    }

    /// Block duration in milliseconds.
    pub fn block_duration_ms(&self) -> u64 {
        self.block_duration_ms
    }

    /// Block duration.
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    /// Span (in milliseconds) above which a persisted block is rewritten.
    pub fn migration_threshold_ms(&self) -> u64 {
        self.migration_threshold_ms
    }

    /// Duration assumed for persisted blocks that carry no start time.
    pub fn legacy_block_duration_ms(&self) -> u64 {
        self.legacy_block_duration_ms
    }

    /// Start time to assume for a block ending at `blocked_until`.
    pub(crate) fn assumed_block_start(
        &self,
        blocked_until: Timestamp,
        block_start_time: Option<Timestamp>,
    ) -> Timestamp {
        block_start_time
            .unwrap_or_else(|| blocked_until.saturating_sub(self.legacy_block_duration_ms))
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: DEFAULT_MAX_REQUESTS_PER_HOUR,
            block_duration_ms: DEFAULT_BLOCK_DURATION_MS,
            migration_threshold_ms: DEFAULT_BLOCK_DURATION_MS,
            legacy_block_duration_ms: DEFAULT_LEGACY_BLOCK_DURATION_MS,
        }
    }
}

/// Unvalidated wire form of [`AdmissionPolicy`] used for (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawAdmissionPolicy {
    max_requests_per_minute: usize,
    max_requests_per_hour: usize,
    block_duration_ms: u64,
    migration_threshold_ms: Option<u64>,
    legacy_block_duration_ms: u64,
}

impl Default for RawAdmissionPolicy {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: DEFAULT_MAX_REQUESTS_PER_HOUR,
            block_duration_ms: DEFAULT_BLOCK_DURATION_MS,
            // Follows block_duration_ms unless set explicitly
            migration_threshold_ms: None,
            legacy_block_duration_ms: DEFAULT_LEGACY_BLOCK_DURATION_MS,
        }
    }
}

impl TryFrom<RawAdmissionPolicy> for AdmissionPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawAdmissionPolicy) -> Result<Self, Self::Error> {
        AdmissionPolicy::from_parts(
            raw.max_requests_per_minute,
            raw.max_requests_per_hour,
            raw.block_duration_ms,
            raw.migration_threshold_ms.unwrap_or(raw.block_duration_ms),
            raw.legacy_block_duration_ms,
        )
    }
}

impl From<AdmissionPolicy> for RawAdmissionPolicy {
    fn from(policy: AdmissionPolicy) -> Self {
        Self {
            max_requests_per_minute: policy.max_requests_per_minute,
            max_requests_per_hour: policy.max_requests_per_hour,
            block_duration_ms: policy.block_duration_ms,
            migration_threshold_ms: Some(policy.migration_threshold_ms),
            legacy_block_duration_ms: policy.legacy_block_duration_ms,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = AdmissionPolicy::default();
        assert_eq!(policy.max_requests_per_minute(), 50);
        assert_eq!(policy.max_requests_per_hour(), 300);
        assert_eq!(policy.block_duration_ms(), 120_000);
        assert_eq!(policy.migration_threshold_ms(), 120_000);
        assert_eq!(policy.legacy_block_duration_ms(), 600_000);
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert_eq!(
            AdmissionPolicy::new(0, 10, Duration::from_secs(1)),
            Err(PolicyError::ZeroMinuteLimit)
        );
        assert_eq!(
            AdmissionPolicy::new(10, 0, Duration::from_secs(1)),
            Err(PolicyError::ZeroHourLimit)
        );
        assert_eq!(
            AdmissionPolicy::new(10, 10, Duration::ZERO),
            Err(PolicyError::ZeroBlockDuration)
        );
    }

    #[test]
    fn test_migration_threshold_validation() {
        let policy = AdmissionPolicy::new(10, 10, Duration::from_secs(60)).unwrap();

        let err = policy
            .clone()
            .with_migration_threshold(Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::MigrationThresholdBelowBlockDuration { .. }
        ));

        let relaxed = policy
            .with_migration_threshold(Duration::from_secs(300))
            .unwrap();
        assert_eq!(relaxed.migration_threshold_ms(), 300_000);
    }

    #[test]
    fn test_assumed_block_start() {
        let policy = AdmissionPolicy::default();
        assert_eq!(policy.assumed_block_start(1_000_000, Some(5)), 5);
        assert_eq!(policy.assumed_block_start(1_000_000, None), 400_000);
        assert_eq!(policy.assumed_block_start(100, None), 0);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: AdmissionPolicy =
            serde_json::from_str(r#"{"max_requests_per_minute": 5, "block_duration_ms": 1000}"#)
                .unwrap();
        assert_eq!(policy.max_requests_per_minute(), 5);
        assert_eq!(policy.max_requests_per_hour(), 300);
        assert_eq!(policy.block_duration_ms(), 1_000);
        assert_eq!(policy.migration_threshold_ms(), 1_000);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let result: Result<AdmissionPolicy, _> =
            serde_json::from_str(r#"{"max_requests_per_hour": 0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_display() {
        let err = PolicyError::MigrationThresholdBelowBlockDuration {
            threshold_ms: 10,
            block_duration_ms: 20,
        };
        assert_eq!(
            err.to_string(),
            "migration threshold (10ms) must not be shorter than the block duration (20ms)"
        );
    }
}
