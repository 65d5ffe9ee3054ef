//! Persisted admission state and the Open/Blocked state machine.
//!
//! [`RateLimiterState`] is the value stored under the controller's key. All
//! transitions happen in [`RateLimiterState::evaluate`], which is pure: the
//! caller decides whether and where to persist the result.

use crate::domain::countdown::{block_progress, format_countdown};
use crate::domain::policy::AdmissionPolicy;
use crate::domain::window::RequestLog;
use crate::domain::{Timestamp, HOUR_MS, MINUTE_MS};
use serde::{Deserialize, Serialize};

/// Error raised when persisted state cannot be decoded or violates an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Stored bytes are not a valid encoding
    Decode(String),
    /// State could not be encoded
    Encode(String),
    /// Decoded state violates an invariant
    Invalid(&'static str),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Decode(e) => write!(f, "failed to decode persisted state: {}", e),
            StateError::Encode(e) => write!(f, "failed to encode state: {}", e),
            StateError::Invalid(reason) => write!(f, "persisted state is invalid: {}", reason),
        }
    }
}

impl std::error::Error for StateError {}

/// Block timer. `blocked_until` is set if and only if the controller is Blocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    /// End of the current block
    #[serde(default)]
    pub blocked_until: Option<Timestamp>,
    /// When the current block began
    #[serde(default)]
    pub block_start_time: Option<Timestamp>,
}

impl BlockState {
    /// A block running from `start` for `duration_ms`.
    pub fn starting_at(start: Timestamp, duration_ms: u64) -> Self {
        Self {
            blocked_until: Some(start.saturating_add(duration_ms)),
            block_start_time: Some(start),
        }
    }
}

/// Request log, block timer and counters, persisted together under one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterState {
    /// Timestamps of admitted requests
    #[serde(default)]
    pub requests: RequestLog,
    /// Current block, if any
    #[serde(flatten)]
    pub block: BlockState,
    /// Lifetime count of checks that reached the limit evaluation
    #[serde(default)]
    pub total_requests: u64,
}

/// Which edge of the state machine a check followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Open -> Open, request appended
    Admitted,
    /// Open -> Blocked, a limit was reached
    BlockStarted {
        /// Requests in the rolling minute when the block began
        minute_count: usize,
        /// Requests in the rolling hour when the block began
        hour_count: usize,
    },
    /// Blocked -> Blocked, nothing changed
    StillBlocked,
    /// Blocked -> Blocked, a block longer than the migration threshold was
    /// rewritten to the current duration
    BlockMigrated {
        /// End of the block before the rewrite
        previous_until: Timestamp,
    },
    /// Blocked -> Blocked, the block started in the future (clock moved
    /// backward) and was restarted at `now`
    ClockRewound {
        /// End of the block before the rewrite
        previous_until: Timestamp,
    },
    /// Blocked -> Open, the block ran out
    BlockExpired,
}

impl Transition {
    /// Check if this transition changed the state and needs persisting.
    pub fn mutates_state(&self) -> bool {
        !matches!(self, Transition::StillBlocked)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    /// Whether the activity unit is admitted
    pub allowed: bool,
    /// End of the current block, if blocked
    pub blocked_until: Option<Timestamp>,
    /// Whole seconds until the block ends, rounded up; zero when open
    pub remaining_seconds: u32,
}

impl AdmissionResult {
    /// Result for an open controller.
    pub fn open() -> Self {
        Self {
            allowed: true,
            blocked_until: None,
            remaining_seconds: 0,
        }
    }

    /// Result for a block ending at `blocked_until`, observed at `now`.
    pub fn blocked(blocked_until: Timestamp, now: Timestamp) -> Self {
        Self {
            allowed: false,
            blocked_until: Some(blocked_until),
            remaining_seconds: remaining_seconds(blocked_until, now),
        }
    }

    /// Check if this result denies admission.
    pub fn is_blocked(&self) -> bool {
        !self.allowed
    }

    /// Remaining block time as `m:ss`.
    pub fn formatted_remaining(&self) -> String {
        format_countdown(self.remaining_seconds)
    }

    /// Fraction of a block of `block_duration_ms` already served, in `[0.0, 1.0]`.
    pub fn progress(&self, block_duration_ms: u64) -> f64 {
        if self.allowed {
            return 1.0;
        }
        block_progress(self.remaining_seconds, block_duration_ms)
    }
}

/// Read-only diagnostic view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStats {
    /// Requests in the rolling minute
    pub requests_last_minute: usize,
    /// Requests in the rolling hour
    pub requests_last_hour: usize,
    /// Lifetime request count
    pub total_requests: u64,
    /// Configured per-minute limit
    pub max_per_minute: usize,
    /// Configured per-hour limit
    pub max_per_hour: usize,
}

/// Result of [`RateLimiterState::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Verdict returned to the caller
    pub result: AdmissionResult,
    /// Edge of the state machine that was taken
    pub transition: Transition,
}

impl RateLimiterState {
    /// Decode state from its JSON encoding and check its invariants.
    ///
    /// # Errors
    /// Returns `StateError` if the bytes cannot be decoded or the decoded
    /// state is inconsistent.
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        let state: Self =
            serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    /// Encode state as JSON.
    ///
    /// # Errors
    /// Returns `StateError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    /// Check the invariants a decoded state must satisfy.
    ///
    /// # Errors
    /// Returns `StateError::Invalid` naming the first violated invariant.
    pub fn validate(&self) -> Result<(), StateError> {
        if !self.requests.is_ordered() {
            return Err(StateError::Invalid("request log is not ordered"));
        }
        match (self.block.blocked_until, self.block.block_start_time) {
            (None, Some(_)) => Err(StateError::Invalid("block start without block end")),
            (Some(until), Some(start)) if start > until => {
                Err(StateError::Invalid("block starts after it ends"))
            }
            _ => Ok(()),
        }
    }

    /// Check if the state is Blocked at `now`.
    pub fn is_blocked_at(&self, now: Timestamp) -> bool {
        self.block.blocked_until.is_some_and(|until| now < until)
    }

    /// Run one admission check at `now`, applying the resulting transition.
    pub fn evaluate(&mut self, policy: &AdmissionPolicy, now: Timestamp) -> Evaluation {
        if let Some(blocked_until) = self.block.blocked_until {
            if now < blocked_until {
                return self.evaluate_blocked(policy, blocked_until, now);
            }

            // The expiring check only reopens; it does not count as a request.
            self.block = BlockState::default();
            return Evaluation {
                result: AdmissionResult::open(),
                transition: Transition::BlockExpired,
            };
        }

        self.requests.clamp_future(now);
        self.requests.purge(now, HOUR_MS);

        let minute_count = self.requests.count_within(now, MINUTE_MS);
        let hour_count = self.requests.len();

        if minute_count >= policy.max_requests_per_minute()
            || hour_count >= policy.max_requests_per_hour()
        {
            self.block = BlockState::starting_at(now, policy.block_duration_ms());
            self.total_requests = self.total_requests.saturating_add(1);
            return self.denied(
                now,
                Transition::BlockStarted {
                    minute_count,
                    hour_count,
                },
            );
        }

        self.requests.push(now);
        self.total_requests = self.total_requests.saturating_add(1);
        Evaluation {
            result: AdmissionResult::open(),
            transition: Transition::Admitted,
        }
    }

    fn evaluate_blocked(
        &mut self,
        policy: &AdmissionPolicy,
        blocked_until: Timestamp,
        now: Timestamp,
    ) -> Evaluation {
        let start = policy.assumed_block_start(blocked_until, self.block.block_start_time);

        if start > now {
            self.block = BlockState::starting_at(now, policy.block_duration_ms());
            return self.denied(
                now,
                Transition::ClockRewound {
                    previous_until: blocked_until,
                },
            );
        }

        if blocked_until - start > policy.migration_threshold_ms() {
            self.block = BlockState::starting_at(now, policy.block_duration_ms());
            return self.denied(
                now,
                Transition::BlockMigrated {
                    previous_until: blocked_until,
                },
            );
        }

        Evaluation {
            result: AdmissionResult::blocked(blocked_until, now),
            transition: Transition::StillBlocked,
        }
    }

    fn denied(&self, now: Timestamp, transition: Transition) -> Evaluation {
        let until = self.block.blocked_until.unwrap_or(now);
        Evaluation {
            result: AdmissionResult::blocked(until, now),
            transition,
        }
    }

    /// Diagnostic counts at `now`. Does not purge or otherwise mutate.
    pub fn stats(&self, policy: &AdmissionPolicy, now: Timestamp) -> AdmissionStats {
        AdmissionStats {
            requests_last_minute: self.requests.count_within(now, MINUTE_MS),
            requests_last_hour: self.requests.count_within(now, HOUR_MS),
            total_requests: self.total_requests,
            max_per_minute: policy.max_requests_per_minute(),
            max_per_hour: policy.max_requests_per_hour(),
        }
    }
}

fn remaining_seconds(blocked_until: Timestamp, now: Timestamp) -> u32 {
    let remaining_ms = blocked_until.saturating_sub(now);
    remaining_ms
        .div_ceil(1000)
        .try_into()
        .unwrap_or(u32::MAX)
}
