//! Domain layer - pure admission and visit logic with no I/O.
//!
//! This layer contains the core concepts and invariants of the throttle:
//! - Sliding-window request log arithmetic
//! - Admission policy and the Open/Blocked state machine
//! - Bounded visit log and suspicion snapshot
//! - Countdown formatting helpers
//!
//! Every operation takes `now` explicitly, so all types here are
//! deterministic and easily testable.

pub mod countdown;
pub mod policy;
pub mod state;
pub mod visit;
pub mod window;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// One minute in milliseconds.
pub const MINUTE_MS: u64 = 60_000;

/// Five minutes in milliseconds.
pub const FIVE_MINUTES_MS: u64 = 5 * MINUTE_MS;

/// One hour in milliseconds.
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
