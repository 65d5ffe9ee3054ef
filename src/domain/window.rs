//! Sliding-window request log.
//!
//! The log is an ordered sequence of epoch-millisecond timestamps. Windows are
//! measured relative to `now` on every call rather than reset on a schedule.

use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Returns true if `timestamp` falls inside the window of `window_ms` ending at `now`.
///
/// Equivalent to `timestamp > now - window_ms` without underflowing when
/// `now < window_ms`. Timestamps later than `now` count as inside.
#[inline]
pub fn within_window(timestamp: Timestamp, now: Timestamp, window_ms: u64) -> bool {
    now.saturating_sub(timestamp) < window_ms
}

/// Ordered log of admitted activity timestamps.
///
/// Entries are non-decreasing. Old entries are only purged when
/// [`RequestLog::purge`] is called; counting never mutates the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestLog {
    entries: VecDeque<Timestamp>,
}

impl RequestLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp to the end of the log.
    pub fn push(&mut self, timestamp: Timestamp) {
        self.entries.push_back(timestamp);
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Timestamp> + '_ {
        self.entries.iter()
    }

    /// Most recent entry, if any.
    pub fn newest(&self) -> Option<Timestamp> {
        self.entries.back().copied()
    }

    /// Count entries inside the window of `window_ms` ending at `now`.
    pub fn count_within(&self, now: Timestamp, window_ms: u64) -> usize {
        // Entries are ordered, so scan from the newest end and stop early.
        self.entries
            .iter()
            .rev()
            .take_while(|&&ts| within_window(ts, now, window_ms))
            .count()
    }

    /// Drop entries that fell out of the window of `window_ms` ending at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge(&mut self, now: Timestamp, window_ms: u64) -> usize {
        let before = self.entries.len();
        while let Some(&oldest) = self.entries.front() {
            if within_window(oldest, now, window_ms) {
                break;
            }
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Clamp entries recorded after `now` down to `now`.
    ///
    /// Happens when the wall clock moved backward since they were recorded.
    /// Returns true if any entry was changed. Ordering is preserved.
    pub fn clamp_future(&mut self, now: Timestamp) -> bool {
        let mut changed = false;
        for ts in self.entries.iter_mut().rev() {
            if *ts <= now {
                break;
            }
            *ts = now;
            changed = true;
        }
        changed
    }

    /// Check that entries are non-decreasing.
    pub fn is_ordered(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a <= b)
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<Timestamp> for RequestLog {
    fn from_iter<I: IntoIterator<Item = Timestamp>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
