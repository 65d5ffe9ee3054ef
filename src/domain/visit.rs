//! Visit records, the bounded visit log and the suspicion snapshot.

use crate::domain::state::StateError;
use crate::domain::window::within_window;
use crate::domain::{Timestamp, FIVE_MINUTES_MS, HOUR_MS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::str::FromStr;

/// Default maximum number of retained visit records.
pub const DEFAULT_VISIT_CAPACITY: usize = 100;

/// How a page was reached, as reported by navigation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitKind {
    /// Regular navigation
    Navigate,
    /// Page reload
    Reload,
    /// History traversal
    BackForward,
    /// No navigation signal available
    #[serde(other)]
    Unknown,
}

impl VisitKind {
    /// Classify an optional navigation-timing type string.
    ///
    /// A missing or unrecognized signal yields `Unknown`.
    pub fn from_navigation_type(signal: Option<&str>) -> Self {
        match signal {
            Some(s) => s.parse().unwrap_or(VisitKind::Unknown),
            None => VisitKind::Unknown,
        }
    }

    /// Name as reported by navigation timing.
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitKind::Navigate => "navigate",
            VisitKind::Reload => "reload",
            VisitKind::BackForward => "back_forward",
            VisitKind::Unknown => "unknown",
        }
    }
}

impl FromStr for VisitKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "navigate" => VisitKind::Navigate,
            "reload" => VisitKind::Reload,
            "back_forward" => VisitKind::BackForward,
            _ => VisitKind::Unknown,
        })
    }
}

impl std::fmt::Display for VisitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed navigation, focus or visibility event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Route path that was visited
    pub path: String,
    /// When the visit was observed
    pub timestamp: Timestamp,
    /// Navigation classification
    #[serde(rename = "type")]
    pub kind: VisitKind,
    /// Referring URL, empty if none
    #[serde(default)]
    pub referrer: String,
    /// User agent string, empty if unknown
    #[serde(rename = "userAgent", default)]
    pub agent: String,
}

impl VisitRecord {
    /// Create a record with empty referrer and agent.
    pub fn new(path: impl Into<String>, kind: VisitKind, timestamp: Timestamp) -> Self {
        Self {
            path: path.into(),
            timestamp,
            kind,
            referrer: String::new(),
            agent: String::new(),
        }
    }

    /// Set the referrer.
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    /// Set the user agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }
}

/// Visit log holding at most `capacity` records, oldest evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitLog {
    records: VecDeque<VisitRecord>,
    capacity: usize,
}

impl VisitLog {
    /// Create an empty log with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_VISIT_CAPACITY)),
            capacity,
        }
    }

    /// Build a log from stored records, keeping only the most recent `capacity`.
    pub fn from_records(records: Vec<VisitRecord>, capacity: usize) -> Self {
        let mut records: VecDeque<_> = records.into();
        while records.len() > capacity {
            records.pop_front();
        }
        Self { records, capacity }
    }

    /// Append a record, evicting the oldest ones beyond capacity.
    ///
    /// Returns the number of evicted records.
    pub fn push(&mut self, record: VisitRecord) -> usize {
        self.records.push_back(record);
        let mut evicted = 0;
        while self.records.len() > self.capacity {
            self.records.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of retained records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over retained records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VisitRecord> + '_ {
        self.records.iter()
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Decode a JSON array of records, keeping the most recent `capacity`.
    ///
    /// # Errors
    /// Returns `StateError::Decode` if the bytes are not a record array.
    pub fn decode(bytes: &[u8], capacity: usize) -> Result<Self, StateError> {
        let records: Vec<VisitRecord> =
            serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        Ok(Self::from_records(records, capacity))
    }

    /// Encode the records as a JSON array, oldest first.
    ///
    /// # Errors
    /// Returns `StateError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(&self.records).map_err(|e| StateError::Encode(e.to_string()))
    }

    /// Derive the suspicion snapshot at `now`.
    pub fn snapshot(
        &self,
        rules: &SuspicionRules,
        now: Timestamp,
        rapid_refresh_flagged: bool,
    ) -> SuspicionSnapshot {
        let mut recent_visits = 0;
        let mut hourly_visits = 0;
        let mut refresh_count = 0;
        let mut navigation_count = 0;

        for record in &self.records {
            if within_window(record.timestamp, now, rules.hourly_window_ms) {
                hourly_visits += 1;
            }
            if within_window(record.timestamp, now, rules.recent_window_ms) {
                recent_visits += 1;
                match record.kind {
                    VisitKind::Reload => refresh_count += 1,
                    VisitKind::Navigate => navigation_count += 1,
                    VisitKind::BackForward | VisitKind::Unknown => {}
                }
            }
        }

        SuspicionSnapshot {
            total_visits: self.records.len(),
            recent_visits,
            hourly_visits,
            refresh_count,
            navigation_count,
            suspicious: refresh_count > rules.max_refreshes
                || recent_visits > rules.max_recent_visits,
            rapid_refresh_flagged,
        }
    }
}

/// Windows and thresholds for the suspicion heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspicionRules {
    /// Short window in milliseconds (default 5 minutes)
    pub recent_window_ms: u64,
    /// Long window in milliseconds (default 1 hour)
    pub hourly_window_ms: u64,
    /// Reloads in the short window above which activity is suspicious
    pub max_refreshes: usize,
    /// Visits in the short window above which activity is suspicious
    pub max_recent_visits: usize,
}

impl Default for SuspicionRules {
    fn default() -> Self {
        Self {
            recent_window_ms: FIVE_MINUTES_MS,
            hourly_window_ms: HOUR_MS,
            max_refreshes: 10,
            max_recent_visits: 20,
        }
    }
}

/// Diagnostic summary of recent navigation. Never consulted for admission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspicionSnapshot {
    /// All retained visits
    pub total_visits: usize,
    /// Visits in the short window
    pub recent_visits: usize,
    /// Visits in the long window
    pub hourly_visits: usize,
    /// Reloads in the short window
    pub refresh_count: usize,
    /// Navigations in the short window
    pub navigation_count: usize,
    /// Whether the short-window counts exceed their thresholds
    pub suspicious: bool,
    /// Whether a burst of rapid unloads was ever flagged
    pub rapid_refresh_flagged: bool,
}

/// Detects bursts of page unloads in quick succession.
///
/// Each unload within `interval_ms` of the previous one counts as rapid;
/// once more than `threshold` rapid unloads have been seen the detector
/// reports the burst. The count is kept for the lifetime of the detector.
#[derive(Debug, Clone)]
pub struct RapidUnloadDetector {
    interval_ms: u64,
    threshold: u32,
    last_unload: Option<Timestamp>,
    rapid_count: u32,
}

impl RapidUnloadDetector {
    /// Create a detector.
    pub fn new(interval_ms: u64, threshold: u32) -> Self {
        Self {
            interval_ms,
            threshold,
            last_unload: None,
            rapid_count: 0,
        }
    }

    /// Record an unload at `now`. Returns true if the burst threshold is exceeded.
    pub fn record(&mut self, now: Timestamp) -> bool {
        if let Some(last) = self.last_unload {
            if now.saturating_sub(last) < self.interval_ms {
                self.rapid_count = self.rapid_count.saturating_add(1);
            }
        }
        self.last_unload = Some(now);
        self.rapid_count > self.threshold
    }

    /// Rapid unloads seen so far.
    pub fn rapid_count(&self) -> u32 {
        self.rapid_count
    }
}

impl Default for RapidUnloadDetector {
    fn default() -> Self {
        Self::new(1_000, 5)
    }
}
