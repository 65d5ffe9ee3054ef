//! Countdown helpers for presenting a block to the user.

/// Format whole seconds as `m:ss`.
///
/// # Example
/// ```
/// use visit_throttle::domain::countdown::format_countdown;
///
/// assert_eq!(format_countdown(120), "2:00");
/// assert_eq!(format_countdown(65), "1:05");
/// assert_eq!(format_countdown(0), "0:00");
/// ```
pub fn format_countdown(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Fraction of a block already served, clamped to `[0.0, 1.0]`.
///
/// Remaining time longer than the block (a stale, longer block) reports `0.0`.
pub fn block_progress(remaining_seconds: u32, block_duration_ms: u64) -> f64 {
    let total_seconds = block_duration_ms as f64 / 1000.0;
    if total_seconds <= 0.0 {
        return 1.0;
    }
    let served = (total_seconds - f64::from(remaining_seconds)) / total_seconds;
    served.clamp(0.0, 1.0)
}
