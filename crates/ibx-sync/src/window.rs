//! Backfill date-window clamp.

use chrono::{DateTime, Duration, Utc};

/// Maximum historical span a single backfill may cover.
pub const MAX_BACKFILL_DAYS: i64 = 365;

/// Clamp `[start, end]` to at most [`MAX_BACKFILL_DAYS`] by advancing `start`
/// toward `end`. Returns `(start, end, clamped)`.
///
/// An inverted window (start after end) collapses to `[end, end]`.
pub fn clamp_backfill_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>, bool) {
    if start > end {
        return (end, end, true);
    }
    let max_span = Duration::days(MAX_BACKFILL_DAYS);
    if end - start > max_span {
        (end - max_span, end, true)
    } else {
        (start, end, false)
    }
}
