//! Quiet-hours predicate for the notification dispatcher.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Parses an `"HH:MM"` boundary. Returns `None` on anything malformed —
/// callers treat a malformed boundary as "quiet hours not configured".
fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// `isInQuietHours(channel, now)`.
///
/// Inclusive at `start`, exclusive at `end`; a `start > end` denotes a
/// midnight-spanning window (`current ≥ start ∨ current < end`). An invalid
/// `timezone` string falls back to UTC rather than erroring, since a
/// misconfigured channel should degrade to "not quiet" behavior in UTC
/// rather than block delivery entirely.
pub fn is_in_quiet_hours(start: &str, end: &str, timezone: &str, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return false;
    };

    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    let local_time = now.with_timezone(&tz).time();

    if start <= end {
        local_time >= start && local_time < end
    } else {
        local_time >= start || local_time < end
    }
}
