//! Clock and time helpers for expiry and grace-period arithmetic.

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time for expiry and grace-period decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Expiry timestamp `days` whole days after `base_time`. Negative `days`
/// produce a timestamp in the past. `None` when the result is not a
/// representable date.
pub fn expiry_from_days(base_time: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|offset| base_time.checked_add_signed(offset))
}

/// Whole days until `expires_at`: floor(hours remaining / 24).
///
/// Negative once the expiry has passed.
pub fn days_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_hours().div_euclid(24)
}

/// Human-readable remaining time, e.g. "6d 23h" or "45m".
pub fn format_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Format a timestamp as a human-readable date (e.g., "Jan 15, 2024").
pub fn format_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%b %d, %Y").to_string()
}
