//! Shared formatting for CLI commands.

use chrono::{DateTime, Duration, Local, Utc};

/// Formats a duration as `HH:MM:SS`; negative durations render as zero.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Formats an instant as local wall-clock `HH:MM:SS`.
pub fn format_local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Formats fractional hours with two decimals.
pub fn format_hours(hours: f64) -> String {
    format!("{hours:.2}")
}

/// The IANA name of the local time zone, falling back to UTC.
pub fn timezone_name() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}
