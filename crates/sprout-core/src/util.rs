//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a Unix-millisecond timestamp as an ISO-8601 instant (UTC).
///
/// Returns an empty string for timestamps outside chrono's representable
/// range; callers only pass wall-clock values.
pub fn format_instant(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Parse an ISO-8601 instant into Unix milliseconds.
///
/// Returns `None` for malformed timestamps.
pub fn parse_instant(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|instant| instant.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_instant_round_trips() {
        let millis = 1_700_000_000_123;
        let formatted = format_instant(millis);
        assert_eq!(parse_instant(&formatted), Some(millis));
    }

    #[test]
    fn parse_instant_accepts_offsets() {
        let millis = parse_instant("2024-01-01T12:00:00+02:00").unwrap();
        assert_eq!(millis, parse_instant("2024-01-01T10:00:00Z").unwrap());
    }

    #[test]
    fn parse_instant_rejects_malformed_values() {
        assert_eq!(parse_instant("yesterday"), None);
        assert_eq!(parse_instant(""), None);
        assert_eq!(parse_instant("2024-13-01T00:00:00Z"), None);
    }
}
