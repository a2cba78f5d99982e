//! Timestamp Helpers

use chrono::Utc;

/// Seconds in a day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Current time as Unix seconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Start of the UTC day containing `timestamp`
pub fn start_of_day(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day() {
        // 2023-11-14T22:13:20Z
        assert_eq!(start_of_day(1_700_000_000), 1_699_920_000);
        assert_eq!(start_of_day(1_699_920_000), 1_699_920_000);
        assert_eq!(start_of_day(-1), -SECONDS_PER_DAY);
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        assert!(current_timestamp() > 1_700_000_000);
    }
}
