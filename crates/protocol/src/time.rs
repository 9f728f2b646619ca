//! UTC timestamp formatting for report events
//!
//! Event timestamps are ISO 8601 with second precision. The helper runs once
//! and exits, so whole seconds are enough to order events from one job.

use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: u64 = 86400;
const SECONDS_PER_HOUR: u64 = 3600;
const SECONDS_PER_MINUTE: u64 = 60;

/// Seconds since the Unix epoch, or 0 if the clock is before 1970
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current time as `YYYY-MM-DDTHH:MM:SSZ`
pub fn now_iso8601() -> String {
    to_iso8601(unix_now())
}

/// Convert a Unix timestamp to ISO 8601 format
pub fn to_iso8601(secs: u64) -> String {
    let days = secs / SECONDS_PER_DAY;
    let (year, month, day) = days_to_ymd(days);

    format!("{:04}-{:02}-{:02}T{}Z", year, month, day, clock_time(secs))
}

/// Wall-clock part of a Unix timestamp as `HH:MM:SS`
pub fn clock_time(secs: u64) -> String {
    let remaining = secs % SECONDS_PER_DAY;
    let hours = remaining / SECONDS_PER_HOUR;
    let remaining = remaining % SECONDS_PER_HOUR;
    let minutes = remaining / SECONDS_PER_MINUTE;
    let seconds = remaining % SECONDS_PER_MINUTE;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Convert days since Unix epoch to year, month, day
fn days_to_ymd(days: u64) -> (u32, u32, u32) {
    let mut remaining_days = days as i64;
    let mut year = 1970i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1u32;
    for &days_in_month in &days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    (year as u32, month, (remaining_days + 1) as u32)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
