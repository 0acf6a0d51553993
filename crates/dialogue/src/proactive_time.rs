//! Quiet-hour window parsing and arithmetic.

use chrono::{DateTime, Duration, TimeZone, Timelike};

/// Parse `"HH-HH"` into `(start, end)` hours. Malformed strings and
/// out-of-range hours yield `None` (no quiet window).
pub fn parse_quiet_hours(value: &str) -> Option<(u32, u32)> {
    let (start, end) = value.split_once('-')?;
    let start: u32 = start.trim().parse().ok()?;
    let end: u32 = end.trim().parse().ok()?;
    if start > 23 || end > 23 {
        return None;
    }
    Some((start, end))
}

/// Whether `now` falls inside the closed-open window `[start, end)`. A
/// window with `start > end` wraps midnight; `start == end` is no window.
pub fn is_quiet_time<Tz: TimeZone>(now: &DateTime<Tz>, start_hour: u32, end_hour: u32) -> bool {
    if start_hour == end_hour {
        return false;
    }
    let hour = now.hour();
    if start_hour < end_hour {
        start_hour <= hour && hour < end_hour
    } else {
        hour >= start_hour || hour < end_hour
    }
}

/// The next wall-clock moment at which the quiet window ends.
pub fn next_quiet_end<Tz: TimeZone>(
    now: &DateTime<Tz>,
    start_hour: u32,
    end_hour: u32,
) -> DateTime<Tz> {
    let today_end = at_hour(now, end_hour);
    if start_hour < end_hour {
        if today_end > *now {
            return today_end;
        }
        return today_end + Duration::days(1);
    }
    // Wrapping window: inside the pre-midnight leg the end is tomorrow.
    if now.hour() >= start_hour {
        return today_end + Duration::days(1);
    }
    if today_end > *now {
        today_end
    } else {
        today_end + Duration::days(1)
    }
}

fn at_hour<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    now.with_hour(hour)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(|| now.clone())
}
