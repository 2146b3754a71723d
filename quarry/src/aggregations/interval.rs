//! Bucket arithmetic for histogram aggregations.

use super::types::{CalendarUnit, DateInterval};
use chrono::{DateTime, Datelike, Months, NaiveDate, SecondsFormat, TimeZone, Utc};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Start of the numeric histogram bucket containing `value`.
pub fn histogram_key(value: f64, interval: f64) -> f64 {
    (value / interval).floor() * interval
}

/// Start of the date-histogram bucket containing `millis`.
pub fn date_bucket(millis: i64, interval: DateInterval) -> i64 {
    match interval {
        DateInterval::Fixed(width) => millis.div_euclid(width) * width,
        DateInterval::Calendar(unit) => calendar_floor(millis, unit),
    }
}

/// Start of the bucket following the one starting at `start`.
pub fn next_date_bucket(start: i64, interval: DateInterval) -> i64 {
    match interval {
        DateInterval::Fixed(width) => start + width,
        DateInterval::Calendar(unit) => calendar_next(start, unit),
    }
}

fn to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn calendar_floor(millis: i64, unit: CalendarUnit) -> i64 {
    let fixed = |width: i64| millis.div_euclid(width) * width;
    match unit {
        CalendarUnit::Minute => fixed(MINUTE_MS),
        CalendarUnit::Hour => fixed(HOUR_MS),
        CalendarUnit::Day => fixed(DAY_MS),
        CalendarUnit::Week => {
            // 1970-01-01 was a Thursday; weeks start on Monday.
            let monday_offset = 3 * DAY_MS;
            (millis + monday_offset).div_euclid(7 * DAY_MS) * 7 * DAY_MS - monday_offset
        }
        CalendarUnit::Month | CalendarUnit::Quarter | CalendarUnit::Year => {
            let Some(dt) = to_datetime(millis) else {
                return millis;
            };
            let month = match unit {
                CalendarUnit::Month => dt.month(),
                CalendarUnit::Quarter => (dt.month() - 1) / 3 * 3 + 1,
                _ => 1,
            };
            NaiveDate::from_ymd_opt(dt.year(), month, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc().timestamp_millis())
                .unwrap_or(millis)
        }
    }
}

fn calendar_next(start: i64, unit: CalendarUnit) -> i64 {
    let months = match unit {
        CalendarUnit::Minute => return start + MINUTE_MS,
        CalendarUnit::Hour => return start + HOUR_MS,
        CalendarUnit::Day => return start + DAY_MS,
        CalendarUnit::Week => return start + 7 * DAY_MS,
        CalendarUnit::Month => 1,
        CalendarUnit::Quarter => 3,
        CalendarUnit::Year => 12,
    };
    to_datetime(start)
        .and_then(|dt| dt.checked_add_months(Months::new(months)))
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(start + 31 * DAY_MS * months as i64)
}

/// Parse `30s`, `5m`, `1h`, `1d` style fixed intervals to milliseconds.
pub fn parse_fixed_interval(s: &str) -> Option<i64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = s.split_at(split);
    let n: i64 = num.parse().ok().filter(|n| *n > 0)?;
    let unit_ms = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => MINUTE_MS,
        "h" => HOUR_MS,
        "d" => DAY_MS,
        _ => return None,
    };
    Some(n * unit_ms)
}

/// Parse calendar interval names (`month`, `1M`, `quarter`, ...).
pub fn parse_calendar_unit(s: &str) -> Option<CalendarUnit> {
    let unit = match s.trim() {
        "minute" | "1m" => CalendarUnit::Minute,
        "hour" | "1h" => CalendarUnit::Hour,
        "day" | "1d" => CalendarUnit::Day,
        "week" | "1w" => CalendarUnit::Week,
        "month" | "1M" => CalendarUnit::Month,
        "quarter" | "1q" => CalendarUnit::Quarter,
        "year" | "1y" => CalendarUnit::Year,
        _ => return None,
    };
    Some(unit)
}

/// RFC3339 rendering of a bucket key.
pub fn format_millis(millis: i64) -> String {
    to_datetime(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}
