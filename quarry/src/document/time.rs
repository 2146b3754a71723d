//! Parsing of `time` field values into epoch milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Parse a JSON value as a point in time.
///
/// Numbers are epoch milliseconds (seconds under `epoch_second`). Strings
/// are tried against each `||`-separated alternative of `format`, or
/// against RFC3339 and a few ISO shapes when no format is set.
pub fn parse_time(value: &Value, format: Option<&str>) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            match format {
                Some(f) if f.split("||").any(|alt| alt.trim() == "epoch_second") => {
                    raw.checked_mul(1000)
                }
                _ => Some(raw),
            }
        }
        Value::String(s) => match format {
            Some(format) => format
                .split("||")
                .find_map(|alt| parse_with(s.trim(), alt.trim())),
            None => parse_default(s.trim()),
        },
        _ => None,
    }
}

/// Parse a document's `@timestamp`: an RFC3339 string or an epoch-millis
/// number. Looser date shapes are left to mapped `time` fields.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

fn parse_default(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
    }
    s.parse::<i64>().ok()
}

fn parse_with(s: &str, format: &str) -> Option<i64> {
    match format {
        "epoch_millis" => s.parse::<i64>().ok(),
        "epoch_second" => s.parse::<i64>().ok()?.checked_mul(1000),
        "strict_date_optional_time" | "date_optional_time" | "date_time" => parse_default(s),
        _ if format.contains('%') => parse_strftime(s, format),
        _ => parse_strftime(s, &java_to_strftime(format)),
    }
}

fn parse_strftime(s: &str, pattern: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_str(s, pattern) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, pattern)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Convert an Elasticsearch (Java) date pattern such as
/// `yyyy-MM-dd HH:mm:ss` into a strftime pattern.
pub fn java_to_strftime(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // Quoted literal.
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let spec = match (c, run) {
            ('y' | 'u', 2) => "%y",
            ('y' | 'u', _) => "%Y",
            ('M', 1 | 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', _) => "%d",
            ('H', _) => "%H",
            ('h', _) => "%I",
            ('m', _) => "%M",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('X' | 'Z' | 'x', _) => "%:z",
            ('E', _) => "%a",
            _ => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
                i += run;
                continue;
            }
        };
        out.push_str(spec);
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_formats() {
        assert_eq!(parse_time(&json!("1970-01-01T00:00:01Z"), None), Some(1000));
        assert_eq!(parse_time(&json!("1970-01-02"), None), Some(86_400_000));
        assert_eq!(parse_time(&json!(1500), None), Some(1500));
        assert_eq!(parse_time(&json!("yesterday"), None), None);
        assert_eq!(parse_time(&json!(true), None), None);
    }

    #[test]
    fn test_timestamp_is_rfc3339_or_millis() {
        assert_eq!(parse_timestamp(&json!("1970-01-01T00:00:01.5+00:00")), Some(1500));
        assert_eq!(parse_timestamp(&json!(1500)), Some(1500));
        assert_eq!(parse_timestamp(&json!("1970-01-02")), None);
        assert_eq!(parse_timestamp(&json!("1970-01-01 00:00:01")), None);
        assert_eq!(parse_timestamp(&json!("1500")), None);
        assert_eq!(parse_timestamp(&json!(1.5)), None);
    }

    #[test]
    fn test_java_pattern() {
        assert_eq!(java_to_strftime("yyyy-MM-dd HH:mm:ss"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(java_to_strftime("yyyy-MM-dd'T'HH:mm"), "%Y-%m-%dT%H:%M");
        assert_eq!(
            parse_time(&json!("1970-01-01 00:01:00"), Some("yyyy-MM-dd HH:mm:ss")),
            Some(60_000)
        );
    }

    #[test]
    fn test_format_alternatives() {
        let format = Some("yyyy/MM/dd||epoch_second");
        assert_eq!(parse_time(&json!("1970/01/02"), format), Some(86_400_000));
        assert_eq!(parse_time(&json!("2"), format), Some(2000));
        assert_eq!(parse_time(&json!(3), format), Some(3000));
        assert_eq!(parse_time(&json!("%d"), Some("%Y")), None);
    }
}
