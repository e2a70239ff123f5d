//! Time ranges and timestamp handling.
//!
//! The panel hands us a range whose lower bound is either relative
//! (`now-15m`) or absolute. Relative ranges have no upper predicate bound and
//! keep moving, which is what lets the sweeper neutralize points that have
//! scrolled out of view.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("invalid relative time: {0}")]
    InvalidRelative(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// The visible time range of a panel query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// The lower bound as the host expressed it, e.g. `now-6h`.
    pub raw_from: String,
}

impl TimeRange {
    /// Build a range ending at `now` from a relative expression.
    pub fn relative(raw_from: &str, now: DateTime<Utc>) -> Result<Self, TimeError> {
        let lookback = parse_relative(raw_from)?;
        Ok(Self {
            from: now - lookback,
            to: now,
            raw_from: raw_from.trim().to_string(),
        })
    }

    pub fn absolute(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            raw_from: from.to_rfc3339(),
        }
    }

    /// Parse either form: `now-…` is relative, anything else must be a timestamp.
    pub fn parse(raw_from: &str, raw_to: Option<&str>, now: DateTime<Utc>) -> Result<Self, TimeError> {
        if is_relative_expr(raw_from) {
            return Self::relative(raw_from, now);
        }
        let from = parse_timestamp(raw_from)
            .ok_or_else(|| TimeError::InvalidTimestamp(raw_from.to_string()))?;
        let to = match raw_to {
            Some(raw) => {
                parse_timestamp(raw).ok_or_else(|| TimeError::InvalidTimestamp(raw.to_string()))?
            }
            None => now,
        };
        Ok(Self::absolute(from, to))
    }

    pub fn is_relative(&self) -> bool {
        is_relative_expr(&self.raw_from)
    }

    pub fn lower_bound(&self) -> DateTime<Utc> {
        self.from
    }

    /// Upper bound for the query predicate. Relative ranges are open-ended.
    pub fn upper_bound(&self) -> Option<DateTime<Utc>> {
        if self.is_relative() {
            None
        } else {
            Some(self.to)
        }
    }

    /// How far back a relative range reaches.
    pub fn lookback(&self) -> Option<Duration> {
        if self.is_relative() {
            parse_relative(&self.raw_from).ok()
        } else {
            None
        }
    }
}

fn is_relative_expr(raw: &str) -> bool {
    raw.trim_start().starts_with("now")
}

/// Parse `now`, `now-15m`, `now-6h`, `now-7d/d` into a lookback duration.
/// Units: `s`, `m`, `h`, `d`, `w`. A rounding suffix after `/` is ignored.
pub fn parse_relative(raw: &str) -> Result<Duration, TimeError> {
    let invalid = || TimeError::InvalidRelative(raw.to_string());

    let expr = raw.trim();
    let expr = expr.split('/').next().unwrap_or(expr);
    let rest = expr.strip_prefix("now").ok_or_else(invalid)?;
    if rest.is_empty() {
        return Ok(Duration::zero());
    }

    let rest = rest.strip_prefix('-').ok_or_else(invalid)?;
    let split = rest
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (digits, unit) = rest.split_at(split);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    };
    duration.ok_or_else(invalid)
}

/// Format an instant the way the query endpoint expects it in predicates.
pub fn format_bound(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3f+0000").to_string()
}

/// Parse a timestamp string. Accepts RFC 3339, `+0000`-style offsets and
/// offset-less forms (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Epoch milliseconds from a JSON time value: a number of milliseconds or a
/// timestamp string.
pub fn epoch_millis(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| parse_timestamp(s).map(|dt| dt.timestamp_millis())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn relative_units() {
        assert_eq!(parse_relative("now-30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_relative("now-15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_relative("now-6h").unwrap(), Duration::hours(6));
        assert_eq!(parse_relative("now-7d").unwrap(), Duration::days(7));
        assert_eq!(parse_relative("now-2w").unwrap(), Duration::weeks(2));
        assert_eq!(parse_relative("now").unwrap(), Duration::zero());
    }

    #[test]
    fn relative_rounding_suffix_is_ignored() {
        assert_eq!(parse_relative("now-1d/d").unwrap(), Duration::days(1));
    }

    #[test]
    fn relative_rejects_garbage() {
        assert!(parse_relative("yesterday").is_err());
        assert!(parse_relative("now-").is_err());
        assert!(parse_relative("now-15").is_err());
        assert!(parse_relative("now-15y").is_err());
        assert!(parse_relative("now+5m").is_err());
    }

    #[test]
    fn relative_range_has_no_upper_bound() {
        let now = at("2024-01-01T12:00:00Z");
        let range = TimeRange::relative("now-1h", now).unwrap();
        assert!(range.is_relative());
        assert_eq!(range.lower_bound(), at("2024-01-01T11:00:00Z"));
        assert_eq!(range.upper_bound(), None);
        assert_eq!(range.lookback(), Some(Duration::hours(1)));
    }

    #[test]
    fn absolute_range_has_upper_bound() {
        let range = TimeRange::absolute(at("2024-01-01T00:00:00Z"), at("2024-01-02T00:00:00Z"));
        assert!(!range.is_relative());
        assert_eq!(range.upper_bound(), Some(at("2024-01-02T00:00:00Z")));
        assert_eq!(range.lookback(), None);
    }

    #[test]
    fn parse_dispatches_on_form() {
        let now = at("2024-01-01T12:00:00Z");
        assert!(TimeRange::parse("now-5m", None, now).unwrap().is_relative());

        let abs = TimeRange::parse("2024-01-01T00:00:00Z", Some("2024-01-01T06:00:00Z"), now).unwrap();
        assert_eq!(abs.upper_bound(), Some(at("2024-01-01T06:00:00Z")));

        assert!(TimeRange::parse("soon", None, now).is_err());
    }

    #[test]
    fn bound_format_matches_endpoint_convention() {
        let s = format_bound(at("2024-03-05T07:08:09.123Z"));
        assert_eq!(s, "2024-03-05T07:08:09.123+0000");
        assert_eq!(parse_timestamp(&s), Some(at("2024-03-05T07:08:09.123Z")));
    }

    #[test]
    fn timestamp_forms() {
        let expected = at("2024-01-01T00:00:00Z");
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00+0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[test]
    fn epoch_millis_from_json() {
        assert_eq!(epoch_millis(&json!(1000)), Some(1000));
        assert_eq!(epoch_millis(&json!(1500.7)), Some(1500));
        assert_eq!(epoch_millis(&json!("2000")), Some(2000));
        assert_eq!(
            epoch_millis(&json!("1970-01-01T00:00:01Z")),
            Some(1000)
        );
        assert_eq!(epoch_millis(&json!(null)), None);
        assert_eq!(epoch_millis(&json!("later")), None);
    }
}
