//! Time-predicate injection into push-query text.
//!
//! Plain string rewriting against a small accepted query shape. The predicate
//! goes, in order of preference:
//!
//! 1. into an existing `WHERE`, joined with `AND`;
//! 2. after a `WINDOW TUMBLING (...)` parameter list;
//! 3. right after the `FROM <source>` reference.
//!
//! A range placeholder is replaced with the range width in whole seconds and
//! the statement is terminated with `;`.

use std::sync::LazyLock;

use bolt_core::time::{format_bound, parse_timestamp};
use bolt_core::TimeRange;
use chrono::{DateTime, Utc};
use regex::Regex;

static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\sWHERE\s").unwrap());

static TUMBLING_WINDOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\sWINDOW\s+TUMBLING\s*(\([^)]*\))").unwrap());

static FROM_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\sFROM\s+([^\s;()]+)").unwrap());

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRewriter {
    pub time_column: String,
    /// Use `<=` rather than `<` for the upper bound.
    pub upper_inclusive: bool,
    pub placeholder: String,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self {
            time_column: "ROWTIME".into(),
            upper_inclusive: false,
            placeholder: "_RANGE_".into(),
        }
    }
}

impl QueryRewriter {
    pub fn new(time_column: impl Into<String>, upper_inclusive: bool, placeholder: impl Into<String>) -> Self {
        Self {
            time_column: time_column.into(),
            upper_inclusive,
            placeholder: placeholder.into(),
        }
    }

    fn predicate(&self, lower: &str, upper: Option<&str>) -> String {
        let mut clause = format!("{} >= '{}'", self.time_column, lower);
        if let Some(upper) = upper {
            let op = if self.upper_inclusive { "<=" } else { "<" };
            clause.push_str(&format!(" AND {} {} '{}'", self.time_column, op, upper));
        }
        clause
    }

    /// Rewrite `query` for the given bounds. `now` stands in for a missing
    /// upper bound when computing the range width.
    pub fn rewrite(&self, query: &str, lower: &str, upper: Option<&str>, now: DateTime<Utc>) -> String {
        let predicate = self.predicate(lower, upper);
        let mut text = query.trim_end().to_string();

        if let Some(m) = WHERE_CLAUSE.find(&text) {
            text.insert_str(m.end(), &format!("{predicate} AND "));
        } else if let Some(group) = TUMBLING_WINDOW.captures(&text).and_then(|c| c.get(1)) {
            text.insert_str(group.end(), &format!(" WHERE {predicate}"));
        } else if let Some(group) = FROM_SOURCE.captures(&text).and_then(|c| c.get(1)) {
            text.insert_str(group.end(), &format!(" WHERE {predicate}"));
        } else {
            tracing::warn!(query, "no injection point for time predicate");
        }

        if !text.ends_with(';') {
            text.push(';');
        }

        if !self.placeholder.is_empty() && text.contains(&self.placeholder) {
            match range_seconds(lower, upper, now) {
                Some(secs) => text = text.replace(&self.placeholder, &secs.to_string()),
                None => tracing::debug!(lower, "range placeholder left as is, lower bound unparseable"),
            }
        }
        text
    }

    /// Rewrite for a panel range: relative ranges are open-ended.
    pub fn rewrite_for_range(&self, query: &str, range: &TimeRange, now: DateTime<Utc>) -> String {
        let lower = format_bound(range.lower_bound());
        let upper = range.upper_bound().map(format_bound);
        self.rewrite(query, &lower, upper.as_deref(), now)
    }
}

fn range_seconds(lower: &str, upper: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    let lower = parse_timestamp(lower)?;
    let upper = match upper {
        Some(raw) => parse_timestamp(raw)?,
        None => now,
    };
    let millis = (upper - lower).num_milliseconds().abs();
    Some((millis + 500) / 1000)
}
