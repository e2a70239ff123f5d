//! Header schema interpretation.
//!
//! A header record carries the result schema as text:
//! `` `WINDOWSTART` BIGINT, `NAME` VARCHAR, `TEMP` DOUBLE ``. Position 0 is
//! the primary time column whatever its declared type.

use std::sync::LazyLock;

use bolt_core::{Column, ColumnKind};
use regex::Regex;

/// Column names that always carry window-start instants.
pub const WINDOW_START: &str = "WINDOWSTART";

static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*`(.*?)`\s+(.+?)\s*$").unwrap());

/// Parse a schema string into its ordered columns. An entry that does not
/// match `` `NAME` TYPE `` keeps its slot as a [`ColumnKind::Other`] column
/// named by its raw text (a Time column in position 0).
pub fn parse_header(schema: &str) -> Vec<Column> {
    let mut columns = Vec::new();
    for entry in split_entries(schema) {
        let Some(caps) = FIELD_PATTERN.captures(entry) else {
            tracing::debug!(entry, "unparseable schema entry kept as placeholder");
            let kind = if columns.is_empty() { ColumnKind::Time } else { ColumnKind::Other };
            columns.push(Column::new(entry.trim(), kind));
            continue;
        };
        let name = caps[1].to_string();
        let kind = if columns.is_empty() || name.eq_ignore_ascii_case(WINDOW_START) {
            ColumnKind::Time
        } else {
            ColumnKind::from_declared(&caps[2])
        };
        columns.push(Column { name, kind });
    }
    columns
}

/// Split on top-level commas, leaving commas inside backticks or type
/// parameters (`DECIMAL(10, 2)`, `STRUCT<A INT, B INT>`) alone.
fn split_entries(schema: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in schema.char_indices() {
        match c {
            '`' => quoted = !quoted,
            '(' | '<' if !quoted => depth += 1,
            ')' | '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                entries.push(&schema[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&schema[start..]);
    entries.retain(|e| !e.trim().is_empty());
    entries
}
