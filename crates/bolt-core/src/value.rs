use serde::{Deserialize, Serialize};

use crate::time::epoch_millis;

/// Semantic type of a column, inferred from the header schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Time,
    String,
    Number,
    /// Schema entry that could not be read. Holds its position so later
    /// columns stay aligned with row cells.
    Other,
}

impl ColumnKind {
    /// Classify a declared schema type. Only the textual types map to
    /// `String`; everything else is treated as numeric.
    pub fn from_declared(declared: &str) -> Self {
        let base = declared
            .trim()
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");
        if base.eq_ignore_ascii_case("VARCHAR") || base.eq_ignore_ascii_case("STRING") {
            Self::String
        } else {
            Self::Number
        }
    }

    /// Fields of these kinds identify a logical row; numeric fields are payload.
    pub fn is_identity(self) -> bool {
        matches!(self, Self::Time | Self::String)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A scalar cell. Time values are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Time(i64),
    Number(f64),
    Text(String),
}

impl Value {
    /// Convert a raw JSON cell according to the column kind it lands in.
    pub fn from_json(raw: &serde_json::Value, kind: ColumnKind) -> Self {
        use serde_json::Value as J;
        match (kind, raw) {
            (_, J::Null) => Self::Null,
            (ColumnKind::Time, other) => epoch_millis(other).map_or(Self::Null, Self::Time),
            (ColumnKind::Number, J::Number(n)) => n.as_f64().map_or(Self::Null, Self::Number),
            (ColumnKind::Number, J::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Self::Number(f),
                Err(_) => Self::Text(s.clone()),
            },
            (_, J::Bool(b)) => Self::Bool(*b),
            (_, J::String(s)) => Self::Text(s.clone()),
            (_, other) => Self::Text(other.to_string()),
        }
    }

    pub fn as_time(&self) -> Option<i64> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One decoded record: column name to value, in column order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Set a field, replacing an existing value of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<N: Into<String>> FromIterator<(N, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (N, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declared_types_classify() {
        assert_eq!(ColumnKind::from_declared("VARCHAR"), ColumnKind::String);
        assert_eq!(ColumnKind::from_declared("string"), ColumnKind::String);
        assert_eq!(ColumnKind::from_declared("VARCHAR(64)"), ColumnKind::String);
        assert_eq!(ColumnKind::from_declared("BIGINT"), ColumnKind::Number);
        assert_eq!(ColumnKind::from_declared("DOUBLE"), ColumnKind::Number);
        assert_eq!(ColumnKind::from_declared("DECIMAL(10, 2)"), ColumnKind::Number);
        assert_eq!(ColumnKind::from_declared("BOOLEAN"), ColumnKind::Number);
    }

    #[test]
    fn identity_kinds() {
        assert!(ColumnKind::Time.is_identity());
        assert!(ColumnKind::String.is_identity());
        assert!(!ColumnKind::Number.is_identity());
        assert!(!ColumnKind::Other.is_identity());
    }

    #[test]
    fn json_cells_convert_by_kind() {
        assert_eq!(Value::from_json(&json!(1000), ColumnKind::Time), Value::Time(1000));
        assert_eq!(Value::from_json(&json!(20), ColumnKind::Number), Value::Number(20.0));
        assert_eq!(Value::from_json(&json!("21.5"), ColumnKind::Number), Value::Number(21.5));
        assert_eq!(
            Value::from_json(&json!("a"), ColumnKind::String),
            Value::Text("a".into())
        );
        assert_eq!(Value::from_json(&json!(null), ColumnKind::Number), Value::Null);
        assert_eq!(Value::from_json(&json!("never"), ColumnKind::Time), Value::Null);
        assert_eq!(
            Value::from_json(&json!([1, 2]), ColumnKind::String),
            Value::Text("[1,2]".into())
        );
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let row = vec![
            Value::Time(1000),
            Value::Text("a".into()),
            Value::Number(20.0),
            Value::Null,
        ];
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, json!([1000, "a", 20.0, null]));
    }

    #[test]
    fn row_insert_replaces_by_name() {
        let mut row = Row::new();
        row.insert("A", Value::Number(1.0));
        row.insert("B", Value::Number(2.0));
        row.insert("A", Value::Number(3.0));
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("A"), Some(&Value::Number(3.0)));
        let names: Vec<&str> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn row_collects_from_pairs() {
        let row: Row = vec![("T", Value::Time(1)), ("X", Value::Null)]
            .into_iter()
            .collect();
        assert_eq!(row.get("T").and_then(Value::as_time), Some(1));
        assert!(row.get("X").is_some_and(Value::is_null));
        assert!(row.get("Y").is_none());
    }
}
