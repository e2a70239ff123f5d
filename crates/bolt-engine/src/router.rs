//! Row routing: which buffer(s) a decoded data record lands in.

use bolt_core::time::epoch_millis;
use bolt_core::{Column, ColumnKind, FanoutMode, IngestError, Row, Value};
use serde_json::Value as Json;

/// Destination key used in single fan-out mode.
pub const DEFAULT_DESTINATION: &str = "default";

/// A buffer a row can be routed to, with the fields that buffer holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub key: String,
    pub fields: Vec<Column>,
}

/// Compute the destinations implied by a column set.
///
/// Single mode has one destination carrying every column. Multiple mode has
/// one destination per numeric column, each carrying the primary time column
/// plus that column; string columns are labels, not series.
pub fn destinations(columns: &[Column], mode: FanoutMode) -> Vec<Destination> {
    let Some(time) = columns.first() else {
        return Vec::new();
    };
    match mode {
        FanoutMode::Single => vec![Destination {
            key: DEFAULT_DESTINATION.to_string(),
            fields: columns.to_vec(),
        }],
        FanoutMode::Multiple => columns[1..]
            .iter()
            .filter(|c| c.kind == ColumnKind::Number)
            .map(|c| Destination {
                key: c.name.clone(),
                fields: vec![time.clone(), c.clone()],
            })
            .collect(),
    }
}

/// Routes raw column arrays for one header generation.
#[derive(Clone, Debug)]
pub struct RowRouter {
    columns: Vec<Column>,
    mode: FanoutMode,
    destinations: Vec<Destination>,
}

impl RowRouter {
    pub fn new(columns: Vec<Column>, mode: FanoutMode) -> Self {
        let destinations = destinations(&columns, mode);
        Self {
            columns,
            mode,
            destinations,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn mode(&self) -> FanoutMode {
        self.mode
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Route one data record.
    ///
    /// `limit_ms` is the latest primary time accepted; anything beyond it
    /// belongs to a window that has already closed on a later reconnect.
    pub fn route(&self, raw: &[Json], limit_ms: i64) -> Result<Vec<(String, Row)>, IngestError> {
        if self.columns.is_empty() {
            return Err(IngestError::MissingHeader);
        }
        if raw.len() != self.columns.len() {
            return Err(IngestError::RowShape {
                expected: self.columns.len(),
                actual: raw.len(),
            });
        }

        let time = epoch_millis(&raw[0]).ok_or_else(|| IngestError::BadTime(raw[0].to_string()))?;
        if time > limit_ms {
            return Err(IngestError::OutsideWindow {
                time,
                limit: limit_ms,
            });
        }

        let time_name = &self.columns[0].name;
        let routed = match self.mode {
            FanoutMode::Single => {
                let mut row = Row::with_capacity(self.columns.len());
                row.insert(time_name.clone(), Value::Time(time));
                for (col, cell) in self.columns.iter().zip(raw).skip(1) {
                    row.insert(col.name.clone(), Value::from_json(cell, col.kind));
                }
                vec![(DEFAULT_DESTINATION.to_string(), row)]
            }
            FanoutMode::Multiple => self
                .columns
                .iter()
                .zip(raw)
                .skip(1)
                .filter(|(col, _)| col.kind == ColumnKind::Number)
                .map(|(col, cell)| {
                    let mut row = Row::with_capacity(2);
                    row.insert(time_name.clone(), Value::Time(time));
                    row.insert(col.name.clone(), Value::from_json(cell, col.kind));
                    (col.name.clone(), row)
                })
                .collect(),
        };
        Ok(routed)
    }
}
