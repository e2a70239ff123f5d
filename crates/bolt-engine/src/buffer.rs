//! Bounded, time-ordered series buffer.
//!
//! Rows are kept sorted ascending by the primary time field (field 0). Late
//! rows are inserted in place rather than appended, and once the buffer is
//! over capacity the oldest rows are evicted.

use std::collections::VecDeque;

use bolt_core::{Column, ColumnKind, FieldSnapshot, IngestError, Row, SeriesSnapshot, StaleReplacement, Value};

/// What an upsert did to the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// Appended at the tail.
    Appended,
    /// Late row inserted before the row now at `position + 1`.
    Inserted(usize),
    /// Same logical row already stored; payload refreshed.
    Overwritten(usize),
    /// Identical row already stored.
    Unchanged(usize),
}

#[derive(Debug)]
pub struct SeriesBuffer {
    key: String,
    ref_id: String,
    fields: Vec<Column>,
    rows: VecDeque<Vec<Value>>,
    capacity: usize,
}

impl SeriesBuffer {
    /// `fields[0]` must be the primary time column.
    pub fn new(key: impl Into<String>, ref_id: impl Into<String>, fields: Vec<Column>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key: key.into(),
            ref_id: ref_id.into(),
            fields,
            rows: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[Column] {
        &self.fields
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Primary time of the row at `index`.
    pub fn time_at(&self, index: usize) -> Option<i64> {
        self.rows.get(index).and_then(|r| r[0].as_time())
    }

    pub fn times(&self) -> Vec<i64> {
        self.rows.iter().filter_map(|r| r[0].as_time()).collect()
    }

    pub fn last_time(&self) -> Option<i64> {
        self.rows.back().and_then(|r| r[0].as_time())
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        let values = self.rows.get(index)?;
        Some(
            self.fields
                .iter()
                .zip(values)
                .map(|(f, v)| (f.name.clone(), v.clone()))
                .collect(),
        )
    }

    /// Insert or update a row, keeping the time field non-decreasing.
    pub fn upsert(&mut self, row: &Row) -> Result<Upsert, IngestError> {
        let values: Vec<Value> = self
            .fields
            .iter()
            .map(|f| row.get(&f.name).cloned().unwrap_or(Value::Null))
            .collect();
        let time = values[0]
            .as_time()
            .ok_or_else(|| IngestError::BadTime(format!("{:?}", values[0])))?;

        // Rows sharing this time are contiguous.
        let lo = self.rows.partition_point(|r| time_of(r) < time);
        let hi = self.rows.partition_point(|r| time_of(r) <= time);

        for i in lo..hi {
            if self.same_identity(&self.rows[i], &values) {
                if self.rows[i] == values {
                    return Ok(Upsert::Unchanged(i));
                }
                self.rows[i] = values;
                return Ok(Upsert::Overwritten(i));
            }
        }

        let outcome = if hi == self.rows.len() {
            self.rows.push_back(values);
            Upsert::Appended
        } else {
            self.rows.insert(hi, values);
            Upsert::Inserted(hi)
        };

        let mut evicted = 0;
        while self.rows.len() > self.capacity {
            self.rows.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(key = %self.key, evicted, "evicted oldest rows");
        }
        Ok(outcome)
    }

    /// String and time fields decide whether two rows are the same logical row.
    fn same_identity(&self, stored: &[Value], incoming: &[Value]) -> bool {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind.is_identity())
            .all(|(i, _)| stored[i] == incoming[i])
    }

    /// Neutralize rows whose time lies in `[floor, cutoff)`: string fields are
    /// cleared, numeric fields replaced, time fields and `preserved` fields
    /// kept. Returns the number of rows touched.
    pub fn neutralize(
        &mut self,
        cutoff: i64,
        floor: Option<i64>,
        replacement: StaleReplacement,
        preserved: &[String],
    ) -> usize {
        let start = floor.map_or(0, |f| self.rows.partition_point(|r| time_of(r) < f));
        let end = self.rows.partition_point(|r| time_of(r) < cutoff);
        if start >= end {
            return 0;
        }

        let numeric = match replacement {
            StaleReplacement::Null => Value::Null,
            StaleReplacement::Zero => Value::Number(0.0),
        };
        for row in self.rows.range_mut(start..end) {
            for (field, value) in self.fields.iter().zip(row.iter_mut()).skip(1) {
                if preserved.iter().any(|p| *p == field.name) {
                    continue;
                }
                match field.kind {
                    ColumnKind::String | ColumnKind::Other => *value = Value::Null,
                    ColumnKind::Number => *value = numeric.clone(),
                    ColumnKind::Time => {}
                }
            }
        }
        end - start
    }

    /// Column-major copy for the panel.
    pub fn snapshot(&self) -> SeriesSnapshot {
        let fields = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| FieldSnapshot {
                name: f.name.clone(),
                kind: f.kind,
                values: self.rows.iter().map(|r| r[i].clone()).collect(),
            })
            .collect();
        SeriesSnapshot {
            name: self.key.clone(),
            ref_id: self.ref_id.clone(),
            fields,
            length: self.rows.len(),
        }
    }
}

fn time_of(row: &[Value]) -> i64 {
    row[0].as_time().unwrap_or(i64::MIN)
}
