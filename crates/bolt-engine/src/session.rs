//! Per-panel ingest state.
//!
//! A `PanelSession` composes the reassembler, header interpretation, routing
//! and buffers for one panel query. It is driven by exactly one task, so
//! nothing in here needs locking.

use bolt_core::{
    Column, FrameEvent, IngestError, PanelId, PanelResponse, QueryOptions, Record, SeriesSnapshot, ServerFrame,
    TimeRange,
};
use chrono::{DateTime, Duration, Utc};

use crate::buffer::{SeriesBuffer, Upsert};
use crate::chunk::ChunkReassembler;
use crate::header::parse_header;
use crate::router::RowRouter;
use crate::sweep::{sweep_buffers, SweepReport, SweepState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// How far past the range's upper bound (or now) a row may lie.
    pub future_tolerance: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            future_tolerance: Duration::seconds(300),
        }
    }
}

/// Outcome of feeding one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestReport {
    pub documents: usize,
    pub header_seen: bool,
    pub rows_applied: usize,
    pub rows_dropped: usize,
    /// Errors to deliver to the panel.
    pub errors: Vec<IngestError>,
}

impl IngestReport {
    /// Whether the panel should get a fresh snapshot.
    pub fn changed(&self) -> bool {
        self.header_seen || self.rows_applied > 0
    }
}

#[derive(Debug)]
pub struct PanelSession {
    panel_id: PanelId,
    ref_id: String,
    options: QueryOptions,
    range: TimeRange,
    limits: SessionLimits,
    reassembler: ChunkReassembler,
    router: Option<RowRouter>,
    buffers: Vec<SeriesBuffer>,
    sweep_state: SweepState,
    dirty: bool,
}

impl PanelSession {
    pub fn new(
        panel_id: PanelId,
        ref_id: impl Into<String>,
        options: QueryOptions,
        range: TimeRange,
        limits: SessionLimits,
    ) -> Self {
        Self {
            panel_id,
            ref_id: ref_id.into(),
            options,
            range,
            limits,
            reassembler: ChunkReassembler::new(),
            router: None,
            buffers: Vec::new(),
            sweep_state: SweepState::new(),
            dirty: false,
        }
    }

    pub fn panel_id(&self) -> &PanelId {
        &self.panel_id
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    pub fn columns(&self) -> &[Column] {
        match &self.router {
            Some(router) => router.columns(),
            None => &[],
        }
    }

    pub fn buffers(&self) -> &[SeriesBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, key: &str) -> Option<&SeriesBuffer> {
        self.buffers.iter().find(|b| b.key() == key)
    }

    /// Latest primary time accepted, in epoch millis.
    pub fn limit_ms(&self, now: DateTime<Utc>) -> i64 {
        let upper = self.range.upper_bound().unwrap_or(now);
        (upper + self.limits.future_tolerance).timestamp_millis()
    }

    /// Apply one bridge frame. Error frames are surfaced; the socket stays up.
    pub fn apply_frame(&mut self, frame: ServerFrame, now: DateTime<Utc>) -> IngestReport {
        match frame.into_event() {
            FrameEvent::Data(text) => self.ingest(&text, now),
            FrameEvent::Error(message) => IngestReport {
                errors: vec![IngestError::Remote(message)],
                ..IngestReport::default()
            },
            FrameEvent::Empty => IngestReport::default(),
        }
    }

    /// Feed a raw data fragment and apply whatever document it completes.
    pub fn ingest(&mut self, fragment: &str, now: DateTime<Utc>) -> IngestReport {
        let mut report = IngestReport::default();
        let Some(records) = self.reassembler.feed(fragment) else {
            return report;
        };
        report.documents = 1;

        let limit = self.limit_ms(now);
        for raw in records {
            match Record::from_json(raw) {
                Record::Header { schema } => {
                    self.apply_header(&schema);
                    report.header_seen = true;
                }
                Record::Row { columns } => match self.apply_row(&columns, limit) {
                    Ok(applied) => report.rows_applied += applied,
                    Err(e) => {
                        tracing::debug!(panel_id = %self.panel_id, error = %e, kind = e.error_kind(), "row discarded");
                        report.rows_dropped += 1;
                    }
                },
                Record::StatementError { message } => {
                    tracing::warn!(panel_id = %self.panel_id, %message, "statement error from upstream");
                    report.errors.push(IngestError::Statement(message));
                }
                Record::Other(raw) => {
                    let e = IngestError::UnknownRecord(raw.to_string());
                    tracing::debug!(panel_id = %self.panel_id, error = %e, "record skipped");
                }
            }
        }

        if report.changed() {
            self.dirty = true;
        }
        report
    }

    /// Install a column set, rebuilding destinations. Buffers whose key and
    /// fields are unchanged keep their rows; the rest are replaced or dropped.
    fn apply_header(&mut self, schema: &str) {
        let router = RowRouter::new(parse_header(schema), self.options.fanout_mode);
        let mut previous = std::mem::take(&mut self.buffers);

        for dest in router.destinations() {
            let kept = previous
                .iter()
                .position(|b| b.key() == dest.key && b.fields() == dest.fields.as_slice())
                .map(|i| previous.swap_remove(i));
            self.buffers.push(kept.unwrap_or_else(|| {
                SeriesBuffer::new(
                    dest.key.clone(),
                    self.ref_id.clone(),
                    dest.fields.clone(),
                    self.options.capacity(),
                )
            }));
        }

        tracing::info!(
            panel_id = %self.panel_id,
            columns = router.columns().len(),
            destinations = self.buffers.len(),
            dropped = previous.len(),
            "header applied"
        );
        self.router = Some(router);
    }

    fn apply_row(&mut self, columns: &[serde_json::Value], limit: i64) -> Result<usize, IngestError> {
        let router = self.router.as_ref().ok_or(IngestError::MissingHeader)?;
        let routed = router.route(columns, limit)?;

        let mut applied = 0;
        for (key, row) in routed {
            let Some(buffer) = self.buffers.iter_mut().find(|b| b.key() == key) else {
                continue;
            };
            if !matches!(buffer.upsert(&row)?, Upsert::Unchanged(_)) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Neutralize stale points; marks the session dirty when anything changed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let report = sweep_buffers(&mut self.buffers, &mut self.sweep_state, &self.options, &self.range, now);
        if report.swept() {
            tracing::debug!(panel_id = %self.panel_id, neutralized = report.neutralized, "stale points neutralized");
            self.dirty = true;
        }
        report
    }

    /// Forget any partial document, e.g. when the socket is replaced.
    pub fn reset_stream(&mut self) {
        self.reassembler.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear and return the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        self.buffers.iter().map(SeriesBuffer::snapshot).collect()
    }

    /// Snapshot keyed by the query's ref id.
    pub fn response(&self) -> PanelResponse {
        PanelResponse::data(self.snapshot(), self.ref_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_core::{FanoutMode, Value};
    use chrono::TimeZone;

    const HEADER: &str = r#"[{"header":{"schema":"`WINDOWSTART` BIGINT,`NAME` VARCHAR,`TEMP` DOUBLE"}},"#;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_000_000).unwrap()
    }

    fn session(mode: FanoutMode) -> PanelSession {
        let options = QueryOptions {
            fanout_mode: mode,
            ..QueryOptions::new("SELECT * FROM S EMIT CHANGES")
        };
        PanelSession::new(
            PanelId::from_raw("7"),
            "A",
            options,
            TimeRange::relative("now-15m", now()).unwrap(),
            SessionLimits::default(),
        )
    }

    #[test]
    fn single_mode_scenario() {
        let mut s = session(FanoutMode::Single);
        let report = s.ingest(HEADER, now());
        assert!(report.header_seen);
        assert_eq!(report.rows_applied, 0);

        let report = s.ingest(r#"{"row":{"columns":[1000,"a",20]}},"#, now());
        assert_eq!(report.rows_applied, 1);

        assert_eq!(s.buffers().len(), 1);
        let row = s.buffer("default").unwrap().row(0).unwrap();
        assert_eq!(row.get("WINDOWSTART"), Some(&Value::Time(1000)));
        assert_eq!(row.get("NAME"), Some(&Value::Text("a".into())));
        assert_eq!(row.get("TEMP"), Some(&Value::Number(20.0)));
    }

    #[test]
    fn multiple_mode_scenario() {
        let mut s = session(FanoutMode::Multiple);
        s.ingest(HEADER, now());
        s.ingest(r#"{"row":{"columns":[1000,"a",20]}},"#, now());

        assert_eq!(s.buffers().len(), 1);
        let temp = s.buffer("TEMP").unwrap();
        assert_eq!(temp.len(), 1);
        let row = temp.row(0).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("TEMP"), Some(&Value::Number(20.0)));
        assert!(s.buffer("NAME").is_none());
    }

    #[test]
    fn split_document_is_applied_once_complete() {
        let mut s = session(FanoutMode::Single);
        let text = format!("{HEADER}{}", r#"{"row":{"columns":[1000,"a",20]}}]"#);
        let (a, b) = text.split_at(text.len() / 2);
        assert_eq!(s.ingest(a, now()).documents, 0);
        let report = s.ingest(b, now());
        assert!(report.header_seen);
        assert_eq!(report.rows_applied, 1);
    }

    #[test]
    fn rows_before_header_are_dropped() {
        let mut s = session(FanoutMode::Single);
        let report = s.ingest(r#"[{"row":{"columns":[1000,"a",20]}}]"#, now());
        assert_eq!(report.rows_dropped, 1);
        assert!(report.errors.is_empty());
        assert!(!report.changed());
    }

    #[test]
    fn bad_rows_do_not_stop_the_document() {
        let mut s = session(FanoutMode::Single);
        s.ingest(HEADER, now());
        let report = s.ingest(
            r#"{"row":{"columns":[1000,"a"]}},{"row":{"columns":[2000,"b",1]}},{"other":true},"#,
            now(),
        );
        assert_eq!(report.rows_dropped, 1);
        assert_eq!(report.rows_applied, 1);
    }

    #[test]
    fn future_rows_are_discarded() {
        let mut s = session(FanoutMode::Single);
        s.ingest(HEADER, now());
        let limit = s.limit_ms(now());
        assert_eq!(limit, 1_000_000 + 300_000);
        let report = s.ingest(&format!(r#"{{"row":{{"columns":[{},"a",1]}}}},"#, limit + 1), now());
        assert_eq!(report.rows_dropped, 1);
        assert!(s.buffer("default").unwrap().is_empty());
    }

    #[test]
    fn statement_error_is_surfaced_and_processing_continues() {
        let mut s = session(FanoutMode::Single);
        s.ingest(HEADER, now());
        let report = s.ingest(
            r#"{"@type":"statement_error","message":"line 1: bad"},{"row":{"columns":[1000,"a",1]}},"#,
            now(),
        );
        assert_eq!(report.errors, vec![IngestError::Statement("line 1: bad".into())]);
        assert_eq!(report.rows_applied, 1);
    }

    #[test]
    fn error_frame_is_remote_error() {
        let mut s = session(FanoutMode::Single);
        let report = s.apply_frame(ServerFrame::error("upstream down"), now());
        assert_eq!(report.errors, vec![IngestError::Remote("upstream down".into())]);
        assert!(s.apply_frame(ServerFrame::default(), now()).errors.is_empty());
    }

    #[test]
    fn repeated_identical_row_does_not_mark_dirty() {
        let mut s = session(FanoutMode::Single);
        s.ingest(HEADER, now());
        s.ingest(r#"{"row":{"columns":[1000,"a",20]}},"#, now());
        assert!(s.take_dirty());
        let report = s.ingest(r#"{"row":{"columns":[1000,"a",20]}},"#, now());
        assert_eq!(report.rows_applied, 0);
        assert!(!s.is_dirty());
    }

    #[test]
    fn same_header_keeps_rows_new_header_rebuilds() {
        let mut s = session(FanoutMode::Single);
        s.ingest(HEADER, now());
        s.ingest(r#"{"row":{"columns":[1000,"a",20]}},"#, now());

        s.ingest(r#"{"header":{"schema":"`WINDOWSTART` BIGINT,`NAME` VARCHAR,`TEMP` DOUBLE"}},"#, now());
        assert_eq!(s.buffer("default").unwrap().len(), 1);

        s.ingest(r#"{"header":{"schema":"`WINDOWSTART` BIGINT,`HUMIDITY` DOUBLE"}},"#, now());
        assert_eq!(s.columns().len(), 2);
        assert!(s.buffer("default").unwrap().is_empty());
    }

    #[test]
    fn response_is_keyed_by_query_ref() {
        let mut s = PanelSession::new(
            PanelId::from_raw("7"),
            "B",
            QueryOptions::new("SELECT * FROM S EMIT CHANGES"),
            TimeRange::relative("now-15m", now()).unwrap(),
            SessionLimits::default(),
        );
        s.ingest(HEADER, now());
        let resp = s.response();
        assert_eq!(resp.key.as_deref(), Some("B"));
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data[0].ref_id, "B");
        assert!(!resp.is_error());
    }

    #[test]
    fn sweep_marks_dirty_only_when_points_change() {
        let options = QueryOptions {
            cleanup_enabled: true,
            ..QueryOptions::new("SELECT * FROM S")
        };
        let mut s = PanelSession::new(
            PanelId::from_raw("9"),
            "A",
            options,
            TimeRange::relative("now-1m", now()).unwrap(),
            SessionLimits::default(),
        );
        s.ingest(HEADER, now());
        s.ingest(r#"{"row":{"columns":[900000,"a",20]}},"#, now());
        s.take_dirty();

        let report = s.sweep(now());
        assert_eq!(report.neutralized, 1);
        assert!(s.take_dirty());
        let row = s.buffer("default").unwrap().row(0).unwrap();
        assert_eq!(row.get("TEMP"), Some(&Value::Null));
        assert_eq!(row.get("NAME"), Some(&Value::Text("a".into())));

        assert_eq!(s.sweep(now()).neutralized, 0);
        assert!(!s.is_dirty());
    }
}
