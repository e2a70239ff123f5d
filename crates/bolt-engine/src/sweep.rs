//! Stale-point neutralization.
//!
//! Points that scroll out of a relative range are not removed; their payload
//! fields are overwritten so the panel keeps a stable shape. A watermark
//! stops points from being processed twice.

use bolt_core::{CleanupThreshold, QueryOptions, TimeRange};
use chrono::{DateTime, Duration, Utc};

use crate::buffer::SeriesBuffer;

/// Per-session sweep watermark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepState {
    last_cutoff: Option<i64>,
}

impl SweepState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch millis of the last applied cutoff.
    pub fn last_cutoff(&self) -> Option<i64> {
        self.last_cutoff
    }

    fn advance(&mut self, cutoff: i64) {
        self.last_cutoff = Some(self.last_cutoff.map_or(cutoff, |prev| prev.max(cutoff)));
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cutoff: Option<i64>,
    pub neutralized: usize,
}

impl SweepReport {
    pub fn swept(&self) -> bool {
        self.neutralized > 0
    }
}

/// The instant below which points are stale, or `None` when the session
/// should not be swept (cleanup off, or the range is absolute).
pub fn cutoff(options: &QueryOptions, range: &TimeRange, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !options.cleanup_enabled || !range.is_relative() {
        return None;
    }
    let lookback = match options.cleanup_threshold_mode {
        CleanupThreshold::FromStart => range.lookback()?,
        CleanupThreshold::LastNMinutes => Duration::try_minutes(i64::from(options.cleanup_minutes))?,
    };
    Some(now - lookback)
}

/// Sweep every buffer of one session. Points in `[watermark, cutoff)` are
/// neutralized; the watermark then advances to the cutoff.
pub fn sweep_buffers(
    buffers: &mut [SeriesBuffer],
    state: &mut SweepState,
    options: &QueryOptions,
    range: &TimeRange,
    now: DateTime<Utc>,
) -> SweepReport {
    let Some(cutoff) = cutoff(options, range, now).map(|c| c.timestamp_millis()) else {
        return SweepReport::default();
    };
    if state.last_cutoff.is_some_and(|last| last >= cutoff) {
        return SweepReport {
            cutoff: Some(cutoff),
            neutralized: 0,
        };
    }

    let neutralized = buffers
        .iter_mut()
        .map(|b| {
            b.neutralize(
                cutoff,
                state.last_cutoff,
                options.stale_field_replacement,
                &options.preserved_fields,
            )
        })
        .sum();
    state.advance(cutoff);

    SweepReport {
        cutoff: Some(cutoff),
        neutralized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_core::{Column, ColumnKind, Row, StaleReplacement, Value};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(10_000_000).unwrap()
    }

    fn options() -> QueryOptions {
        QueryOptions {
            cleanup_enabled: true,
            stale_field_replacement: StaleReplacement::Zero,
            ..QueryOptions::new("SELECT * FROM S EMIT CHANGES")
        }
    }

    fn buffer(times: &[i64]) -> SeriesBuffer {
        let mut b = SeriesBuffer::new(
            "default",
            "A",
            vec![
                Column::new("WINDOWSTART", ColumnKind::Time),
                Column::new("NAME", ColumnKind::String),
                Column::new("HOST", ColumnKind::String),
                Column::new("TEMP", ColumnKind::Number),
            ],
            100,
        );
        for t in times {
            let row: Row = vec![
                ("WINDOWSTART", Value::Time(*t)),
                ("NAME", Value::Text("n".into())),
                ("HOST", Value::Text("h".into())),
                ("TEMP", Value::Number(9.0)),
            ]
            .into_iter()
            .collect();
            b.upsert(&row).unwrap();
        }
        b
    }

    #[test]
    fn cutoff_from_relative_start() {
        let range = TimeRange::relative("now-1m", now()).unwrap();
        let c = cutoff(&options(), &range, now()).unwrap();
        assert_eq!(c.timestamp_millis(), 10_000_000 - 60_000);
    }

    #[test]
    fn cutoff_from_fixed_minutes() {
        let range = TimeRange::relative("now-6h", now()).unwrap();
        let opts = QueryOptions {
            cleanup_threshold_mode: CleanupThreshold::LastNMinutes,
            cleanup_minutes: 2,
            ..options()
        };
        let c = cutoff(&opts, &range, now()).unwrap();
        assert_eq!(c.timestamp_millis(), 10_000_000 - 120_000);
    }

    #[test]
    fn no_cutoff_when_disabled_or_absolute() {
        let range = TimeRange::relative("now-1m", now()).unwrap();
        let off = QueryOptions::new("q");
        assert!(cutoff(&off, &range, now()).is_none());

        let absolute = TimeRange::absolute(now() - Duration::hours(1), now());
        assert!(cutoff(&options(), &absolute, now()).is_none());
    }

    #[test]
    fn stale_points_are_neutralized_not_removed() {
        let range = TimeRange::relative("now-1m", now()).unwrap();
        let mut buffers = vec![buffer(&[9_000_000, 9_950_000, 9_990_000])];
        let mut state = SweepState::new();

        let report = sweep_buffers(&mut buffers, &mut state, &options(), &range, now());
        assert_eq!(report.neutralized, 1);
        assert!(report.swept());

        let b = &buffers[0];
        assert_eq!(b.times(), vec![9_000_000, 9_950_000, 9_990_000]);
        let stale = b.row(0).unwrap();
        assert_eq!(stale.get("NAME"), Some(&Value::Text("n".into())));
        assert_eq!(stale.get("HOST"), Some(&Value::Null));
        assert_eq!(stale.get("TEMP"), Some(&Value::Number(0.0)));
        assert_eq!(b.row(1).unwrap().get("TEMP"), Some(&Value::Number(9.0)));
    }

    #[test]
    fn watermark_prevents_reprocessing() {
        let range = TimeRange::relative("now-1m", now()).unwrap();
        let mut buffers = vec![buffer(&[9_000_000, 9_950_000])];
        let mut state = SweepState::new();

        sweep_buffers(&mut buffers, &mut state, &options(), &range, now());
        assert_eq!(state.last_cutoff(), Some(9_940_000));

        // same instant: nothing new to do
        let again = sweep_buffers(&mut buffers, &mut state, &options(), &range, now());
        assert_eq!(again.neutralized, 0);

        // time moves on: only the newly stale point is touched
        let later = now() + Duration::seconds(20);
        let report = sweep_buffers(&mut buffers, &mut state, &options(), &range, later);
        assert_eq!(report.neutralized, 1);
        assert_eq!(state.last_cutoff(), Some(9_960_000));
    }

    #[test]
    fn watermark_is_shared_across_buffers() {
        let range = TimeRange::relative("now-1m", now()).unwrap();
        let mut buffers = vec![buffer(&[9_000_000]), buffer(&[9_100_000])];
        let mut state = SweepState::new();
        let report = sweep_buffers(&mut buffers, &mut state, &options(), &range, now());
        assert_eq!(report.neutralized, 2);
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut state = SweepState::new();
        state.advance(50);
        state.advance(10);
        assert_eq!(state.last_cutoff(), Some(50));
    }
}
