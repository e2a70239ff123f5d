//! Shared types for the bolt streaming pipeline: identifiers, the value and
//! column model, per-query options, time ranges and the wire formats spoken
//! with the transport bridge and the consuming panel.

pub mod errors;
pub mod ids;
pub mod options;
pub mod time;
pub mod value;
pub mod wire;

pub use errors::IngestError;
pub use ids::PanelId;
pub use options::{CleanupThreshold, FanoutMode, QueryOptions, StaleReplacement};
pub use time::{TimeError, TimeRange};
pub use value::{Column, ColumnKind, Row, Value};
pub use wire::{
    ClientFrame, FieldSnapshot, FrameEvent, PanelResponse, QueryKind, Record, ResultError,
    SeriesSnapshot, ServerFrame, UpstreamQuery,
};
