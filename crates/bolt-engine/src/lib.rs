//! Ingestion core: turns a chunked JSON stream into bounded, time-ordered
//! series buffers.
//!
//! Everything here is synchronous and owned by exactly one panel session;
//! the supervisor crate supplies sockets and timers.

pub mod buffer;
pub mod chunk;
pub mod header;
pub mod rewrite;
pub mod router;
pub mod session;
pub mod sweep;

pub use buffer::{SeriesBuffer, Upsert};
pub use chunk::ChunkReassembler;
pub use header::parse_header;
pub use rewrite::QueryRewriter;
pub use router::{Destination, RowRouter, DEFAULT_DESTINATION};
pub use session::{IngestReport, PanelSession, SessionLimits};
pub use sweep::{SweepReport, SweepState};
