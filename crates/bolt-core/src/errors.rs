/// Errors raised while ingesting a panel's stream.
///
/// Classified by who gets to see them: transport, remote and statement errors
/// are delivered to the panel as an error result; everything else is recovered
/// locally and only logged.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IngestError {
    // Surfaced to the panel
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("statement error: {0}")]
    Statement(String),

    // Recovered locally
    #[error("incomplete document, {pending} bytes pending")]
    Incomplete { pending: usize },
    #[error("row received before any header")]
    MissingHeader,
    #[error("row shape mismatch: header has {expected} columns, row has {actual}")]
    RowShape { expected: usize, actual: usize },
    #[error("unparseable time value: {0}")]
    BadTime(String),
    #[error("row at {time} lies beyond the accepted limit {limit}")]
    OutsideWindow { time: i64, limit: i64 },
    #[error("unrecognised record: {0}")]
    UnknownRecord(String),
}

impl IngestError {
    /// Whether this error is delivered to the panel as an error result.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Remote(_) | Self::Statement(_)
        )
    }

    /// Whether this error ends the current socket.
    pub fn is_fatal_to_socket(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Remote(_) => "remote",
            Self::Statement(_) => "statement",
            Self::Incomplete { .. } => "incomplete",
            Self::MissingHeader => "missing_header",
            Self::RowShape { .. } => "row_shape",
            Self::BadTime(_) => "bad_time",
            Self::OutsideWindow { .. } => "outside_window",
            Self::UnknownRecord(_) => "unknown_record",
        }
    }

    /// The message shown inline on the panel.
    pub fn panel_message(&self) -> String {
        match self {
            Self::Transport(m) | Self::Remote(m) | Self::Statement(m) => m.clone(),
            other => other.to_string(),
        }
    }
}
