use serde::{Deserialize, Serialize};

/// How one query's output is spread across series buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Every column lands in one buffer keyed `"default"`.
    #[default]
    Single,
    /// One buffer per numeric column, each carrying the time column plus that column.
    Multiple,
}

/// Where the stale-point cutoff comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CleanupThreshold {
    /// The lookback of the panel's relative range (`now-15m` → 15 minutes ago).
    #[default]
    #[serde(alias = "startTime")]
    FromStart,
    /// A fixed number of minutes before now.
    #[serde(alias = "customCleanup")]
    LastNMinutes,
}

/// What a neutralized numeric field is set to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaleReplacement {
    #[default]
    Null,
    Zero,
}

/// Per-query options produced by the editor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub query_text: String,
    #[serde(alias = "dimention")]
    pub fanout_mode: FanoutMode,
    #[serde(alias = "frameSize")]
    pub buffer_capacity: usize,
    pub cleanup_enabled: bool,
    pub cleanup_threshold_mode: CleanupThreshold,
    pub cleanup_minutes: u32,
    pub stale_field_replacement: StaleReplacement,
    /// Fields the sweeper leaves intact (labels and coordinates).
    pub preserved_fields: Vec<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            query_text: String::new(),
            fanout_mode: FanoutMode::Single,
            buffer_capacity: 1000,
            cleanup_enabled: false,
            cleanup_threshold_mode: CleanupThreshold::FromStart,
            cleanup_minutes: 30,
            stale_field_replacement: StaleReplacement::Null,
            preserved_fields: vec!["NAME".into(), "LATITUDE".into(), "LONGITUDE".into()],
        }
    }
}

impl QueryOptions {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Self::default()
        }
    }

    /// Capacity with the `> 0` constraint applied.
    pub fn capacity(&self) -> usize {
        self.buffer_capacity.max(1)
    }

    pub fn is_preserved(&self, field: &str) -> bool {
        self.preserved_fields.iter().any(|f| f == field)
    }
}
