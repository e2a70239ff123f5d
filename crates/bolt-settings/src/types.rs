//! Settings sections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, SettingsError};

/// Root settings object, as stored in `~/.bolt/settings.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoltSettings {
    pub supervisor: SupervisorSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

impl BoltSettings {
    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.port == 0 {
            return Err(SettingsError::InvalidValue("bridge.port must be non-zero".into()));
        }
        if self.supervisor.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "supervisor.sweepIntervalMs must be non-zero".into(),
            ));
        }
        if self.supervisor.result_queue == 0 || self.supervisor.command_queue == 0 {
            return Err(SettingsError::InvalidValue("supervisor queues must be non-zero".into()));
        }
        if self.bridge.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue("bridge.maxSendQueue must be non-zero".into()));
        }
        Ok(())
    }
}

/// Panel-side connection supervision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// WebSocket URL of the transport bridge.
    pub bridge_url: String,
    /// Stale-point sweep period.
    pub sweep_interval_ms: u64,
    /// Emission period; 0 emits after every document.
    pub emit_interval_ms: u64,
    /// Allowance for rows timestamped past the range end.
    pub future_tolerance_secs: u64,
    /// Close the upper time predicate with `<=`.
    pub upper_bound_inclusive: bool,
    pub time_column: String,
    pub range_placeholder: String,
    /// Sent with every query.
    pub streams_properties: Map<String, Value>,
    /// Per-panel result channel depth.
    pub result_queue: usize,
    /// Per-session command channel depth.
    pub command_queue: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        let mut streams_properties = Map::new();
        streams_properties.insert("auto.offset.reset".into(), Value::from("earliest"));
        streams_properties.insert("commit.interval.ms".into(), Value::from(1000));
        Self {
            bridge_url: "ws://localhost:3001".to_string(),
            sweep_interval_ms: 30_000,
            emit_interval_ms: 0,
            future_tolerance_secs: 300,
            upper_bound_inclusive: false,
            time_column: "ROWTIME".to_string(),
            range_placeholder: "_RANGE_".to_string(),
            streams_properties,
            result_queue: 256,
            command_queue: 64,
        }
    }
}

/// The WebSocket-to-HTTP bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub host: String,
    pub port: u16,
    /// Base URL of the query endpoint.
    pub upstream_url: String,
    pub query_path: String,
    pub stream_path: String,
    /// Outbound frames buffered per client before backpressure.
    pub max_send_queue: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            upstream_url: "http://localhost:9099".to_string(),
            query_path: "/query".to_string(),
            stream_path: "/query-stream".to_string(),
            max_send_queue: 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = BoltSettings::default();
        assert_eq!(s.supervisor.sweep_interval_ms, 30_000);
        assert_eq!(s.supervisor.emit_interval_ms, 0);
        assert_eq!(s.supervisor.future_tolerance_secs, 300);
        assert!(!s.supervisor.upper_bound_inclusive);
        assert_eq!(s.supervisor.time_column, "ROWTIME");
        assert_eq!(s.supervisor.streams_properties["auto.offset.reset"], "earliest");
        assert_eq!(s.supervisor.streams_properties["commit.interval.ms"], 1000);
        assert_eq!(s.bridge.port, 3001);
        assert_eq!(s.bridge.upstream_url, "http://localhost:9099");
        assert_eq!(s.logging.level, "info");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(BoltSettings::default()).unwrap();
        assert!(json["supervisor"].get("sweepIntervalMs").is_some());
        assert!(json["bridge"].get("maxSendQueue").is_some());
    }

    #[test]
    fn partial_sections_fill_from_defaults() {
        let s: BoltSettings = serde_json::from_str(r#"{"bridge":{"port":4000}}"#).unwrap();
        assert_eq!(s.bridge.port, 4000);
        assert_eq!(s.bridge.query_path, "/query");
        assert_eq!(s.supervisor, SupervisorSettings::default());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut s = BoltSettings::default();
        s.bridge.port = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }
}
