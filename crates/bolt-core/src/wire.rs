//! Wire formats.
//!
//! Three surfaces: frames exchanged with the transport bridge, records inside
//! the streamed JSON documents, and results handed to the panel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::ids::PanelId;
use crate::value::{ColumnKind, Value};

/// Which upstream endpoint the bridge should post to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    #[default]
    Query,
    Stream,
}

/// Body the bridge forwards to the query endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamQuery {
    pub ksql: String,
    #[serde(default)]
    pub streams_properties: Map<String, Json>,
}

/// Client → bridge frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub panel_id: PanelId,
    pub query: UpstreamQuery,
    #[serde(rename = "type", default)]
    pub kind: QueryKind,
}

/// Bridge → client frame: either a raw data fragment or an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Json>,
}

/// What a server frame means to the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    Data(String),
    Error(String),
    Empty,
}

impl ServerFrame {
    pub fn data(text: impl Into<String>) -> Self {
        Self {
            data: Some(text.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(Json::String(message.into())),
        }
    }

    /// Classify the frame. An error field wins over data; error objects are
    /// reduced to their `message` or `code`.
    pub fn into_event(self) -> FrameEvent {
        if let Some(err) = self.error {
            let message = match err {
                Json::String(s) => s,
                Json::Object(map) => map
                    .get("message")
                    .or_else(|| map.get("code"))
                    .map(|v| match v {
                        Json::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "Error in connection".to_string()),
                Json::Null => "Error in connection".to_string(),
                other => other.to_string(),
            };
            return FrameEvent::Error(message);
        }
        match self.data {
            Some(text) if !text.is_empty() => FrameEvent::Data(text),
            _ => FrameEvent::Empty,
        }
    }
}

/// One element of a decoded document.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Header { schema: String },
    Row { columns: Vec<Json> },
    StatementError { message: String },
    Other(Json),
}

impl Record {
    pub fn from_json(raw: Json) -> Self {
        if let Some(schema) = raw
            .get("header")
            .and_then(|h| h.get("schema"))
            .and_then(Json::as_str)
        {
            return Self::Header {
                schema: schema.to_string(),
            };
        }
        if raw.get("@type").and_then(Json::as_str) == Some("statement_error") {
            let message = raw
                .get("message")
                .and_then(Json::as_str)
                .unwrap_or("statement error")
                .to_string();
            return Self::StatementError { message };
        }
        if let Some(columns) = raw
            .get("row")
            .and_then(|r| r.get("columns"))
            .and_then(Json::as_array)
        {
            return Self::Row {
                columns: columns.clone(),
            };
        }
        Self::Other(raw)
    }
}

/// One field of a buffer, column-major.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

/// Point-in-time copy of one series buffer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSnapshot {
    /// Destination key: `"default"` or the data column name.
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<FieldSnapshot>,
    pub length: usize,
}

impl SeriesSnapshot {
    pub fn field(&self, name: &str) -> Option<&FieldSnapshot> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultError {
    pub message: String,
}

/// A downstream emission: either a dataset or an inline error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PanelResponse {
    pub data: Vec<SeriesSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl PanelResponse {
    pub fn data(data: Vec<SeriesSnapshot>, key: impl Into<String>) -> Self {
        Self {
            data,
            key: Some(key.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            key: None,
            error: Some(ResultError {
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
