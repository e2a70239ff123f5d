#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid client frame: {0}")]
    BadFrame(String),
}

impl BridgeError {
    /// Text sent to the client in an error frame.
    pub fn client_message(&self) -> String {
        match self {
            Self::Upstream { status, body } if body.trim().is_empty() => format!("upstream returned {status}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_includes_body() {
        let err = BridgeError::Upstream {
            status: 400,
            body: r#"{"message":"line 1: bad"}"#.into(),
        };
        assert_eq!(err.client_message(), r#"upstream returned 400: {"message":"line 1: bad"}"#);
    }

    #[test]
    fn empty_body_is_omitted() {
        let err = BridgeError::Upstream {
            status: 503,
            body: " ".into(),
        };
        assert_eq!(err.client_message(), "upstream returned 503");
    }

    #[test]
    fn bad_frame_display() {
        assert_eq!(
            BridgeError::BadFrame("missing field `query`".into()).to_string(),
            "invalid client frame: missing field `query`"
        );
    }
}
