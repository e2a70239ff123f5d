//! Upstream HTTP streaming and relay into client frames.

use bolt_core::{PanelId, QueryKind, ServerFrame, UpstreamQuery};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::BridgeError;

/// Decodes UTF-8 across chunk boundaries. A multi-byte sequence cut by a
/// chunk boundary is held back until the rest arrives; invalid bytes are
/// replaced.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix decodes
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }

    /// Bytes still waiting for the rest of their sequence.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Decode whatever is left, replacing an incomplete tail.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// HTTP client for the query endpoint.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    query_path: String,
    stream_path: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, query_path: impl Into<String>, stream_path: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            query_path: query_path.into(),
            stream_path: stream_path.into(),
        }
    }

    pub fn endpoint(&self, kind: QueryKind) -> String {
        let path = match kind {
            QueryKind::Query => &self.query_path,
            QueryKind::Stream => &self.stream_path,
        };
        format!("{}{}", self.base_url, path)
    }

    /// POST the query and return the response body as a byte stream.
    pub async fn open(
        &self,
        kind: QueryKind,
        body: &UpstreamQuery,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static, BridgeError> {
        let resp = self.http.post(self.endpoint(kind)).json(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Upstream { status, body });
        }
        Ok(resp.bytes_stream())
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "could not encode server frame");
            None
        }
    }
}

/// Send an error frame. Returns false once the client is gone.
pub async fn send_error(tx: &mpsc::Sender<String>, message: impl Into<String>) -> bool {
    match encode(&ServerFrame::error(message)) {
        Some(text) => tx.send(text).await.is_ok(),
        None => true,
    }
}

/// Forward a response body to the client as data frames until the body ends,
/// the client goes away or `cancel` fires. Every byte is forwarded in order;
/// only a UTF-8 sequence cut by a chunk boundary is held back until it is
/// complete. Dropping the stream on return aborts the upstream request.
pub async fn relay<S>(panel_id: &PanelId, body: S, tx: &mpsc::Sender<String>, cancel: &CancellationToken) -> usize
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send,
{
    let mut body = std::pin::pin!(body);
    let mut carry = Utf8Carry::new();
    let mut frames = 0;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(panel_id = %panel_id, "client disconnected, aborting upstream request");
                return frames;
            }
            chunk = body.next() => chunk,
        };
        let text = match chunk {
            Some(Ok(bytes)) => carry.push(&bytes),
            Some(Err(e)) => {
                tracing::warn!(panel_id = %panel_id, error = %e, "upstream body failed");
                send_error(tx, BridgeError::Http(e).client_message()).await;
                return frames;
            }
            None => {
                let tail = carry.finish();
                if !tail.is_empty() {
                    if let Some(frame) = encode(&ServerFrame::data(tail)) {
                        let _ = tx.send(frame).await;
                        frames += 1;
                    }
                }
                tracing::info!(panel_id = %panel_id, frames, "query finished");
                return frames;
            }
        };

        if text.is_empty() {
            continue;
        }
        tracing::debug!(panel_id = %panel_id, bytes = text.len(), "relaying chunk");
        let Some(frame) = encode(&ServerFrame::data(text)) else {
            continue;
        };
        if tx.send(frame).await.is_err() {
            tracing::info!(panel_id = %panel_id, "client channel closed, aborting upstream request");
            return frames;
        }
        frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    async fn collect(rx: &mut mpsc::Receiver<String>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[test]
    fn carry_holds_split_multibyte_sequence() {
        let text = "tëmp";
        let bytes = text.as_bytes();
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(&bytes[..2]), "t");
        assert_eq!(carry.pending(), 1);
        assert_eq!(carry.push(&bytes[2..]), "ëmp");
        assert_eq!(carry.pending(), 0);
    }

    #[test]
    fn carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(carry.push(b"\xe2\x82"), "");
        assert_eq!(carry.finish(), "\u{FFFD}");
    }

    #[test]
    fn endpoint_by_kind() {
        let client = UpstreamClient::new("http://ksql:8088/", "/query", "/query-stream");
        assert_eq!(client.endpoint(QueryKind::Query), "http://ksql:8088/query");
        assert_eq!(client.endpoint(QueryKind::Stream), "http://ksql:8088/query-stream");
    }

    #[tokio::test]
    async fn relays_every_chunk_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let body = chunks(vec![b"[{\"header\":1},", b"\n", b"{\"row\":2}]"]);
        let n = relay(&PanelId::from_raw("1"), body, &tx, &CancellationToken::new()).await;
        assert_eq!(n, 3);
        let frames = collect(&mut rx).await;
        assert_eq!(frames[0], ServerFrame::data("[{\"header\":1},"));
        assert_eq!(frames[1], ServerFrame::data("\n"));
        assert_eq!(frames[2], ServerFrame::data("{\"row\":2}]"));
    }

    #[tokio::test]
    async fn closing_delimiters_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(16);
        let body = chunks(vec![
            b"[{\"row\":{\"columns\":[1000,\"a\",2]",
            b"}},\n",
            b"{\"row\":{\"columns\":[2000,\"b\",3]}}",
            b"]",
        ]);
        relay(&PanelId::from_raw("1"), body, &tx, &CancellationToken::new()).await;
        let frames = collect(&mut rx).await;
        assert_eq!(frames[1], ServerFrame::data("}},\n"));
        assert_eq!(frames[3], ServerFrame::data("]"));

        let joined: String = frames.into_iter().filter_map(|f| f.data).collect();
        assert_eq!(
            joined,
            "[{\"row\":{\"columns\":[1000,\"a\",2]}},\n{\"row\":{\"columns\":[2000,\"b\",3]}}]"
        );
        assert!(serde_json::from_str::<serde_json::Value>(&joined).is_ok());
    }

    #[tokio::test]
    async fn split_character_is_not_corrupted() {
        let (tx, mut rx) = mpsc::channel(16);
        let text = "{\"name\":\"zürich\"}";
        let at = text.find('ü').unwrap() + 1;
        let (a, b) = text.as_bytes().split_at(at);
        let body = stream::iter(vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))]);
        relay(&PanelId::from_raw("1"), body, &tx, &CancellationToken::new()).await;
        let joined: String = collect(&mut rx)
            .await
            .into_iter()
            .filter_map(|f| f.data)
            .collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn cancel_stops_a_pending_body() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = stream::pending::<Result<Bytes, reqwest::Error>>();
        let n = relay(&PanelId::from_raw("1"), body, &tx, &cancel).await;
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn closed_client_stops_relay() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let body = chunks(vec![b"{\"a\":1}", b"{\"b\":2}"]);
        assert_eq!(relay(&PanelId::from_raw("1"), body, &tx, &CancellationToken::new()).await, 0);
    }
}
