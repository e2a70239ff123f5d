//! The socket seam between a panel session and the bridge.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed")]
    Closed,
}

/// An open duplex text connection.
pub struct Connection {
    /// Text frames to send. Dropping the sender closes the socket.
    pub outbound: mpsc::Sender<String>,
    /// Text frames received, in order. Ends when the peer closes.
    pub inbound: BoxStream<'static, Result<String, TransportError>>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// WebSocket client transport.
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
    send_queue: usize,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            send_queue: 16,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_tx, ws_rx) = ws.split();

        let (outbound, mut rx) = mpsc::channel::<String>(self.send_queue);
        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    tracing::debug!(%url, error = %e, "websocket write failed");
                    return;
                }
            }
            let _ = ws_tx.close().await;
        });

        let inbound = ws_rx
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| TransportError::Receive(e.to_string())),
                    ),
                    Ok(Message::Close(_)) => None,
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                }
            })
            .boxed();

        Ok(Connection { outbound, inbound })
    }
}

/// The far end of a [`ChannelTransport`] connection.
pub struct ChannelPeer {
    /// Frames the session sent.
    pub requests: mpsc::Receiver<String>,
    /// Push frames (or errors) to the session. Dropping it ends the stream.
    pub frames: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ChannelPeer {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.frames.send(Ok(text.into())).is_ok()
    }

    pub fn send_error(&self, error: TransportError) -> bool {
        self.frames.send(Err(error)).is_ok()
    }
}

/// In-memory transport: every connect hands a [`ChannelPeer`] to the test.
#[derive(Clone)]
pub struct ChannelTransport {
    peers: mpsc::UnboundedSender<ChannelPeer>,
    refuse: Arc<Mutex<Option<TransportError>>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// Make the next connect fail with `error`.
    pub fn refuse_next(&self, error: TransportError) {
        *self.refuse.lock() = Some(error);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let refused = self.refuse.lock().take();
        if let Some(err) = refused {
            return Err(err);
        }
        let (outbound, requests) = mpsc::channel(16);
        let (frames, inbound) = mpsc::unbounded_channel();
        self.peers
            .send(ChannelPeer { requests, frames })
            .map_err(|_| TransportError::Connect("no peer listening".into()))?;
        Ok(Connection {
            outbound,
            inbound: UnboundedReceiverStream::new(inbound).boxed(),
        })
    }
}
