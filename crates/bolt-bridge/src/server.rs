use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bolt_core::ClientFrame;
use bolt_settings::BridgeSettings;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::errors::BridgeError;
use crate::relay::{self, UpstreamClient};

/// Bridge configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub upstream_url: String,
    pub query_path: String,
    pub stream_path: String,
    pub max_send_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

impl From<&BridgeSettings> for BridgeConfig {
    fn from(s: &BridgeSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            upstream_url: s.upstream_url.clone(),
            query_path: s.query_path.clone(),
            stream_path: s.stream_path.clone(),
            max_send_queue: s.max_send_queue,
        }
    }
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub connections: Arc<AtomicUsize>,
    pub max_send_queue: usize,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &BridgeConfig, shutdown: CancellationToken) -> Self {
        Self {
            upstream: UpstreamClient::new(&config.upstream_url, &config.query_path, &config.stream_path),
            connections: Arc::new(AtomicUsize::new(0)),
            max_send_queue: config.max_send_queue.max(1),
            shutdown,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns once the listener is up.
pub async fn start(config: BridgeConfig) -> Result<BridgeHandle, BridgeError> {
    let shutdown = CancellationToken::new();
    let state = AppState::new(&config, shutdown.clone());
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| BridgeError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
        addr: addr.clone(),
        source,
    })?;

    tracing::info!(
        port = local_addr.port(),
        upstream = %config.upstream_url,
        "bridge started"
    );

    let stop = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "bridge server failed");
        }
    });

    Ok(BridgeHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct BridgeHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl BridgeHandle {
    /// Stop accepting, abort in-flight relays and wait for the server task.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.connections.load(Ordering::Relaxed),
    }))
}

/// One client socket. Every request frame starts its own relay; all relays
/// for the socket are aborted when it goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let open = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(connections = open, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.max_send_queue);
    let connection = state.shutdown.child_token();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            _ = connection.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                start_relay(&state, text.as_str(), &tx, &connection).await;
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = %e, "client socket error");
                break;
            }
        }
    }

    connection.cancel();
    drop(tx);
    let _ = writer.await;
    let open = state.connections.fetch_sub(1, Ordering::Relaxed) - 1;
    tracing::info!(connections = open, "client disconnected");
}

async fn start_relay(state: &AppState, raw: &str, tx: &mpsc::Sender<String>, connection: &CancellationToken) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            let err = BridgeError::BadFrame(e.to_string());
            tracing::warn!(error = %err, "rejecting client frame");
            relay::send_error(tx, err.client_message()).await;
            return;
        }
    };

    tracing::info!(panel_id = %frame.panel_id, kind = ?frame.kind, "query received");
    let upstream = state.upstream.clone();
    let tx = tx.clone();
    let cancel = connection.child_token();
    tokio::spawn(async move {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = upstream.open(frame.kind, &frame.query) => opened,
        };
        match opened {
            Ok(body) => {
                relay::relay(&frame.panel_id, body, &tx, &cancel).await;
            }
            Err(e) => {
                tracing::warn!(panel_id = %frame.panel_id, error = %e, "upstream request failed");
                relay::send_error(&tx, e.client_message()).await;
            }
        }
    });
}
