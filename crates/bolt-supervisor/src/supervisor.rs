//! Connection supervision: one task per panel session.
//!
//! Each submitted query gets its own task that owns the socket and the
//! `PanelSession`. The task is the only writer to that session's buffers;
//! timers reach it through a command channel. Resubmitting a panel cancels the
//! old task before the new one connects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bolt_core::{
    ClientFrame, PanelId, PanelResponse, QueryKind, QueryOptions, ServerFrame, TimeRange, UpstreamQuery,
};
use bolt_engine::{PanelSession, QueryRewriter, SessionLimits};
use bolt_settings::SupervisorSettings;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::{ConnectionState, SessionCommand, SessionHandle, SessionRegistry, SharedState};
use crate::tasks::start_ticker;
use crate::transport::{Connection, Transport};

/// Message shown on the panel when the socket fails.
pub const SOCKET_ERROR_MESSAGE: &str = "Error in web socket connection";

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub sweep_interval: Duration,
    /// `None` emits after every document.
    pub emit_interval: Option<Duration>,
    pub limits: SessionLimits,
    pub rewriter: QueryRewriter,
    pub streams_properties: Map<String, Json>,
    pub result_queue: usize,
    pub command_queue: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for SupervisorConfig {
    fn from(s: &SupervisorSettings) -> Self {
        let defaults = SessionLimits::default();
        let future_tolerance = i64::try_from(s.future_tolerance_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(defaults.future_tolerance);
        Self {
            sweep_interval: Duration::from_millis(s.sweep_interval_ms.max(1)),
            emit_interval: (s.emit_interval_ms > 0).then(|| Duration::from_millis(s.emit_interval_ms)),
            limits: SessionLimits { future_tolerance },
            rewriter: QueryRewriter::new(
                s.time_column.clone(),
                s.upper_bound_inclusive,
                s.range_placeholder.clone(),
            ),
            streams_properties: s.streams_properties.clone(),
            result_queue: s.result_queue.max(1),
            command_queue: s.command_queue.max(1),
        }
    }
}

/// A panel query to run.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub panel_id: PanelId,
    pub ref_id: String,
    pub options: QueryOptions,
    pub range: TimeRange,
    pub kind: QueryKind,
}

impl QueryRequest {
    pub fn new(panel_id: PanelId, options: QueryOptions, range: TimeRange) -> Self {
        Self {
            panel_id,
            ref_id: "A".to_string(),
            options,
            range,
            kind: QueryKind::Query,
        }
    }
}

/// Owns the session registry and the periodic timers.
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
    config: Arc<SupervisorConfig>,
    shutdown: CancellationToken,
    timers: Mutex<Vec<JoinHandle<()>>>,
    next_generation: AtomicU64,
}

impl Supervisor {
    /// Create the supervisor and start its sweep and emit timers. Must be
    /// called inside a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: SupervisorConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();

        let mut timers = vec![start_ticker(
            Arc::clone(&registry),
            SessionCommand::Sweep,
            config.sweep_interval,
            shutdown.clone(),
        )];
        if let Some(period) = config.emit_interval {
            timers.push(start_ticker(
                Arc::clone(&registry),
                SessionCommand::Flush,
                period,
                shutdown.clone(),
            ));
        }

        Self {
            transport,
            registry,
            config: Arc::new(config),
            shutdown,
            timers: Mutex::new(timers),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start (or restart) a panel's query. Any existing session for the
    /// panel is closed first. Results arrive on the returned receiver.
    pub fn submit(&self, request: QueryRequest) -> mpsc::Receiver<PanelResponse> {
        let (results_tx, results_rx) = mpsc::channel(self.config.result_queue);
        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_queue);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let panel_id = request.panel_id.clone();
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Idle));
        let cancel = self.shutdown.child_token();

        let session = PanelSession::new(
            request.panel_id.clone(),
            request.ref_id.clone(),
            request.options.clone(),
            request.range.clone(),
            self.config.limits,
        );
        let frame = ClientFrame {
            panel_id: request.panel_id.clone(),
            query: UpstreamQuery {
                ksql: self
                    .config
                    .rewriter
                    .rewrite_for_range(&request.options.query_text, &request.range, Utc::now()),
                streams_properties: self.config.streams_properties.clone(),
            },
            kind: request.kind,
        };

        let worker = SessionWorker {
            generation,
            session,
            frame,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            results: results_tx,
            emit_per_document: self.config.emit_interval.is_none(),
            registry: Arc::clone(&self.registry),
        };

        // Hold the handle slot before the task can observe the registry.
        let previous = self.registry.insert(
            panel_id.clone(),
            SessionHandle {
                generation,
                state,
                commands: commands_tx,
                cancel,
                task: None,
            },
        );
        if let Some(old) = previous {
            tracing::info!(panel_id = %panel_id, old_state = %old.state(), "superseding session");
            old.close();
        }

        let task = tokio::spawn(worker.run(Arc::clone(&self.transport), commands_rx));
        self.registry.attach_task(&panel_id, generation, task);
        results_rx
    }

    /// Close and forget a panel's session. Returns false if there was none.
    pub fn teardown(&self, panel: &PanelId) -> bool {
        match self.registry.remove(panel) {
            Some(handle) => {
                tracing::info!(panel_id = %panel, "tearing down session");
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, panel: &PanelId) -> Option<ConnectionState> {
        self.registry.state(panel)
    }

    pub fn panels(&self) -> Vec<PanelId> {
        self.registry.panels()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Ask every session to sweep now.
    pub fn sweep_all(&self) -> usize {
        self.registry.broadcast(SessionCommand::Sweep)
    }

    /// Ask every session to emit pending changes now.
    pub fn flush_all(&self) -> usize {
        self.registry.broadcast(SessionCommand::Flush)
    }

    /// Stop the timers and every session, waiting for the tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let timers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.timers.lock());
        let sessions = self.registry.drain();
        tracing::info!(sessions = sessions.len(), "supervisor shutting down");

        for (_, mut handle) in sessions {
            handle.close();
            if let Some(task) = handle.task.take() {
                let _ = task.await;
            }
        }
        for timer in timers {
            let _ = timer.await;
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Why a session loop ended.
enum Exit {
    Cancelled,
    PeerClosed,
    Failed,
}

struct SessionWorker {
    generation: u64,
    session: PanelSession,
    frame: ClientFrame,
    state: SharedState,
    cancel: CancellationToken,
    results: mpsc::Sender<PanelResponse>,
    emit_per_document: bool,
    registry: Arc<SessionRegistry>,
}

impl SessionWorker {
    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            tracing::debug!(panel_id = %self.session.panel_id(), from = %prev, to = %next, "state change");
        }
    }

    async fn run(mut self, transport: Arc<dyn Transport>, mut commands: mpsc::Receiver<SessionCommand>) {
        let panel_id = self.session.panel_id().clone();
        self.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = transport.connect() => Some(result),
        };
        let exit = match connected {
            None => Exit::Cancelled,
            Some(Err(e)) => {
                tracing::warn!(panel_id = %panel_id, error = %e, "connect failed");
                self.fail();
                Exit::Failed
            }
            Some(Ok(conn)) => self.serve(conn, &mut commands).await,
        };

        match exit {
            Exit::Failed => {}
            Exit::Cancelled | Exit::PeerClosed => self.set_state(ConnectionState::Idle),
        }
        // A session whose panel has gone away leaves the registry itself.
        if self.results.is_closed() {
            self.registry.remove_generation(&panel_id, self.generation);
        }
        tracing::info!(panel_id = %panel_id, state = %*self.state.read(), "session task finished");
    }

    async fn serve(&mut self, conn: Connection, commands: &mut mpsc::Receiver<SessionCommand>) -> Exit {
        let Connection { outbound, mut inbound } = conn;
        let panel_id = self.session.panel_id().clone();

        let request = match serde_json::to_string(&self.frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(panel_id = %panel_id, error = %e, "could not encode query frame");
                self.fail();
                return Exit::Failed;
            }
        };
        if let Err(e) = outbound.send(request).await {
            tracing::warn!(panel_id = %panel_id, error = %e, "could not send query");
            self.fail();
            return Exit::Failed;
        }
        self.set_state(ConnectionState::Open);
        tracing::info!(panel_id = %panel_id, "session open");

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Sweep) => {
                        if self.session.sweep(Utc::now()).swept() {
                            self.emit_snapshot();
                        }
                    }
                    Some(SessionCommand::Flush) => {
                        if self.session.is_dirty() {
                            self.emit_snapshot();
                        }
                    }
                    None => break Exit::Cancelled,
                },
                msg = inbound.next() => match msg {
                    Some(Ok(text)) => self.on_frame(&text),
                    Some(Err(e)) => {
                        tracing::warn!(panel_id = %panel_id, error = %e, "socket error");
                        self.fail();
                        break Exit::Failed;
                    }
                    None => {
                        tracing::info!(panel_id = %panel_id, "socket closed by peer");
                        break Exit::PeerClosed;
                    }
                },
            }
        };

        if !matches!(exit, Exit::Failed) {
            self.set_state(ConnectionState::Closing);
        }
        self.session.reset_stream();
        drop(outbound);
        exit
    }

    fn on_frame(&mut self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(panel_id = %self.session.panel_id(), error = %e, "undecodable frame skipped");
                return;
            }
        };

        let report = self.session.apply_frame(frame, Utc::now());
        for err in &report.errors {
            tracing::warn!(panel_id = %self.session.panel_id(), kind = err.error_kind(), error = %err, "surfacing error");
            self.emit(PanelResponse::error(err.panel_message()));
        }
        if self.emit_per_document && report.changed() {
            self.emit_snapshot();
        }
    }

    fn fail(&mut self) {
        self.set_state(ConnectionState::Errored);
        self.emit(PanelResponse::error(SOCKET_ERROR_MESSAGE));
    }

    /// The session stays dirty until a snapshot is actually delivered, so a
    /// snapshot dropped on a full queue goes out on the next flush.
    fn emit_snapshot(&mut self) {
        let response = self.session.response();
        if self.emit(response) {
            self.session.take_dirty();
        }
    }

    /// Deliver a result unless the session has been closed. Returns whether
    /// it was queued.
    fn emit(&self, response: PanelResponse) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.results.try_send(response) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(panel_id = %self.session.panel_id(), "result queue full, dropping emission");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(panel_id = %self.session.panel_id(), "panel receiver gone, closing session");
                self.cancel.cancel();
                false
            }
        }
    }
}
