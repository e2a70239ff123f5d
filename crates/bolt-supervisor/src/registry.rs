use std::fmt;
use std::sync::Arc;

use bolt_core::PanelId;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Socket lifecycle of one panel session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    /// The socket failed; stays visible until the panel resubmits.
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Messages from timers to a session task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// Neutralize stale points now.
    Sweep,
    /// Emit a snapshot if anything changed since the last one.
    Flush,
}

/// Shared, lock-guarded connection state.
pub type SharedState = Arc<RwLock<ConnectionState>>;

/// Registry-side view of a running session.
pub struct SessionHandle {
    pub generation: u64,
    pub state: SharedState,
    pub commands: mpsc::Sender<SessionCommand>,
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Cancel the session task. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Panel id to running session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<PanelId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning whatever it replaced.
    pub fn insert(&self, panel: PanelId, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(panel, handle)
    }

    pub fn remove(&self, panel: &PanelId) -> Option<SessionHandle> {
        self.sessions.remove(panel).map(|(_, handle)| handle)
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub fn remove_generation(&self, panel: &PanelId, generation: u64) -> Option<SessionHandle> {
        self.sessions
            .remove_if(panel, |_, handle| handle.generation == generation)
            .map(|(_, handle)| handle)
    }

    /// Record the task driving `generation`. A superseded generation's task
    /// is left detached.
    pub fn attach_task(&self, panel: &PanelId, generation: u64, task: JoinHandle<()>) -> bool {
        match self.sessions.get_mut(panel) {
            Some(mut handle) if handle.generation == generation => {
                handle.task = Some(task);
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, panel: &PanelId) -> Option<ConnectionState> {
        self.sessions.get(panel).map(|handle| handle.state())
    }

    pub fn panels(&self) -> Vec<PanelId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session.
    pub fn drain(&self) -> Vec<(PanelId, SessionHandle)> {
        let panels = self.panels();
        panels
            .into_iter()
            .filter_map(|panel| self.sessions.remove(&panel))
            .collect()
    }

    /// Send `command` to every live session without waiting. The sender set
    /// is copied out first so no map shard is locked while sending.
    /// Returns how many sessions accepted the command.
    pub fn broadcast(&self, command: SessionCommand) -> usize {
        let targets: Vec<(PanelId, mpsc::Sender<SessionCommand>)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().cancel.is_cancelled())
            .map(|entry| (entry.key().clone(), entry.value().commands.clone()))
            .collect();

        let mut delivered = 0;
        for (panel, tx) in targets {
            match tx.try_send(command) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(panel_id = %panel, ?command, "command queue full, dropping command");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!(panel_id = %panel, ?command, "session task gone");
                }
            }
        }
        delivered
    }
}
