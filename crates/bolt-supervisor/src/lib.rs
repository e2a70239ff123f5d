//! Per-panel connection supervision on top of `bolt-engine`.

pub mod registry;
pub mod supervisor;
pub mod tasks;
pub mod transport;

pub use registry::{ConnectionState, SessionCommand, SessionHandle, SessionRegistry};
pub use supervisor::{QueryRequest, Supervisor, SupervisorConfig, SOCKET_ERROR_MESSAGE};
pub use transport::{ChannelPeer, ChannelTransport, Connection, Transport, TransportError, WsTransport};
