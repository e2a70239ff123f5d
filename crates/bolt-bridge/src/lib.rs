//! WebSocket-to-HTTP relay in front of the query endpoint.
//!
//! A client sends a [`bolt_core::ClientFrame`]; the bridge POSTs the
//! statement upstream and streams the chunked response back as
//! [`bolt_core::ServerFrame`]s.

pub mod errors;
pub mod relay;
pub mod server;

pub use errors::BridgeError;
pub use relay::{relay, UpstreamClient, Utf8Carry};
pub use server::{build_router, start, AppState, BridgeConfig, BridgeHandle};
