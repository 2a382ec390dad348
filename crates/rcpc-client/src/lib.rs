//! rcpc-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rcpc-client do?
//!
//! The client is the handheld side: it drives a host computer's pointer,
//! clicks, scrolling, and media keys over the local network.
//!
//! 1. Builds a TLS 1.3 client context from PEM credential material.
//! 2. Connects to the host and announces its persistent device identifier.
//! 3. Waits for the host user to accept or refuse the connection.
//! 4. Once accepted, sends gesture envelopes and receives host reports
//!    (e.g. the current volume) until either side closes.
//!
//! Everything that happens on the connection is published as a
//! `NetworkEvent` through the `EventNotifier`.  Each connection attempt ends
//! with exactly one terminal event.

/// Application layer: use cases for the client.
pub mod application;

/// Infrastructure layer: network, TLS, event fan-out, and storage.
pub mod infrastructure;

pub use infrastructure::network::{
    AttemptId, ConnectionConfig, ConnectionError, Connector, Endpoint, EventKind, NetworkEvent,
    SessionHandle, SessionState,
};
pub use infrastructure::notifier::{EventNotifier, ListenerId, NetworkEventListener};
