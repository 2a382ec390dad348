//! # rcpc-core
//!
//! Shared message model for the RCPC remote-input protocol: the closed
//! envelope vocabulary exchanged between a handheld client and the host it
//! controls, plus the newline-delimited JSON codec that carries it.
//!
//! This crate has no sockets, no TLS, and no async runtime.  The client crate
//! layers connection handling on top of it.
//!
//! # Protocol overview
//!
//! ```text
//! Client                                   Host
//! ──────                                   ────
//! {"type":"INFO_UUID","uuid":"…"}     →
//!                                      ←   {"type":"INFO_USER_ACCEPTED_CONNECTION"}
//!                                          (or INFO_USER_CLOSED_CONNECTION = refused)
//! {"type":"ACTION_MOVE",…}            →
//!                                      ←   {"type":"INFO_CURRENT_VOLUME_UPDATE",…}
//! {"type":"INFO_USER_CLOSED_CONNECTION"} → (either side may close)
//! ```

pub mod protocol;

pub use protocol::codec::{decode_envelope, encode_envelope, encode_line, ProtocolError};
pub use protocol::messages::{Envelope, EnvelopeKind, DEFAULT_PORT, MAX_ENVELOPE_LEN};
