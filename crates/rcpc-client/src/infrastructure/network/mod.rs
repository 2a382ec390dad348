//! Network infrastructure for the client application.
//!
//! Owns the TLS control connection to the host and reports everything that
//! happens on it as [`NetworkEvent`]s through the
//! [`EventNotifier`](crate::infrastructure::notifier::EventNotifier).
//!
//! Architecture:
//! - [`Connector`] is the entry point.  Each `connect()` starts one attempt on
//!   its own task and returns a [`SessionHandle`] for it.
//! - The attempt task resolves the endpoint, opens TCP, runs the TLS
//!   handshake, then hands the stream to the session.
//! - The session performs the identity handshake and runs two loops: a reader
//!   task that publishes inbound envelopes, and a writer loop (on the attempt
//!   task itself) that drains the outbound queue in FIFO order.
//! - Every attempt ends with exactly one terminal event: `Refused`,
//!   `TimedOut`, `Error`, or `Disconnected`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rcpc_core::{Envelope, ProtocolError, DEFAULT_PORT};
use thiserror::Error;

use crate::infrastructure::storage::{ClientConfig, StorageError};
use crate::infrastructure::tls::CredentialError;

pub mod connector;
mod framing;
pub mod session;
mod shutdown;

pub use connector::Connector;
pub use session::{SessionHandle, SessionState};

/// Why a connection attempt or an active session ended abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP connect plus TLS handshake did not finish within the deadline.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// The host did not answer the identity announcement in time.
    #[error("host did not answer the identity announcement in time")]
    HandshakeTimeout,

    /// The endpoint host name could not be resolved.
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The endpoint host is not usable as a TLS server name.
    #[error("invalid TLS server name: {0}")]
    ServerName(String),

    /// Socket I/O failed during the handshake or the active phase.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The TLS handshake failed (untrusted certificate, no client cert, ...).
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    /// The host answered the handshake with something other than a verdict.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An envelope could not be encoded or decoded.
    #[error("malformed envelope: {0}")]
    Codec(#[from] ProtocolError),

    /// The host declined the connection.
    #[error("host refused the connection")]
    Refused,

    /// Mutual authentication is required but no credential material is loaded.
    #[error("credential material unavailable: {0}")]
    Credential(Arc<CredentialError>),

    /// The device identifier could not be read or persisted.
    #[error("device identity unavailable: {0}")]
    Identity(#[from] StorageError),

    /// A session task stopped abnormally (panicked).
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

/// Sequence number of a `connect()` call, attached to every event it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened on a connection.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// The host accepted the identity announcement; `send` now works.
    Accepted,
    /// The host declined the connection.  Terminal.
    Refused,
    /// The connect or handshake deadline expired.  Terminal.
    TimedOut,
    /// The attempt or session failed.  Terminal.
    Error(Arc<ConnectionError>),
    /// The session ended without a failure.  Terminal.
    Disconnected,
    /// An envelope arrived from the host.
    MessageReceived(Envelope),
    /// An envelope was written to the host.
    MessageSent(Envelope),
}

impl EventKind {
    /// `true` for the kinds that end an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Refused | EventKind::TimedOut | EventKind::Error(_) | EventKind::Disconnected
        )
    }
}

/// An event published on the notifier, tagged with the attempt it belongs to.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub attempt: AttemptId,
    pub kind: EventKind,
}

impl NetworkEvent {
    pub fn new(attempt: AttemptId, kind: EventKind) -> Self {
        Self { attempt, kind }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Address of a host application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IP literal or DNS name, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

/// Error returned when an endpoint string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint is empty")]
    Empty,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("unterminated IPv6 literal in {0:?}")]
    UnterminatedBracket(String),
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]`, or `[v6]:port`, using
    /// `default_port` when none is given.  A bare IPv6 literal is taken whole.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] for empty input, a bad port, or a
    /// missing closing bracket.
    pub fn parse_with_default(input: &str, default_port: u16) -> Result<Self, EndpointParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EndpointParseError::Empty);
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| EndpointParseError::UnterminatedBracket(input.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => default_port,
                None => return Err(EndpointParseError::InvalidPort(tail.to_string())),
            };
            return Ok(Self::new(host, port));
        }

        match input.split_once(':') {
            Some((host, port)) if !port.contains(':') => {
                if host.is_empty() {
                    return Err(EndpointParseError::Empty);
                }
                Ok(Self::new(host, parse_port(port)?))
            }
            _ => Ok(Self::new(input, default_port)),
        }
    }
}

fn parse_port(s: &str) -> Result<u16, EndpointParseError> {
    s.parse()
        .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Runtime settings for the [`Connector`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Deadline for the host's accept/refuse verdict.
    pub handshake_timeout: Duration,
    /// Deadline for saying goodbye and closing the stream.  On expiry the
    /// stream is dropped without a clean close.
    pub close_timeout: Duration,
    /// Enable `SO_KEEPALIVE` on the socket.
    pub tcp_keepalive: bool,
    /// Name the host certificate is verified against; defaults to the endpoint host.
    pub server_name: Option<String>,
    /// Fail with [`ConnectionError::Credential`] instead of connecting
    /// through the unauthenticated fallback context.
    pub require_mutual_auth: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            tcp_keepalive: true,
            server_name: None,
            require_mutual_auth: true,
        }
    }
}

impl From<&ClientConfig> for ConnectionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.network.connect_timeout(),
            handshake_timeout: config.network.handshake_timeout(),
            close_timeout: config.network.close_timeout(),
            tcp_keepalive: config.network.tcp_keepalive,
            server_name: config.tls.server_name.clone(),
            require_mutual_auth: config.tls.require_mutual_auth,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
