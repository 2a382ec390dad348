//! Transport connector: the explicitly owned entry point for host connections.
//!
//! A [`Connector`] holds the TLS factory, the notifier, and at most one
//! current session.  `connect()` supersedes the previous session, spawns the
//! attempt task, and returns at once; everything that follows is reported
//! through the notifier.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rcpc_core::Envelope;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tracing::{debug, error, info, warn};

use super::session::{self, SessionContext};
use super::{
    AttemptId, ConnectionConfig, ConnectionError, Endpoint, EventKind, NetworkEvent,
    SessionHandle, SessionState,
};
use crate::infrastructure::notifier::{EventNotifier, ListenerId, NetworkEventListener};
use crate::infrastructure::storage::DeviceIdentity;
use crate::infrastructure::tls::{server_name_for, SecureSessionFactory};

/// Opens sessions to the host and routes caller requests to the current one.
pub struct Connector {
    config: ConnectionConfig,
    factory: SecureSessionFactory,
    notifier: Arc<EventNotifier>,
    identity: Arc<dyn DeviceIdentity>,
    current: Mutex<Option<SessionHandle>>,
    next_attempt: AtomicU64,
}

impl Connector {
    pub fn new(
        config: ConnectionConfig,
        factory: SecureSessionFactory,
        notifier: Arc<EventNotifier>,
        identity: Arc<dyn DeviceIdentity>,
    ) -> Self {
        Self {
            config,
            factory,
            notifier,
            identity,
            current: Mutex::new(None),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Starts a connection attempt to `endpoint` and returns its handle.
    ///
    /// Any previous session is asked to disconnect first.  It still publishes
    /// its own terminal event, tagged with its own [`AttemptId`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self, endpoint: Endpoint) -> SessionHandle {
        let attempt = AttemptId(self.next_attempt.fetch_add(1, Ordering::Relaxed));
        let (handle, outbound) = SessionHandle::new(attempt, endpoint);

        let previous = self
            .current
            .lock()
            .expect("lock poisoned")
            .replace(handle.clone());
        if let Some(previous) = previous {
            debug!(
                "attempt {} supersedes attempt {}",
                attempt,
                previous.attempt()
            );
            previous.disconnect();
        }

        let task = AttemptTask {
            config: self.config.clone(),
            factory: self.factory.clone(),
            ctx: SessionContext {
                handle: handle.clone(),
                notifier: Arc::clone(&self.notifier),
                identity: Arc::clone(&self.identity),
                handshake_timeout: self.config.handshake_timeout,
                close_timeout: self.config.close_timeout,
            },
        };
        tokio::spawn(task.run(outbound));
        handle
    }

    /// Queues `envelope` on the current session.  Dropped (returns `false`)
    /// when no session is active.
    pub fn send(&self, envelope: Envelope) -> bool {
        match self.current() {
            Some(session) => session.send(envelope),
            None => {
                debug!("dropping {}: no session", envelope.type_name());
                false
            }
        }
    }

    /// Asks the current session, if any, to end.  Idempotent.
    pub fn disconnect(&self) {
        if let Some(session) = self.current() {
            session.disconnect();
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn NetworkEventListener>) -> ListenerId {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    /// Handle of the most recent attempt.
    pub fn current(&self) -> Option<SessionHandle> {
        self.current.lock().expect("lock poisoned").clone()
    }

    /// Endpoint of the most recent attempt.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.current().map(|session| session.endpoint().clone())
    }

    /// `true` while the most recent attempt is `Active`.
    pub fn is_active(&self) -> bool {
        self.current()
            .is_some_and(|session| session.state() == SessionState::Active)
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Ok(current) = self.current.get_mut() {
            if let Some(session) = current.take() {
                session.disconnect();
            }
        }
    }
}

// ── Attempt task ──────────────────────────────────────────────────────────────

struct AttemptTask {
    config: ConnectionConfig,
    factory: SecureSessionFactory,
    ctx: SessionContext,
}

impl AttemptTask {
    /// Runs the attempt to completion and publishes its single terminal event.
    async fn run(self, outbound: mpsc::UnboundedReceiver<Envelope>) {
        let handle = self.ctx.handle.clone();
        let notifier = Arc::clone(&self.ctx.notifier);
        info!(attempt = %handle.attempt(), "connecting to {}", handle.endpoint());

        let result = self.establish_and_run(outbound).await;

        let (state, kind) = match result {
            Ok(()) => (SessionState::Closed, EventKind::Disconnected),
            Err(ConnectionError::Refused) => (SessionState::Refused, EventKind::Refused),
            Err(ConnectionError::ConnectTimeout | ConnectionError::HandshakeTimeout) => {
                warn!(attempt = %handle.attempt(), "connection to {} timed out", handle.endpoint());
                (SessionState::Failed, EventKind::TimedOut)
            }
            Err(err) => {
                error!(attempt = %handle.attempt(), "connection to {} failed: {err}", handle.endpoint());
                (SessionState::Failed, EventKind::Error(Arc::new(err)))
            }
        };

        handle.set_state(state);
        info!(attempt = %handle.attempt(), "session ended: {state:?}");
        notifier.publish(&NetworkEvent::new(handle.attempt(), kind));
    }

    async fn establish_and_run(
        self,
        outbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<(), ConnectionError> {
        if self.config.require_mutual_auth {
            if let Some(cause) = self.factory.degradation() {
                return Err(ConnectionError::Credential(cause));
            }
        }

        let shutdown = self.ctx.handle.shutdown().clone();
        let stream = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            opened = tokio::time::timeout(self.config.connect_timeout, self.open_stream()) => {
                opened.map_err(|_| ConnectionError::ConnectTimeout)??
            }
        };

        session::run(stream, self.ctx, outbound).await
    }

    /// Resolves the endpoint, connects TCP, and completes the TLS handshake.
    async fn open_stream(&self) -> Result<TlsStream<TcpStream>, ConnectionError> {
        let endpoint = self.ctx.handle.endpoint();
        let server_name = server_name_for(&endpoint.host, self.config.server_name.as_deref())
            .map_err(ConnectionError::ServerName)?;

        let addrs = lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|source| ConnectionError::Resolve {
                host: endpoint.host.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match connect_tcp(addr, self.config.tcp_keepalive).await {
                Ok(tcp) => {
                    let tls = self
                        .factory
                        .connector()
                        .connect(server_name.clone(), tcp)
                        .await
                        .map_err(ConnectionError::Tls)?;
                    debug!(attempt = %self.ctx.handle.attempt(), "TLS session established with {addr}");
                    return Ok(tls);
                }
                Err(e) => {
                    debug!("TCP connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => ConnectionError::Transport(e),
            None => ConnectionError::Resolve {
                host: endpoint.host.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
            },
        })
    }
}

async fn connect_tcp(addr: SocketAddr, keepalive: bool) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(keepalive)?;
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// ── EnvelopeSink ──────────────────────────────────────────────────────────────

impl crate::application::remote_control::EnvelopeSink for Connector {
    fn submit(&self, envelope: Envelope) {
        self.send(envelope);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
