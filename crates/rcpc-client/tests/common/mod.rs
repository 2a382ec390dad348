//! Shared helpers for the integration tests: an in-process mutual-TLS host
//! built from the PEM fixtures, and an event recorder.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rcpc_client::infrastructure::network::{
    ConnectionConfig, Connector, Endpoint, EventKind, NetworkEvent,
};
use rcpc_client::infrastructure::notifier::EventNotifier;
use rcpc_client::infrastructure::storage::FixedDeviceIdentity;
use rcpc_client::infrastructure::tls::{CredentialMaterial, SecureSessionFactory};
use rcpc_core::{decode_envelope, encode_line, Envelope};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub const DEVICE_ID: &str = "3b7e9a52-2f7c-4c1e-8d43-5a0b6c9e1f27";

const CA: &[u8] = include_bytes!("../fixtures/ca.pem");
const HOST_PEM: &[u8] = include_bytes!("../fixtures/host.pem");
const HOST_KEY: &[u8] = include_bytes!("../fixtures/host.key");
const CLIENT_PEM: &[u8] = include_bytes!("../fixtures/client.pem");
const CLIENT_KEY: &[u8] = include_bytes!("../fixtures/client.key");
const ROGUE_HOST_PEM: &[u8] = include_bytes!("../fixtures/rogue-host.pem");
const ROGUE_HOST_KEY: &[u8] = include_bytes!("../fixtures/rogue-host.key");

const WAIT: Duration = Duration::from_secs(5);

fn certs(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .expect("fixture certificates")
}

fn key(pem: &[u8]) -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut &pem[..])
        .expect("fixture key")
        .expect("fixture holds a key")
}

fn server_config(cert_pem: &[u8], key_pem: &[u8]) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for anchor in certs(CA) {
        roots.add(anchor).expect("CA fixture");
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .expect("client verifier");

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs(cert_pem), key(key_pem))
        .expect("host certificate");
    Arc::new(config)
}

// ── Test host ─────────────────────────────────────────────────────────────────

/// A host application listening on an ephemeral loopback port.
pub struct TestHost {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TestHost {
    /// Host presenting a certificate the client trusts.
    pub async fn start() -> Self {
        Self::with_identity(HOST_PEM, HOST_KEY).await
    }

    /// Host presenting a certificate from an unknown CA.
    pub async fn start_rogue() -> Self {
        Self::with_identity(ROGUE_HOST_PEM, ROGUE_HOST_KEY).await
    }

    async fn with_identity(cert_pem: &[u8], key_pem: &[u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        Self {
            listener,
            acceptor: TlsAcceptor::from(server_config(cert_pem, key_pem)),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        let port = self.listener.local_addr().expect("local addr").port();
        Endpoint::new("127.0.0.1", port)
    }

    /// Accepts one connection and completes the TLS handshake.
    pub async fn try_accept(&self) -> std::io::Result<HostSide> {
        let (tcp, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("no client connected")?;
        let tls = tokio::time::timeout(WAIT, self.acceptor.accept(tcp))
            .await
            .expect("TLS accept timed out")?;
        let (read, writer) = tokio::io::split(tls);
        Ok(HostSide {
            lines: BufReader::new(read).lines(),
            writer,
        })
    }

    pub async fn accept(&self) -> HostSide {
        self.try_accept().await.expect("TLS accept")
    }

    /// Accepts a connection and reads the identity announcement.
    pub async fn accept_identity(&self) -> HostSide {
        let mut side = self.accept().await;
        assert_eq!(side.recv().await, Some(Envelope::identity(DEVICE_ID)));
        side
    }
}

/// The host's end of one client connection.
pub struct HostSide {
    lines: Lines<BufReader<ReadHalf<TlsStream<TcpStream>>>>,
    writer: WriteHalf<TlsStream<TcpStream>>,
}

impl HostSide {
    /// Next envelope from the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("host read timed out")
            .ok()
            .flatten()?;
        Some(decode_envelope(&line).expect("client sent a valid envelope"))
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let line = encode_line(envelope).expect("encode");
        self.writer.write_all(line.as_bytes()).await.expect("host write");
        self.writer.flush().await.expect("host flush");
    }

    /// Writes `text` with no line terminator.
    pub async fn send_partial(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.expect("host write");
        self.writer.flush().await.expect("host flush");
    }

    /// Writes `line` followed by a newline, as-is.
    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("host write");
        self.writer.write_all(b"\n").await.expect("host write");
        self.writer.flush().await.expect("host flush");
    }

    /// Drops the connection without a closing envelope or TLS close_notify.
    pub fn sever(self) {
        drop(self);
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

pub fn mutual_factory() -> SecureSessionFactory {
    let material = CredentialMaterial::from_pem(CLIENT_PEM, CLIENT_KEY, CA).expect("client fixtures");
    SecureSessionFactory::from_material(&material).expect("client context")
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_secs(3),
        handshake_timeout: Duration::from_secs(3),
        ..Default::default()
    }
}

/// A connector with fixture credentials and a recorder subscribed to it.
pub fn connector_with(config: ConnectionConfig) -> (Connector, Arc<EventNotifier>, EventLog) {
    let notifier = Arc::new(EventNotifier::new());
    let log = EventLog::attach(&notifier);
    let connector = Connector::new(
        config,
        mutual_factory(),
        Arc::clone(&notifier),
        Arc::new(FixedDeviceIdentity::new(DEVICE_ID)),
    );
    (connector, notifier, log)
}

pub fn connector() -> (Connector, EventLog) {
    let (connector, _, log) = connector_with(test_config());
    (connector, log)
}

// ── Event recorder ────────────────────────────────────────────────────────────

/// Every event published on a notifier, in publish order.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl EventLog {
    pub fn attach(notifier: &EventNotifier) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        notifier.subscribe_fn(move |event: &NetworkEvent| {
            let _ = tx.send(event.clone());
        });
        Self { rx }
    }

    pub async fn next(&mut self) -> NetworkEvent {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("notifier dropped")
    }

    /// Next event that is not a message notification.
    pub async fn next_lifecycle(&mut self) -> NetworkEvent {
        loop {
            let event = self.next().await;
            if !matches!(
                event.kind,
                EventKind::MessageReceived(_) | EventKind::MessageSent(_)
            ) {
                return event;
            }
        }
    }

    /// Asserts that nothing is published for `quiet`.
    pub async fn assert_quiet(&mut self, quiet: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(quiet, self.rx.recv()).await {
            panic!("unexpected event {event:?}");
        }
    }

    /// Lifecycle events up to and including the first terminal one.
    pub async fn lifecycle_until_terminal(&mut self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        loop {
            let event = self.next_lifecycle().await;
            let terminal = event.kind.is_terminal();
            kinds.push(event.kind);
            if terminal {
                return kinds;
            }
        }
    }
}
