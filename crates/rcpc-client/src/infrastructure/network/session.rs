//! One connection to the host: identity handshake, reader task, writer loop,
//! and the graceful close.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Handshaking ──► Active ──► Closing ──► Closed
//!                    │  │                       │
//!                    │  └──► Refused            └──► Failed (a cause was recorded)
//!                    └─────► Failed
//! ```
//!
//! The session body is generic over the byte stream so that it runs the same
//! over TLS in production and over an in-memory duplex pipe in unit tests.
//!
//! # Shutdown
//!
//! The reader and the writer share one terminating signal.  Whichever loop
//! stops first triggers it, `disconnect()` triggers it, and an inbound
//! closing envelope triggers it.  Both loops `select!` on it, so neither
//! can stay blocked on a silent peer.  The first failure observed before
//! the signal was set becomes the session's cause; failures seen afterwards
//! are the expected fallout of a local close and are only logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcpc_core::{decode_envelope, encode_line, Envelope, EnvelopeKind, MAX_ENVELOPE_LEN};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::framing::EnvelopeLines;
use super::shutdown::ShutdownSignal;
use super::{AttemptId, ConnectionError, Endpoint, EventKind, NetworkEvent};
use crate::infrastructure::notifier::EventNotifier;
use crate::infrastructure::storage::DeviceIdentity;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resolving, connecting TCP, and negotiating TLS.
    Connecting,
    /// Identity sent, waiting for the host's verdict.
    Handshaking,
    /// Accepted; envelopes flow both ways.
    Active,
    /// Loops are stopping and the stream is being closed.
    Closing,
    /// Ended without a failure.
    Closed,
    /// The host declined the connection.
    Refused,
    /// Ended with a failure or a timeout.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Closed | SessionState::Refused | SessionState::Failed
        )
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

pub(crate) struct SessionShared {
    attempt: AttemptId,
    endpoint: Endpoint,
    state: watch::Sender<SessionState>,
    outbound: mpsc::UnboundedSender<Envelope>,
    shutdown: ShutdownSignal,
    disconnect_requested: AtomicBool,
    closed_by_host: AtomicBool,
    failure: Mutex<Option<ConnectionError>>,
}

/// Caller-side view of one connection attempt.
///
/// Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Creates a handle in the `Connecting` state together with the receiving
    /// end of its outbound queue.
    pub(crate) fn new(
        attempt: AttemptId,
        endpoint: Endpoint,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connecting);
        let shared = Arc::new(SessionShared {
            attempt,
            endpoint,
            state,
            outbound,
            shutdown: ShutdownSignal::new(),
            disconnect_requested: AtomicBool::new(false),
            closed_by_host: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        (Self { shared }, rx)
    }

    pub fn attempt(&self) -> AttemptId {
        self.shared.attempt
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// `true` once `disconnect()` has been called on any clone of this handle.
    pub fn disconnect_requested(&self) -> bool {
        self.shared.disconnect_requested.load(Ordering::Acquire)
    }

    /// Queues `envelope` for the writer.
    ///
    /// Returns `false`, and drops the envelope, unless the session is
    /// `Active` and not shutting down.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.state() != SessionState::Active || self.shared.shutdown.is_triggered() {
            debug!(
                attempt = %self.attempt(),
                "dropping {}: session not active",
                envelope.type_name()
            );
            return false;
        }
        self.shared.outbound.send(envelope).is_ok()
    }

    /// Asks the session to end.  Idempotent; safe in any state.
    ///
    /// Returns immediately.  The session closes the stream itself and then
    /// publishes its terminal event.
    pub fn disconnect(&self) {
        if !self.shared.disconnect_requested.swap(true, Ordering::AcqRel) {
            info!(attempt = %self.attempt(), "disconnect requested");
        }
        self.shared.shutdown.trigger();
    }

    /// Waits until the session reached a terminal state.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.state.send_replace(state);
    }

    pub(crate) fn shutdown(&self) -> &ShutdownSignal {
        &self.shared.shutdown
    }

    /// Records `err` as the session's cause unless the session was already
    /// terminating or has a cause, then triggers termination.
    pub(crate) fn fail(&self, err: ConnectionError) {
        let mut failure = self.shared.failure.lock().expect("lock poisoned");
        if self.shared.shutdown.is_triggered() {
            debug!(attempt = %self.attempt(), "ignoring error after shutdown: {err}");
        } else if failure.is_none() {
            *failure = Some(err);
        }
        self.shared.shutdown.trigger();
    }

    fn take_failure(&self) -> Option<ConnectionError> {
        self.shared.failure.lock().expect("lock poisoned").take()
    }

    fn mark_closed_by_host(&self) {
        self.shared.closed_by_host.store(true, Ordering::Release);
        self.shared.shutdown.trigger();
    }

    fn closed_by_host(&self) -> bool {
        self.shared.closed_by_host.load(Ordering::Acquire)
    }

    fn enqueue(&self, envelope: Envelope) {
        // Only fails once the receiver is gone, i.e. the writer has exited.
        let _ = self.shared.outbound.send(envelope);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("attempt", &self.attempt())
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

// ── Session body ──────────────────────────────────────────────────────────────

/// Everything a running session needs besides its stream.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub handle: SessionHandle,
    pub notifier: Arc<EventNotifier>,
    pub identity: Arc<dyn DeviceIdentity>,
    pub handshake_timeout: Duration,
    pub close_timeout: Duration,
}

impl SessionContext {
    fn publish(&self, kind: EventKind) {
        self.notifier
            .publish(&NetworkEvent::new(self.handle.attempt(), kind));
    }

    fn identity_envelope(&self) -> Result<Envelope, ConnectionError> {
        Ok(Envelope::identity(self.identity.device_id()?))
    }
}

type LineReader<S> = EnvelopeLines<ReadHalf<S>>;

enum Verdict {
    Accepted,
    Cancelled,
}

/// Runs the session over an established stream until it ends.
///
/// Returns `Ok(())` for a clean end (local disconnect or host close) and the
/// recorded cause otherwise.  The stream is closed before this returns.
pub(crate) async fn run<S>(
    stream: S,
    ctx: SessionContext,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut lines = EnvelopeLines::new(read_half, MAX_ENVELOPE_LEN);

    ctx.handle.set_state(SessionState::Handshaking);
    match handshake(&ctx, &mut lines, &mut writer).await {
        Ok(Verdict::Accepted) => {}
        Ok(Verdict::Cancelled) => {
            close_quietly(&ctx, lines, writer, false).await;
            return Ok(());
        }
        Err(err) => {
            close_quietly(&ctx, lines, writer, false).await;
            return Err(err);
        }
    }

    ctx.handle.set_state(SessionState::Active);
    info!(attempt = %ctx.handle.attempt(), "host accepted connection");
    ctx.publish(EventKind::Accepted);

    let reader = tokio::spawn(read_loop(ctx.clone(), lines));
    let output_ok = write_loop(&ctx, &mut writer, &mut outbound).await;

    ctx.handle.shutdown().trigger();
    ctx.handle.set_state(SessionState::Closing);
    drop(outbound);

    match reader.await {
        Ok(lines) => {
            let send_goodbye = output_ok && !ctx.handle.closed_by_host();
            close_quietly(&ctx, lines, writer, send_goodbye).await;
        }
        // The reader's exit guard already recorded the failure; the read
        // half is gone, so the stream is dropped without a clean close.
        Err(e) => error!(attempt = %ctx.handle.attempt(), "reader task failed: {e}"),
    }

    match ctx.handle.take_failure() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn handshake<S>(
    ctx: &SessionContext,
    lines: &mut LineReader<S>,
    writer: &mut WriteHalf<S>,
) -> Result<Verdict, ConnectionError>
where
    S: AsyncRead + AsyncWrite,
{
    let shutdown = ctx.handle.shutdown().clone();

    let announcement = encode_line(&ctx.identity_envelope()?)?;
    tokio::select! {
        biased;
        _ = shutdown.wait() => return Ok(Verdict::Cancelled),
        written = write_all_flush(writer, &announcement) => {
            written.map_err(ConnectionError::Transport)?;
        }
    }
    debug!(attempt = %ctx.handle.attempt(), "identity sent; awaiting verdict");

    let line = tokio::select! {
        biased;
        _ = shutdown.wait() => return Ok(Verdict::Cancelled),
        read = tokio::time::timeout(ctx.handshake_timeout, lines.next_line()) => {
            match read {
                Err(_) => return Err(ConnectionError::HandshakeTimeout),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => {
                    return Err(ConnectionError::Transport(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "host closed the stream during the handshake",
                    )))
                }
                Ok(Ok(Some(line))) => line,
            }
        }
    };

    match decode_envelope(&line)? {
        Envelope::Accepted => Ok(Verdict::Accepted),
        Envelope::Closed => {
            info!(attempt = %ctx.handle.attempt(), "host refused connection");
            Err(ConnectionError::Refused)
        }
        other => Err(ConnectionError::Protocol(format!(
            "expected a connection verdict, got {}",
            other.type_name()
        ))),
    }
}

/// Reads envelopes until the host closes, a read fails, or shutdown is
/// triggered.  Hands the reader back so the stream can be reunited.
async fn read_loop<S>(ctx: SessionContext, mut lines: LineReader<S>) -> LineReader<S>
where
    S: AsyncRead,
{
    let _exit = ReaderExit(ctx.handle.clone());
    let shutdown = ctx.handle.shutdown().clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                ctx.handle.fail(ConnectionError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "host closed the stream without a closing envelope",
                )));
                break;
            }
            Err(err) => {
                if !shutdown.is_triggered() {
                    error!(attempt = %ctx.handle.attempt(), "read error on control channel: {err}");
                }
                ctx.handle.fail(err);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match decode_envelope(&line) {
            Ok(envelope) => {
                if !handle_inbound(&ctx, envelope) {
                    break;
                }
            }
            Err(e) => {
                warn!(attempt = %ctx.handle.attempt(), "failed to decode inbound envelope: {e}");
                ctx.handle.fail(ConnectionError::Codec(e));
                break;
            }
        }
    }
    lines
}

/// Ends the session whenever the reader stops, including by panic, so the
/// writer never waits on a reader that is gone.
struct ReaderExit(SessionHandle);

impl Drop for ReaderExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0
                .fail(ConnectionError::TaskFailed("reader panicked".to_string()));
        } else {
            self.0.shutdown().trigger();
        }
    }
}

/// Publishes an inbound envelope and acts on the control types.  Returns
/// `false` when the reader should stop.
fn handle_inbound(ctx: &SessionContext, envelope: Envelope) -> bool {
    if ctx.handle.shutdown().is_triggered() {
        return false;
    }

    let kind = envelope.kind();
    debug!(attempt = %ctx.handle.attempt(), "received {}", envelope.type_name());
    ctx.publish(EventKind::MessageReceived(envelope));

    match kind {
        EnvelopeKind::GetUuid => match ctx.identity_envelope() {
            Ok(identity) => ctx.handle.enqueue(identity),
            Err(e) => warn!(attempt = %ctx.handle.attempt(), "cannot re-announce identity: {e}"),
        },
        EnvelopeKind::Closed => {
            info!(attempt = %ctx.handle.attempt(), "host closed the connection");
            ctx.handle.mark_closed_by_host();
            return false;
        }
        _ => {}
    }
    true
}

/// Drains the outbound queue in FIFO order until shutdown.  Returns `false`
/// if the output is no longer usable for a closing envelope.
async fn write_loop<W>(
    ctx: &SessionContext,
    writer: &mut W,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let shutdown = ctx.handle.shutdown().clone();
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.wait() => return true,
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => return true,
            },
        };

        let line = match encode_line(&envelope) {
            Ok(line) => line,
            Err(e) => {
                warn!(attempt = %ctx.handle.attempt(), "dropping unencodable {}: {e}", envelope.type_name());
                continue;
            }
        };

        let written = tokio::select! {
            biased;
            // A write cut short leaves a partial line on the wire.
            _ = shutdown.wait() => return false,
            written = write_all_flush(writer, &line) => written,
        };
        if let Err(e) = written {
            error!(attempt = %ctx.handle.attempt(), "failed to send {}: {e}", envelope.type_name());
            ctx.handle.fail(ConnectionError::Transport(e));
            return false;
        }

        debug!(attempt = %ctx.handle.attempt(), "sent {}", envelope.type_name());
        ctx.publish(EventKind::MessageSent(envelope));
    }
}

async fn write_all_flush<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Reunites the halves, optionally says goodbye, and shuts the stream down.
/// Consumes the stream, so it runs at most once per session.
///
/// Bounded by the close timeout: a host that stopped reading cannot hold the
/// session open.  On expiry the stream is simply dropped.
async fn close_quietly<S>(
    ctx: &SessionContext,
    lines: LineReader<S>,
    writer: WriteHalf<S>,
    send_goodbye: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = lines.into_inner().unsplit(writer);
    let attempt = ctx.handle.attempt();

    let close = async {
        if send_goodbye {
            match encode_line(&Envelope::Closed) {
                Ok(line) => {
                    if let Err(e) = write_all_flush(&mut stream, &line).await {
                        debug!(%attempt, "closing envelope not delivered: {e}");
                    }
                }
                Err(e) => debug!("cannot encode closing envelope: {e}"),
            }
        }

        if let Err(e) = stream.shutdown().await {
            debug!(%attempt, "error shutting down stream: {e}");
        }
    };

    if tokio::time::timeout(ctx.close_timeout, close).await.is_err() {
        debug!(
            %attempt,
            "close did not finish within {:?}; dropping the stream",
            ctx.close_timeout
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::device_id::MockDeviceIdentity;
    use crate::infrastructure::storage::{FixedDeviceIdentity, StorageError};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    const DEVICE_ID: &str = "6f1c2f0e-0b7d-4d52-9a3a-0d1f4a4e6b11";

    struct Harness {
        handle: SessionHandle,
        events: mpsc::UnboundedReceiver<NetworkEvent>,
        task: tokio::task::JoinHandle<Result<(), ConnectionError>>,
        host_lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        host_writer: WriteHalf<DuplexStream>,
    }

    impl Harness {
        fn start(identity: Arc<dyn DeviceIdentity>, handshake_timeout: Duration) -> Self {
            Self::start_with(identity, handshake_timeout, |client| client)
        }

        /// Runs the session over `wrap(client end)` of the in-memory pipe.
        fn start_with<S, F>(
            identity: Arc<dyn DeviceIdentity>,
            handshake_timeout: Duration,
            wrap: F,
        ) -> Self
        where
            S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
            F: FnOnce(DuplexStream) -> S,
        {
            let (client, host) = tokio::io::duplex(4096);
            let (handle, outbound) = SessionHandle::new(AttemptId(7), Endpoint::new("127.0.0.1", 666));

            let notifier = Arc::new(EventNotifier::new());
            let (tx, events) = mpsc::unbounded_channel();
            notifier.subscribe_fn(move |event: &NetworkEvent| {
                let _ = tx.send(event.clone());
            });

            let ctx = SessionContext {
                handle: handle.clone(),
                notifier,
                identity,
                handshake_timeout,
                close_timeout: Duration::from_millis(500),
            };
            let task = tokio::spawn(run(wrap(client), ctx, outbound));

            let (host_read, host_writer) = tokio::io::split(host);
            Self {
                handle,
                events,
                task,
                host_lines: BufReader::new(host_read).lines(),
                host_writer,
            }
        }

        fn fixed() -> Self {
            Self::start(Arc::new(FixedDeviceIdentity::new(DEVICE_ID)), Duration::from_secs(2))
        }

        async fn host_recv(&mut self) -> Option<Envelope> {
            let line = tokio::time::timeout(Duration::from_secs(2), self.host_lines.next_line())
                .await
                .expect("host read timed out")
                .expect("host read failed")?;
            Some(decode_envelope(&line).expect("client sent a valid envelope"))
        }

        async fn host_send(&mut self, envelope: &Envelope) {
            let line = encode_line(envelope).unwrap();
            self.host_writer.write_all(line.as_bytes()).await.unwrap();
            self.host_writer.flush().await.unwrap();
        }

        async fn next_event(&mut self) -> EventKind {
            tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("event timed out")
                .expect("notifier dropped")
                .kind
        }

        async fn accept(&mut self) {
            assert_eq!(self.host_recv().await, Some(Envelope::identity(DEVICE_ID)));
            self.host_send(&Envelope::Accepted).await;
            assert!(matches!(self.next_event().await, EventKind::Accepted));
        }

        async fn finish(self) -> Result<(), ConnectionError> {
            tokio::time::timeout(Duration::from_secs(2), self.task)
                .await
                .expect("session did not end")
                .expect("session task panicked")
        }
    }

    #[tokio::test]
    async fn test_accepted_session_becomes_active_and_sends() {
        // Arrange
        let mut h = Harness::fixed();

        // Act
        h.accept().await;
        let queued = h.handle.send(Envelope::PlayPause);

        // Assert
        assert!(queued);
        assert_eq!(h.handle.state(), SessionState::Active);
        assert_eq!(h.host_recv().await, Some(Envelope::PlayPause));
        assert!(matches!(
            h.next_event().await,
            EventKind::MessageSent(Envelope::PlayPause)
        ));

        h.handle.disconnect();
        assert_eq!(h.host_recv().await, Some(Envelope::Closed));
        assert!(h.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_refusal_ends_handshake_without_loops() {
        // Arrange
        let mut h = Harness::fixed();
        assert_eq!(h.host_recv().await, Some(Envelope::identity(DEVICE_ID)));

        // Act
        h.host_send(&Envelope::Closed).await;

        // Assert – nothing but the identity was written, then EOF
        assert_eq!(h.host_recv().await, None);
        assert!(!h.handle.send(Envelope::Stop));
        assert!(matches!(h.finish().await, Err(ConnectionError::Refused)));
    }

    #[tokio::test]
    async fn test_unexpected_handshake_reply_is_protocol_error() {
        let mut h = Harness::fixed();
        h.host_recv().await;

        h.host_send(&Envelope::VolumeUpdate { volume: 0.5 }).await;

        assert!(matches!(h.finish().await, Err(ConnectionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_malformed_handshake_reply_is_codec_error() {
        let mut h = Harness::fixed();
        h.host_recv().await;

        h.host_writer.write_all(b"{not json\n").await.unwrap();

        assert!(matches!(h.finish().await, Err(ConnectionError::Codec(_))));
    }

    #[tokio::test]
    async fn test_silent_host_hits_handshake_timeout() {
        let mut h = Harness::start(
            Arc::new(FixedDeviceIdentity::new(DEVICE_ID)),
            Duration::from_millis(100),
        );
        h.host_recv().await;

        assert!(matches!(h.finish().await, Err(ConnectionError::HandshakeTimeout)));
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_is_clean() {
        let mut h = Harness::fixed();
        h.host_recv().await;

        h.handle.disconnect();

        assert!(h.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_host_close_publishes_message_and_ends_cleanly() {
        // Arrange
        let mut h = Harness::fixed();
        h.accept().await;

        // Act
        h.host_send(&Envelope::Closed).await;

        // Assert
        assert!(matches!(
            h.next_event().await,
            EventKind::MessageReceived(Envelope::Closed)
        ));
        // No goodbye is echoed back to a host that closed first.
        assert_eq!(h.host_recv().await, None);
        assert!(h.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_get_uuid_requeues_identity() {
        let mut h = Harness::fixed();
        h.accept().await;

        h.host_send(&Envelope::GetUuid).await;

        assert_eq!(h.host_recv().await, Some(Envelope::identity(DEVICE_ID)));
        h.handle.disconnect();
        assert!(h.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_abrupt_eof_records_transport_error() {
        // Arrange
        let mut h = Harness::fixed();
        h.accept().await;

        // Act – host drops both halves without a closing envelope
        let Harness {
            task,
            host_lines,
            host_writer,
            ..
        } = h;
        drop(host_lines);
        drop(host_writer);

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_undecodable_envelope_while_active_fails_session() {
        let mut h = Harness::fixed();
        h.accept().await;

        h.host_writer.write_all(b"{\"distanceX\":1}\n").await.unwrap();

        assert!(matches!(h.finish().await, Err(ConnectionError::Codec(_))));
    }

    #[tokio::test]
    async fn test_send_before_acceptance_is_dropped() {
        let mut h = Harness::fixed();
        h.host_recv().await;

        assert!(!h.handle.send(Envelope::NextTrack));

        h.host_send(&Envelope::Accepted).await;
        assert!(matches!(h.next_event().await, EventKind::Accepted));
        h.handle.disconnect();
        // The dropped envelope never reaches the wire.
        assert_eq!(h.host_recv().await, Some(Envelope::Closed));
        assert!(h.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_identity_failure_aborts_handshake() {
        // Arrange
        let mut identity = MockDeviceIdentity::new();
        identity.expect_device_id().times(1).returning(|| {
            Err(StorageError::Io {
                path: "/readonly/device_id".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        });

        // Act
        let h = Harness::start(Arc::new(identity), Duration::from_secs(1));

        // Assert
        assert!(matches!(h.finish().await, Err(ConnectionError::Identity(_))));
    }
    /// Passes reads and writes through but never finishes a shutdown, like a
    /// TLS stream whose close_notify cannot be flushed to a stalled host.
    struct StalledShutdown(DuplexStream);

    impl AsyncRead for StalledShutdown {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for StalledShutdown {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_that_never_completes_is_abandoned_after_timeout() {
        // Arrange
        let mut h = Harness::start_with(
            Arc::new(FixedDeviceIdentity::new(DEVICE_ID)),
            Duration::from_secs(2),
            StalledShutdown,
        );
        h.accept().await;

        // Act
        h.handle.disconnect();

        // Assert – goodbye written, stream shutdown stalls, session still ends
        assert_eq!(h.host_recv().await, Some(Envelope::Closed));
        assert!(h.finish().await.is_ok());
    }

    /// Answers once, then panics: a store that breaks mid-session.
    struct CrashesOnRepeat(AtomicBool);

    impl DeviceIdentity for CrashesOnRepeat {
        fn device_id(&self) -> Result<String, StorageError> {
            if self.0.swap(true, Ordering::SeqCst) {
                panic!("identity store crashed");
            }
            Ok(DEVICE_ID.to_string())
        }
    }

    #[tokio::test]
    async fn test_reader_panic_ends_session_with_task_failure() {
        // Arrange
        let mut h = Harness::start(
            Arc::new(CrashesOnRepeat(AtomicBool::new(false))),
            Duration::from_secs(2),
        );
        h.accept().await;
        let handle = h.handle.clone();

        // Act – the reader re-reads the identity and panics
        h.host_send(&Envelope::GetUuid).await;

        // Assert
        assert!(matches!(
            h.next_event().await,
            EventKind::MessageReceived(Envelope::GetUuid)
        ));
        assert!(matches!(h.finish().await, Err(ConnectionError::TaskFailed(_))));
        assert!(!handle.send(Envelope::Stop));
    }
}
