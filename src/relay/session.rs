//! # Relay Sessions
//!
//! A session is one end of a persistent, bidirectional frame stream. The bridge only
//! ever talks to the [`Session`] half; whatever drives the real connection (the actix
//! WebSocket actor for browsers, a tokio-tungstenite task for the upstream service)
//! holds the two transport ports.
//!
//! ```text
//!   bridge side                        transport side
//!   Session::send ──► outbound chan ──► OutboundPort::next ──► socket write
//!   Session::receive ◄── inbound chan ◄── InboundPort::deliver ◄── socket read
//! ```
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: Created, transport handshake not finished yet
//! 2. **Open**: Frames flow in both directions
//! 3. **Closing**: The remote end closed cleanly; buffered frames can still be read
//! 4. **Closed**: Released. `send` fails, `receive` drains then ends
//!
//! `Connecting → Closed` happens when a handshake fails and `Open → Closed` on an
//! abrupt transport error. Both are terminal.
//!
//! ## Close signal:
//! Closing fires a `tokio::sync::watch` flag. Every suspended `send`, `receive`,
//! `deliver` or `next` selects on it, so nothing stays blocked on a dead session.

use crate::error::{ReceiveError, SendError};
use futures_util::stream::{self, Stream};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// One discrete unit of data relayed between sessions.
///
/// The WebSocket opcode is preserved so text stays text and binary stays binary on
/// the other side of the bridge.
///
/// ## Rust Concepts:
/// - **enum with data**: Each variant owns its payload, so a frame moves through
///   the channels without copying
/// - **#[derive(PartialEq, Eq)]**: Lets tests compare relayed frames directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which end of a bridge a session sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// The browser connected to this server
    Client,
    /// The external transcription service
    Upstream,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Client => write!(f, "client"),
            SessionRole::Upstream => write!(f, "upstream"),
        }
    }
}

/// Lifecycle state of a session.
///
/// Stored as a `u8` inside an `AtomicU8`, so reading the state never takes a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Open => 1,
            SessionState::Closing => 2,
            SessionState::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by every handle of one session.
struct Shared {
    id: String,
    role: SessionRole,
    state: AtomicU8,
    closed_tx: watch::Sender<bool>,
    /// Transport failure to report once the inbound buffer is drained
    failure: Mutex<Option<ReceiveError>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `Closed` and fires the close signal. Only the first caller wins.
    fn shut(&self) -> bool {
        let previous = self.state.swap(SessionState::Closed.as_u8(), Ordering::AcqRel);
        if previous == SessionState::Closed.as_u8() {
            return false;
        }
        self.closed_tx.send_replace(true);
        true
    }

    fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn record_failure(&self, error: ReceiveError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    fn take_failure(&self) -> Option<ReceiveError> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Releases the session once the last transport port is gone.
struct TransportGuard {
    shared: Arc<Shared>,
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.shared.shut();
    }
}

/// Bridge-facing handle of a session.
///
/// Not `Clone`: a session belongs to exactly one bridge. Use [`Session::split`] to
/// hand the sending and receiving halves to different tasks.
pub struct Session {
    sender: SessionSender,
    receiver: SessionReceiver,
}

impl Session {
    /// Create a session in the `Connecting` state together with its transport ports.
    ///
    /// ## What this does:
    /// 1. Allocates the shared state (id, role, atomic state, close signal)
    /// 2. Creates two bounded `mpsc` channels, one per direction
    /// 3. Hands the bridge-facing ends to the [`Session`] and the other ends to
    ///    the [`InboundPort`] / [`OutboundPort`] pair
    ///
    /// ## Backpressure:
    /// `capacity` bounds both directions (at least 1). A full channel makes the
    /// writer wait instead of buffering without limit.
    ///
    /// ## Rust Concepts:
    /// - **Tuple return**: The caller destructures the three handles and passes
    ///   each to the task that owns it
    /// - **Arc<TransportGuard>**: Shared by both ports; when the last port is dropped
    ///   the guard's `Drop` closes the session
    pub fn pair(role: SessionRole, capacity: usize) -> (Session, InboundPort, OutboundPort) {
        let capacity = capacity.max(1);
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4().to_string(),
            role,
            state: AtomicU8::new(SessionState::Connecting.as_u8()),
            closed_tx,
            failure: Mutex::new(None),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let guard = Arc::new(TransportGuard { shared: shared.clone() });

        let session = Session {
            sender: SessionSender { shared: shared.clone(), outbound: outbound_tx },
            receiver: SessionReceiver { shared: shared.clone(), inbound: inbound_rx },
        };
        let inbound = InboundPort {
            shared: shared.clone(),
            tx: inbound_tx,
            _guard: guard.clone(),
        };
        let outbound = OutboundPort {
            closed: shared.closed_signal(),
            shared,
            rx: outbound_rx,
            draining: false,
            _guard: guard,
        };

        (session, inbound, outbound)
    }

    pub fn id(&self) -> &str {
        &self.sender.shared.id
    }

    pub fn role(&self) -> SessionRole {
        self.sender.shared.role
    }

    pub fn state(&self) -> SessionState {
        self.sender.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Queue a frame for the transport. See [`SessionSender::send`].
    pub async fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender.send(frame).await
    }

    /// Next frame from the transport. See [`SessionReceiver::receive`].
    pub async fn receive(&mut self) -> Result<Option<Frame>, ReceiveError> {
        self.receiver.receive().await
    }

    /// Close the session. Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    /// A detached handle that can close this session from anywhere.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser { shared: self.sender.shared.clone() }
    }

    pub fn split(self) -> (SessionSender, SessionReceiver) {
        (self.sender, self.receiver)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}

/// Sending half of a session.
#[derive(Clone)]
pub struct SessionSender {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Frame>,
}

impl SessionSender {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> SessionRole {
        self.shared.role
    }

    /// Queue a frame for the transport.
    ///
    /// ## Returns:
    /// - **Ok(())**: The frame is queued and will be written in order
    /// - **Err(NotOpen(state))**: The session is `Connecting`, `Closing` or `Closed`
    /// - **Err(Disconnected)**: The transport's write side went away
    ///
    /// A send waiting on a full channel gives up as soon as the session closes, so
    /// no frame is accepted after `Closed`.
    ///
    /// ## Rust Concepts:
    /// - **tokio::select! with `biased;`**: Polls the close signal first on every
    ///   wakeup, so a close always wins over a send that just became possible
    pub async fn send(&self, frame: Frame) -> Result<(), SendError> {
        let state = self.shared.state();
        if state != SessionState::Open {
            return Err(SendError::NotOpen(state));
        }

        let mut closed = self.shared.closed_signal();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(SendError::NotOpen(self.shared.state())),
            sent = self.outbound.send(frame) => sent.map_err(|_| SendError::Disconnected),
        }
    }

    pub fn close(&self) -> bool {
        self.shared.shut()
    }
}

/// Receiving half of a session.
pub struct SessionReceiver {
    shared: Arc<Shared>,
    inbound: mpsc::Receiver<Frame>,
}

impl SessionReceiver {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> SessionRole {
        self.shared.role
    }

    /// Wait for the next frame.
    ///
    /// ## Returns:
    /// - **Ok(Some(frame))**: Frames already buffered are always handed out first
    /// - **Ok(None)**: The remote closed cleanly or the session was closed
    /// - **Err(error)**: The transport failed; reported after the frames that preceded it
    pub async fn receive(&mut self) -> Result<Option<Frame>, ReceiveError> {
        let mut closed = self.shared.closed_signal();
        tokio::select! {
            biased;
            frame = self.inbound.recv() => match frame {
                Some(frame) => Ok(Some(frame)),
                None => self.end_of_stream(),
            },
            _ = closed.wait_for(|closed| *closed) => self.end_of_stream(),
        }
    }

    fn end_of_stream(&self) -> Result<Option<Frame>, ReceiveError> {
        match self.shared.take_failure() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

/// Closes a session without owning it. Used by bridge teardown.
#[derive(Clone)]
pub struct SessionCloser {
    shared: Arc<Shared>,
}

impl SessionCloser {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn close(&self) -> bool {
        self.shared.shut()
    }
}

impl fmt::Debug for SessionCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCloser")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Transport side, read direction: pushes frames read from the socket into the session.
#[derive(Clone)]
pub struct InboundPort {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Frame>,
    _guard: Arc<TransportGuard>,
}

impl InboundPort {
    pub fn session_id(&self) -> &str {
        &self.shared.id
    }

    /// Handshake finished: `Connecting → Open`.
    pub fn mark_open(&self) -> bool {
        self.shared.transition(SessionState::Connecting, SessionState::Open)
    }

    /// Hand a frame to the session, waiting for room in the channel.
    ///
    /// Returns `false` once the session is closed; the frame is dropped because
    /// nothing will read it. The transport should stop reading its socket then.
    pub async fn deliver(&self, frame: Frame) -> bool {
        if self.shared.state() == SessionState::Closed {
            return false;
        }

        let mut closed = self.shared.closed_signal();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => false,
            sent = self.tx.send(frame) => sent.is_ok(),
        }
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed_signal();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// The remote closed cleanly: `Open → Closing`. The session reads what is
    /// buffered and then sees end-of-stream.
    pub fn finish(self) {
        self.shared.transition(SessionState::Open, SessionState::Closing);
    }

    /// The connection broke. The error surfaces from `receive` after buffered frames.
    pub fn fail(self, error: ReceiveError) {
        if self.shared.state() == SessionState::Closed {
            return;
        }
        self.shared.record_failure(error);
        self.shared.shut();
    }
}

/// Transport side, write direction: yields frames the session wants written.
pub struct OutboundPort {
    shared: Arc<Shared>,
    rx: mpsc::Receiver<Frame>,
    closed: watch::Receiver<bool>,
    draining: bool,
    _guard: Arc<TransportGuard>,
}

impl OutboundPort {
    pub fn session_id(&self) -> &str {
        &self.shared.id
    }

    /// Next frame to write, or `None` once the session is closed and every frame
    /// accepted before the close has been handed out.
    ///
    /// ## Draining:
    /// After the close signal fires the port switches to `try_recv`, which empties
    /// what is already queued without waiting for anything new.
    pub async fn next(&mut self) -> Option<Frame> {
        if !self.draining {
            tokio::select! {
                biased;
                frame = self.rx.recv() => return frame,
                _ = self.closed.wait_for(|closed| *closed) => self.draining = true,
            }
        }
        self.rx.try_recv().ok()
    }

    /// Writing failed; close the session and report why.
    pub fn fail(self, error: ReceiveError) {
        if self.shared.state() == SessionState::Closed {
            return;
        }
        self.shared.record_failure(error);
        self.shared.shut();
    }

    /// Adapter for consumers that want a `Stream`, such as an actix context.
    pub fn into_stream(self) -> impl Stream<Item = Frame> {
        stream::unfold(self, |mut port| async move {
            let frame = port.next().await?;
            Some((frame, port))
        })
    }
}
