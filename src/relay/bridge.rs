//! # Relay Bridge
//!
//! Couples one client session with one upstream session and forwards frames between
//! them until either side ends.
//!
//! ## Task Layout:
//! ```text
//!   pump A:  client.receive()   ──► upstream.send()
//!   pump B:  upstream.receive() ──► client.send()
//!   supervisor: joins A and B, produces the BridgeSummary
//! ```
//!
//! ## Teardown:
//! The pump that sees its source end (or a transport fail) calls
//! [`BridgeControl::teardown`]. An atomic swap on the `closed` flag makes sure only
//! the first call closes both sessions and removes the bridge from the registry.
//! The other pump notices right away because its session is now closed: `receive`
//! returns and `send` fails fast.
//!
//! A peer that hangs up cleanly is drained first. The pump writing to it stops
//! quietly, while the pump reading from it forwards whatever the peer sent before
//! hanging up and only then tears down, so the teardown reason stays
//! `ClientClosed` / `UpstreamClosed` and nothing already received is lost.

use crate::error::{BridgeSetupError, ReceiveError, SendError};
use crate::relay::registry::{BridgeInfo, SessionRegistry};
use crate::relay::session::{Session, SessionCloser, SessionReceiver, SessionRole, SessionSender, SessionState};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Direction a pump forwards frames in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// Why a bridge was torn down.
#[derive(Debug, Clone, PartialEq)]
pub enum TeardownReason {
    /// The browser closed its connection
    ClientClosed,

    /// The transcription service closed its connection
    UpstreamClosed,

    /// Reading from a session failed
    ReceiveFailed { role: SessionRole, error: ReceiveError },

    /// Writing to a session failed
    SendFailed { role: SessionRole, error: SendError },

    /// Closed from outside: handle `close()` or process shutdown
    Shutdown,

    /// A pump task panicked or was cancelled
    TaskFailed(String),
}

impl TeardownReason {
    /// Whether this reason should be logged and counted as a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TeardownReason::ReceiveFailed { .. }
                | TeardownReason::SendFailed { .. }
                | TeardownReason::TaskFailed(_)
        )
    }

    fn for_end_of_stream(role: SessionRole) -> Self {
        match role {
            SessionRole::Client => TeardownReason::ClientClosed,
            SessionRole::Upstream => TeardownReason::UpstreamClosed,
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::ClientClosed => write!(f, "client closed"),
            TeardownReason::UpstreamClosed => write!(f, "upstream closed"),
            TeardownReason::ReceiveFailed { role, error } => {
                write!(f, "receive from {} failed: {}", role, error)
            }
            TeardownReason::SendFailed { role, error } => write!(f, "send to {} failed: {}", role, error),
            TeardownReason::Shutdown => write!(f, "shutdown"),
            TeardownReason::TaskFailed(msg) => write!(f, "pump task failed: {}", msg),
        }
    }
}

/// Shared control block of one bridge: its identity and its one-shot teardown.
///
/// Held by both pumps, the supervisor, the [`BridgeHandle`] and the registry.
pub struct BridgeControl {
    info: BridgeInfo,
    closed: AtomicBool,
    reason: Mutex<Option<TeardownReason>>,
    client: SessionCloser,
    upstream: SessionCloser,
    registry: SessionRegistry,
}

impl BridgeControl {
    pub fn new(client: SessionCloser, upstream: SessionCloser, registry: SessionRegistry) -> Self {
        Self {
            info: BridgeInfo {
                bridge_id: Uuid::new_v4().to_string(),
                client_session: client.id().to_string(),
                upstream_session: upstream.id().to_string(),
                started_at: Utc::now(),
            },
            closed: AtomicBool::new(false),
            reason: Mutex::new(None),
            client,
            upstream,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.bridge_id
    }

    pub fn info(&self) -> &BridgeInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reason recorded by the teardown that ran, if any.
    pub fn reason(&self) -> Option<TeardownReason> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Close both sessions and leave the registry.
    ///
    /// ## What this does:
    /// 1. Flips the `closed` flag; every caller after the first returns `false` here
    /// 2. Logs the reason, at `error` level when [`TeardownReason::is_error`]
    /// 3. Records the reason for the [`BridgeSummary`]
    /// 4. Closes both sessions, which wakes any pump blocked on them
    /// 5. Removes the bridge from the registry
    ///
    /// ## Rust Concepts:
    /// - **AtomicBool::swap**: Reads the old value and writes the new one in a
    ///   single step, so two racing callers can never both see `false`
    /// - **&self**: Teardown only touches atomics, a `Mutex` and the registry, so it
    ///   can be called from any task holding an `Arc<BridgeControl>`
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if reason.is_error() {
            error!(
                bridge_id = %self.info.bridge_id,
                client_session = %self.info.client_session,
                upstream_session = %self.info.upstream_session,
                reason = %reason,
                "Bridge torn down after failure"
            );
        } else {
            info!(
                bridge_id = %self.info.bridge_id,
                client_session = %self.info.client_session,
                upstream_session = %self.info.upstream_session,
                reason = %reason,
                "Bridge torn down"
            );
        }

        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);

        self.client.close();
        self.upstream.close();
        self.registry.unregister(&self.info.bridge_id);
        true
    }
}

impl fmt::Debug for BridgeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeControl")
            .field("info", &self.info)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Frames and bytes moved by one pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub frames: u64,
    pub bytes: u64,
}

/// Outcome of a finished bridge.
#[derive(Debug, Clone)]
pub struct BridgeSummary {
    pub bridge_id: String,
    pub reason: TeardownReason,
    pub client_to_upstream: PumpReport,
    pub upstream_to_client: PumpReport,
    pub duration: Duration,
}

/// Starts bridges.
pub struct RelayBridge;

impl RelayBridge {
    /// Start relaying between two open sessions.
    ///
    /// ## What this does:
    /// 1. Checks both sessions are `Open`
    /// 2. Registers the bridge (refused when the registry is full)
    /// 3. Splits each session into its sending and receiving halves
    /// 4. Spawns one pump per direction plus a supervisor that joins them
    ///
    /// ## Preconditions:
    /// - Both sessions are `Open`
    /// - The registry has a free slot
    ///
    /// If either fails, both sessions are closed before the error is returned, so
    /// the caller never ends up holding a half-open pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        client: Session,
        upstream: Session,
        registry: &SessionRegistry,
    ) -> Result<BridgeHandle, BridgeSetupError> {
        for session in [&client, &upstream] {
            if !session.is_open() {
                let err = BridgeSetupError::NotOpen {
                    role: session.role(),
                    state: session.state(),
                };
                client.close();
                upstream.close();
                return Err(err);
            }
        }

        let control = Arc::new(BridgeControl::new(client.closer(), upstream.closer(), registry.clone()));
        if let Err(err) = registry.register(control.clone()) {
            warn!(bridge_id = %control.id(), error = %err, "Bridge setup refused");
            client.close();
            upstream.close();
            return Err(err);
        }

        info!(
            bridge_id = %control.id(),
            client_session = %client.id(),
            upstream_session = %upstream.id(),
            "Bridge started"
        );

        let started = Instant::now();
        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        let to_upstream = tokio::spawn(pump(client_rx, upstream_tx, Direction::ClientToUpstream, control.clone()));
        let to_client = tokio::spawn(pump(upstream_rx, client_tx, Direction::UpstreamToClient, control.clone()));
        let supervisor = tokio::spawn(supervise(control.clone(), to_upstream, to_client, started));

        Ok(BridgeHandle { control, supervisor })
    }
}

/// How a pump loop ended.
enum PumpExit {
    /// Tear the bridge down for this reason
    Teardown(TeardownReason),

    /// The sink's peer has already ended. The opposite pump reads from that peer and
    /// tears down once its buffered frames are forwarded, so this direction just stops.
    PeerEnded,
}

/// Forward frames from `source` to `sink` until either ends.
///
/// ## Stopping:
/// - **source ends or fails**: tear down with the matching reason
/// - **sink is `Closing` or `Closed`**: its peer hung up; stop this direction only and
///   leave the teardown to the pump draining that peer, so frames the peer sent
///   before hanging up still reach the other side
/// - **sink transport gone while the session is open**: tear down as a send failure
async fn pump(
    mut source: SessionReceiver,
    sink: SessionSender,
    direction: Direction,
    control: Arc<BridgeControl>,
) -> PumpReport {
    let mut report = PumpReport::default();

    let exit = loop {
        let frame = match source.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break PumpExit::Teardown(TeardownReason::for_end_of_stream(source.role())),
            Err(error) => break PumpExit::Teardown(TeardownReason::ReceiveFailed { role: source.role(), error }),
        };

        let len = frame.len() as u64;
        match sink.send(frame).await {
            Ok(()) => {
                report.frames += 1;
                report.bytes += len;
            }
            Err(SendError::NotOpen(SessionState::Closing | SessionState::Closed)) => break PumpExit::PeerEnded,
            Err(error) => break PumpExit::Teardown(TeardownReason::SendFailed { role: sink.role(), error }),
        }
    };

    debug!(
        bridge_id = %control.id(),
        direction = %direction,
        frames = report.frames,
        bytes = report.bytes,
        "Pump stopped"
    );

    match exit {
        PumpExit::Teardown(reason) => {
            control.teardown(reason);
        }
        PumpExit::PeerEnded => {
            debug!(bridge_id = %control.id(), direction = %direction, peer = %sink.role(), "Peer ended, direction stopped");
        }
    }
    report
}

async fn supervise(
    control: Arc<BridgeControl>,
    to_upstream: JoinHandle<PumpReport>,
    to_client: JoinHandle<PumpReport>,
    started: Instant,
) -> BridgeSummary {
    let (client_to_upstream, upstream_to_client) =
        tokio::join!(settle(&control, to_upstream), settle(&control, to_client));

    let summary = BridgeSummary {
        bridge_id: control.id().to_string(),
        reason: control.reason().unwrap_or(TeardownReason::Shutdown),
        client_to_upstream,
        upstream_to_client,
        duration: started.elapsed(),
    };

    info!(
        bridge_id = %summary.bridge_id,
        reason = %summary.reason,
        frames_to_upstream = summary.client_to_upstream.frames,
        frames_to_client = summary.upstream_to_client.frames,
        duration_ms = summary.duration.as_millis() as u64,
        "Bridge finished"
    );

    summary
}

/// Await one pump; a panicked pump tears the bridge down on the spot so the
/// surviving pump is not left running against a half-dead bridge.
async fn settle(control: &BridgeControl, pump: JoinHandle<PumpReport>) -> PumpReport {
    match pump.await {
        Ok(report) => report,
        Err(err) => {
            control.teardown(TeardownReason::TaskFailed(err.to_string()));
            PumpReport::default()
        }
    }
}

/// Handle to a running bridge.
///
/// Dropping the handle does not stop the bridge.
#[derive(Debug)]
pub struct BridgeHandle {
    control: Arc<BridgeControl>,
    supervisor: JoinHandle<BridgeSummary>,
}

impl BridgeHandle {
    pub fn id(&self) -> &str {
        self.control.id()
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    /// Tear the bridge down from outside. Returns `false` if it was already down.
    pub fn close(&self) -> bool {
        self.control.teardown(TeardownReason::Shutdown)
    }

    /// Wait until both pumps have stopped.
    ///
    /// ## Returns:
    /// The [`BridgeSummary`] with the teardown reason and per-direction counts. If
    /// the supervisor itself panicked, the bridge is torn down here and a summary
    /// with empty counts is returned instead.
    pub async fn wait(self) -> BridgeSummary {
        match self.supervisor.await {
            Ok(summary) => summary,
            Err(err) => {
                self.control.teardown(TeardownReason::TaskFailed(err.to_string()));
                BridgeSummary {
                    bridge_id: self.control.id().to_string(),
                    reason: self
                        .control
                        .reason()
                        .unwrap_or_else(|| TeardownReason::TaskFailed(err.to_string())),
                    client_to_upstream: PumpReport::default(),
                    upstream_to_client: PumpReport::default(),
                    duration: Duration::ZERO,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::{Frame, InboundPort, OutboundPort};
    use tokio::time::timeout;

    const LIMIT: Duration = Duration::from_secs(2);

    struct Ends {
        session: Session,
        inbound: InboundPort,
        outbound: OutboundPort,
    }

    fn open(role: SessionRole, capacity: usize) -> Ends {
        let (session, inbound, outbound) = Session::pair(role, capacity);
        inbound.mark_open();
        Ends { session, inbound, outbound }
    }

    async fn drain(outbound: &mut OutboundPort) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = timeout(LIMIT, outbound.next()).await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_client_frames_then_client_disconnect() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let mut upstream = open(SessionRole::Upstream, 8);
        let upstream_closer = upstream.session.closer();

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();
        assert_eq!(registry.count(), 1);

        for chunk in ["b1", "b2", "b3"] {
            assert!(client.inbound.deliver(Frame::Binary(chunk.as_bytes().to_vec())).await);
        }
        client.inbound.finish();

        let forwarded = drain(&mut upstream.outbound).await;
        assert_eq!(
            forwarded,
            vec![
                Frame::Binary(b"b1".to_vec()),
                Frame::Binary(b"b2".to_vec()),
                Frame::Binary(b"b3".to_vec()),
            ]
        );

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(summary.reason, TeardownReason::ClientClosed);
        assert_eq!(summary.client_to_upstream, PumpReport { frames: 3, bytes: 6 });
        assert_eq!(upstream_closer.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_client_hangup_while_results_in_flight_keeps_client_frames() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let mut upstream = open(SessionRole::Upstream, 1);

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();

        for chunk in ["b1", "b2", "b3"] {
            assert!(client.inbound.deliver(Frame::Binary(chunk.as_bytes().to_vec())).await);
        }
        client.inbound.finish();

        // A transcript arrives for a browser that already said goodbye
        upstream.inbound.deliver(Frame::Text("r1".into())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let forwarded = drain(&mut upstream.outbound).await;
        assert_eq!(
            forwarded,
            vec![
                Frame::Binary(b"b1".to_vec()),
                Frame::Binary(b"b2".to_vec()),
                Frame::Binary(b"b3".to_vec()),
            ]
        );

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(summary.reason, TeardownReason::ClientClosed);
        assert!(!summary.reason.is_error());
        assert_eq!(summary.client_to_upstream.frames, 3);
        assert_eq!(summary.upstream_to_client.frames, 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_hangup_while_audio_in_flight_keeps_results() {
        let registry = SessionRegistry::unbounded();
        let mut client = open(SessionRole::Client, 1);
        let upstream = open(SessionRole::Upstream, 8);

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();

        for result in ["r1", "r2", "r3"] {
            assert!(upstream.inbound.deliver(Frame::Text(result.into())).await);
        }
        upstream.inbound.finish();

        // The browser keeps streaming audio after the service said goodbye
        client.inbound.deliver(Frame::Binary(b"b1".to_vec())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let relayed = drain(&mut client.outbound).await;
        assert_eq!(
            relayed,
            vec![
                Frame::Text("r1".into()),
                Frame::Text("r2".into()),
                Frame::Text("r3".into()),
            ]
        );

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(summary.reason, TeardownReason::UpstreamClosed);
        assert!(!summary.reason.is_error());
        assert_eq!(summary.upstream_to_client.frames, 3);
        assert_eq!(summary.client_to_upstream.frames, 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_results_then_upstream_error() {
        let registry = SessionRegistry::unbounded();
        let mut client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);
        let client_closer = client.session.closer();

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();

        assert!(upstream.inbound.deliver(Frame::Text("r1".into())).await);
        assert!(upstream.inbound.deliver(Frame::Text("r2".into())).await);
        upstream.inbound.fail(ReceiveError::Transport("connection reset".into()));

        let relayed = drain(&mut client.outbound).await;
        assert_eq!(relayed, vec![Frame::Text("r1".into()), Frame::Text("r2".into())]);

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(
            summary.reason,
            TeardownReason::ReceiveFailed {
                role: SessionRole::Upstream,
                error: ReceiveError::Transport("connection reset".into()),
            }
        );
        assert!(summary.reason.is_error());
        assert_eq!(client_closer.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_order_preserved_under_backpressure() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 4);
        let mut upstream = open(SessionRole::Upstream, 4);

        let _handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();

        let inbound = client.inbound;
        let producer = tokio::spawn(async move {
            for i in 0..100u32 {
                assert!(inbound.deliver(Frame::Binary(i.to_be_bytes().to_vec())).await);
            }
            inbound.finish();
        });

        let forwarded = drain(&mut upstream.outbound).await;
        producer.await.unwrap();

        let expected: Vec<Frame> = (0..100u32).map(|i| Frame::Binary(i.to_be_bytes().to_vec())).collect();
        assert_eq!(forwarded, expected);
    }

    #[tokio::test]
    async fn test_text_and_binary_kept_apart() {
        let registry = SessionRegistry::unbounded();
        let mut client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();

        assert!(upstream.inbound.deliver(Frame::Text("{\"text\":\"hi\"}".into())).await);
        assert!(upstream.inbound.deliver(Frame::Binary(vec![0, 159, 146, 150])).await);
        assert_eq!(
            timeout(LIMIT, client.outbound.next()).await.unwrap(),
            Some(Frame::Text("{\"text\":\"hi\"}".into()))
        );
        assert_eq!(
            timeout(LIMIT, client.outbound.next()).await.unwrap(),
            Some(Frame::Binary(vec![0, 159, 146, 150]))
        );

        handle.close();
    }

    #[tokio::test]
    async fn test_concurrent_close_has_single_effect() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);
        let handle = Arc::new(RelayBridge::start(client.session, upstream.session, &registry).unwrap());
        assert_eq!(registry.count(), 1);

        let mut closers = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            closers.push(tokio::spawn(async move { handle.close() }));
        }
        let mut performed = 0;
        for closer in closers {
            if closer.await.unwrap() {
                performed += 1;
            }
        }

        assert_eq!(performed, 1);
        assert!(handle.is_closed());
        assert_eq!(registry.count(), 0);
        assert!(!handle.close());
    }

    #[tokio::test]
    async fn test_external_close_stops_both_pumps() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);
        let client_closer = client.session.closer();
        let upstream_closer = upstream.session.closer();

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();
        assert!(handle.close());

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(summary.reason, TeardownReason::Shutdown);
        assert_eq!(client_closer.state(), SessionState::Closed);
        assert_eq!(upstream_closer.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_upstream_transport_drop_closes_client() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);
        let client_closer = client.session.closer();

        let handle = RelayBridge::start(client.session, upstream.session, &registry).unwrap();
        drop(upstream.inbound);
        drop(upstream.outbound);

        let summary = timeout(LIMIT, handle.wait()).await.unwrap();
        assert_eq!(summary.reason, TeardownReason::UpstreamClosed);
        assert_eq!(client_closer.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_start_requires_open_sessions() {
        let registry = SessionRegistry::unbounded();
        let client = open(SessionRole::Client, 8);
        let (upstream, _upstream_in, _upstream_out) = Session::pair(SessionRole::Upstream, 8);
        let client_closer = client.session.closer();
        let upstream_closer = upstream.closer();

        let result = RelayBridge::start(client.session, upstream, &registry);
        assert_eq!(
            result.unwrap_err(),
            BridgeSetupError::NotOpen {
                role: SessionRole::Upstream,
                state: SessionState::Connecting,
            }
        );
        assert_eq!(client_closer.state(), SessionState::Closed);
        assert_eq!(upstream_closer.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_start_refused_at_capacity() {
        let registry = SessionRegistry::with_capacity(1);
        let first_client = open(SessionRole::Client, 8);
        let first_upstream = open(SessionRole::Upstream, 8);
        let _first = RelayBridge::start(first_client.session, first_upstream.session, &registry).unwrap();

        let client = open(SessionRole::Client, 8);
        let upstream = open(SessionRole::Upstream, 8);
        let client_closer = client.session.closer();

        let result = RelayBridge::start(client.session, upstream.session, &registry);
        assert_eq!(result.unwrap_err(), BridgeSetupError::AtCapacity { max: 1 });
        assert_eq!(client_closer.state(), SessionState::Closed);
        assert_eq!(registry.count(), 1);
    }
}
