//! # Client WebSocket Handler
//!
//! Browsers connect to `/ws`. Each connection becomes a client [`Session`] driven by
//! an actix actor, and a background task bridges it to the transcription service.
//!
//! ## Connection Flow:
//! 1. **Capacity check**: 503 if the registry is full, before upgrading
//! 2. **Upgrade**: The actor is started and the client session marked Open
//! 3. **Relay**: `RelayService::serve` dials upstream and runs the bridge
//! 4. **Teardown**: When the bridge closes the session, the actor writes out the
//!    frames still queued, sends a close frame and stops
//!
//! ## Message Format:
//! Frames are relayed unaltered in both directions. Text stays text, binary
//! stays binary. The only message the relay itself emits is an error notice:
//! `{"type":"error","code":"upstream_unavailable","message":"..."}`

use crate::config::RelayConfig;
use crate::error::{AppError, AppResult, ReceiveError, RelayError};
use crate::relay::session::{Frame, InboundPort, OutboundPort, Session, SessionRole};
use crate::relay::SessionRegistry;
use crate::state::{connection_failure_kind, AppState};

use actix::prelude::*;
use actix_web::dev::ServerHandle;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// WebSocket actor for one browser connection.
///
/// ## Actor Model:
/// The actor owns the transport side of the client session. Frames read from the
/// browser go into the [`InboundPort`]; frames the bridge wants written arrive as
/// a stream built from the [`OutboundPort`].
pub struct ClientSocket {
    /// Id of the client session this actor drives
    session_id: String,

    /// Transport read side; taken when the browser closes or the connection fails
    inbound: Option<InboundPort>,

    /// Transport write side; moved into the actor context on start
    outbound: Option<OutboundPort>,

    /// Last ping or pong seen from the browser
    last_heartbeat: Instant,

    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl ClientSocket {
    pub fn new(inbound: InboundPort, outbound: OutboundPort, relay: &RelayConfig) -> Self {
        Self {
            session_id: inbound.session_id().to_string(),
            inbound: Some(inbound),
            outbound: Some(outbound),
            last_heartbeat: Instant::now(),
            heartbeat_interval: relay.heartbeat_interval(),
            client_timeout: relay.client_timeout(),
        }
    }

    /// Hand a browser frame to the session.
    ///
    /// `ctx.wait` pauses the actor until the frame is accepted, so a full channel
    /// pushes back on the browser's socket instead of buffering without bound.
    fn forward(&mut self, frame: Frame, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(inbound) = self.inbound.clone() else {
            return;
        };

        let fut = async move { inbound.deliver(frame).await };
        ctx.wait(fut.into_actor(self).map(|delivered, act, ctx| {
            if !delivered {
                debug!(session_id = %act.session_id, "Client session closed, dropping frame");
                ctx.stop();
            }
        }));
    }

    /// The connection broke; report it to the session once.
    fn fail(&mut self, error: ReceiveError) {
        if let Some(inbound) = self.inbound.take() {
            inbound.fail(error);
        }
    }
}

impl Actor for ClientSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Client WebSocket connected");

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(outbound.into_stream());
        }

        // Start heartbeat timer
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "Client heartbeat timeout, closing connection");
                act.fail(ReceiveError::HeartbeatTimeout);
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Still holding the read side means the browser never said goodbye
        self.fail(ReceiveError::Disconnected);
        info!(session_id = %self.session_id, "Client WebSocket stopped");
    }
}

/// Frames from the browser.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.forward(Frame::Text(text.to_string()), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.forward(Frame::Binary(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "Client closed WebSocket");
                if let Some(inbound) = self.inbound.take() {
                    inbound.finish();
                }
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                // Fragmented messages are reassembled by the codec up to max_frame_bytes
                warn!(session_id = %self.session_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                self.fail(ReceiveError::Protocol(err.to_string()));
                ctx.stop();
            }
        }
    }
}

/// Frames from the bridge, to be written to the browser.
impl StreamHandler<Frame> for ClientSocket {
    fn handle(&mut self, frame: Frame, ctx: &mut Self::Context) {
        match frame {
            Frame::Text(text) => ctx.text(text),
            Frame::Binary(data) => ctx.binary(data),
        }
    }

    /// The session is closed and every queued frame has been written.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, "Client session released, closing WebSocket");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Refuses with 503 when the relay is at capacity. Otherwise the request is
/// upgraded, and the relay runs in a spawned task whose outcome feeds the metrics.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let peer = req.connection_info().peer_addr().map(str::to_string);
    let registry = state.registry();

    if !registry.has_capacity() {
        state.record_refused_connection();
        warn!(peer = ?peer, active = registry.count(), "Relay at capacity, refusing WebSocket");
        return Err(AppError::Unavailable(format!(
            "relay is at capacity ({} active bridges)",
            registry.count()
        )));
    }

    let relay_config = &state.config.relay;
    let (session, inbound, outbound) = Session::pair(SessionRole::Client, relay_config.channel_capacity);
    let opener = inbound.clone();
    let actor = ClientSocket::new(inbound, outbound, relay_config);

    let response = ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(relay_config.max_frame_bytes)
        .start()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    opener.mark_open();
    info!(peer = ?peer, session_id = %session.id(), "WebSocket upgraded");

    let service = state.relay.clone();
    let state = state.clone();
    tokio::spawn(async move {
        let outcome = service.serve(session).await;
        match &outcome {
            Ok(_) => {}
            Err(RelayError::Connection(err)) => {
                warn!(kind = connection_failure_kind(err), error = %err, "Client turned away, upstream unavailable");
            }
            Err(RelayError::Setup(err)) => {
                warn!(error = %err, "Client turned away, bridge setup failed");
            }
        }
        state.record_relay_outcome(&outcome);
    });

    Ok(response)
}

/// Stop the server without sitting out its graceful timeout on live WebSockets.
///
/// A relayed connection only ends when its bridge is torn down, so a plain graceful
/// stop would wait for every browser until the workers are killed.
///
/// ## Order:
/// 1. **Pause**: Stop accepting connections, so no bridge starts behind our back
/// 2. **Close bridges**: Each client actor writes out the frames still queued,
///    sends a close frame and stops; each upstream socket gets a close handshake
/// 3. **Stop**: Graceful stop, which now only waits for plain HTTP requests
///
/// Returns the number of bridges that were still active.
pub async fn shutdown(server: &ServerHandle, registry: &SessionRegistry) -> usize {
    server.pause().await;
    let closed = registry.close_all();
    info!(closed, "Active bridges closed, stopping server");
    server.stop(true).await;
    closed
}
