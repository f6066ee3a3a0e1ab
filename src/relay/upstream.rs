//! # Upstream Session
//!
//! Dials the realtime transcription service with tokio-tungstenite and exposes the
//! connection as a [`Session`]. Two background tasks drive the socket:
//!
//! - **reader**: socket → `InboundPort::deliver`
//! - **writer**: `OutboundPort::next` → socket, then a close handshake once the
//!   session is closed and every queued frame is written

use crate::config::{usable_credential, AppConfig};
use crate::error::{ConnectionError, ReceiveError};
use crate::relay::session::{Frame, InboundPort, OutboundPort, Session, SessionRole};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and how to dial the transcription service.
#[derive(Clone)]
pub struct UpstreamTarget {
    /// Full ws:// or wss:// URL, query parameters included
    pub endpoint: String,

    /// Value of the `Authorization` header; never blank
    pub credential: Option<String>,

    pub connect_timeout: Duration,

    /// Frames buffered per direction
    pub channel_capacity: usize,
}

impl UpstreamTarget {
    /// Target with the default timeout and channel capacity.
    ///
    /// A blank credential is stored as `None`, so dialing fails with
    /// `MissingCredential` before any network traffic.
    pub fn new(endpoint: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: usable_credential(credential.as_deref()).map(str::to_string),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 32,
        }
    }

    /// Target described by the `upstream` and `relay` config sections.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.upstream.endpoint(), config.upstream.api_key.clone())
            .with_connect_timeout(config.upstream.connect_timeout())
            .with_channel_capacity(config.relay.channel_capacity)
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }
}

impl fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTarget")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// Dialer for upstream sessions.
pub struct UpstreamSession;

impl UpstreamSession {
    /// Open a session to the transcription service.
    ///
    /// ## Process:
    /// 1. Check the credential and build the handshake request
    /// 2. Dial with `connect_timeout`
    /// 3. Mark the session open and spawn the reader and writer tasks
    ///
    /// On any failure the session never reaches `Open` and nothing keeps running.
    ///
    /// ## Error mapping:
    /// - **MissingCredential / InvalidCredential**: Checked before any network traffic
    /// - **Rejected { status }**: The server answered the upgrade with a non-101 status
    /// - **Timeout**: `connect_timeout` elapsed before the handshake finished
    /// - **Transport**: DNS, TCP, TLS or protocol failure while dialing
    ///
    /// ## Rust Concepts:
    /// - **tokio::time::timeout**: Wraps the whole dial, so a server that accepts
    ///   TCP but never answers cannot hold the caller forever
    /// - **StreamExt::split**: Turns the socket into independent read and write
    ///   halves that can live in separate tasks
    pub async fn connect(target: &UpstreamTarget) -> Result<Session, ConnectionError> {
        let credential = target
            .credential
            .as_deref()
            .ok_or(ConnectionError::MissingCredential)?;

        let mut request = target
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| ConnectionError::InvalidEndpoint(err.to_string()))?;
        let header = HeaderValue::from_str(credential).map_err(|_| ConnectionError::InvalidCredential)?;
        request.headers_mut().insert(AUTHORIZATION, header);

        // wss needs a process-wide rustls provider; a second install is a no-op.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let (session, inbound, outbound) = Session::pair(SessionRole::Upstream, target.channel_capacity);
        debug!(session_id = %session.id(), endpoint = %target.endpoint, "Dialing upstream");

        let socket = match timeout(target.connect_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(err)) => {
                session.close();
                return Err(classify(err));
            }
            Err(_) => {
                session.close();
                return Err(ConnectionError::Timeout(target.connect_timeout));
            }
        };

        inbound.mark_open();
        info!(session_id = %session.id(), "Upstream session open");

        let (sink, stream) = socket.split();
        tokio::spawn(read_upstream(stream, inbound));
        tokio::spawn(write_upstream(sink, outbound));

        Ok(session)
    }
}

fn classify(err: WsError) -> ConnectionError {
    match err {
        WsError::Http(response) => ConnectionError::Rejected {
            status: response.status().as_u16(),
        },
        WsError::Url(err) => ConnectionError::InvalidEndpoint(err.to_string()),
        other => ConnectionError::Transport(other.to_string()),
    }
}

async fn read_upstream(mut stream: SplitStream<UpstreamSocket>, inbound: InboundPort) {
    loop {
        let message = tokio::select! {
            biased;
            _ = inbound.closed() => return,
            message = stream.next() => message,
        };

        let frame = match message {
            Some(Ok(Message::Text(text))) => Frame::Text(text),
            Some(Ok(Message::Binary(data))) => Frame::Binary(data),
            Some(Ok(Message::Close(reason))) => {
                debug!(session_id = %inbound.session_id(), ?reason, "Upstream sent close");
                inbound.finish();
                return;
            }
            // Pings are answered by tungstenite itself
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(session_id = %inbound.session_id(), error = %err, "Upstream read failed");
                inbound.fail(ReceiveError::Transport(err.to_string()));
                return;
            }
            None => {
                inbound.fail(ReceiveError::Disconnected);
                return;
            }
        };

        if !inbound.deliver(frame).await {
            return;
        }
    }
}

async fn write_upstream(mut sink: SplitSink<UpstreamSocket, Message>, mut outbound: OutboundPort) {
    while let Some(frame) = outbound.next().await {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };

        if let Err(err) = sink.send(message).await {
            warn!(session_id = %outbound.session_id(), error = %err, "Upstream write failed");
            outbound.fail(ReceiveError::Transport(err.to_string()));
            return;
        }
    }

    if let Err(err) = sink.close().await {
        debug!(session_id = %outbound.session_id(), error = %err, "Upstream close handshake incomplete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::SessionState;
    use crate::relay::test_support::{spawn_upstream, ws_url};
    use tokio::net::TcpListener;

    const KEY: &str = "test-key";
    const LIMIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_missing_credential() {
        let target = UpstreamTarget::new("ws://127.0.0.1:1/ws", None);
        assert_eq!(
            UpstreamSession::connect(&target).await.unwrap_err(),
            ConnectionError::MissingCredential
        );

        let blank = UpstreamTarget::new("ws://127.0.0.1:1/ws", Some("  ".to_string()));
        assert_eq!(
            UpstreamSession::connect(&blank).await.unwrap_err(),
            ConnectionError::MissingCredential
        );
    }

    #[tokio::test]
    async fn test_credential_with_newline_is_invalid() {
        let target = UpstreamTarget::new("ws://127.0.0.1:1/ws", Some("abc\ndef".to_string()));
        assert_eq!(
            UpstreamSession::connect(&target).await.unwrap_err(),
            ConnectionError::InvalidCredential
        );
    }

    #[tokio::test]
    async fn test_wrong_credential_is_rejected() {
        let endpoint = spawn_upstream(KEY, |_socket| async {}).await;
        let target = UpstreamTarget::new(endpoint, Some("wrong-key".to_string()));

        let err = UpstreamSession::connect(&target).await.unwrap_err();
        assert_eq!(err, ConnectionError::Rejected { status: 401 });
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = UpstreamTarget::new(ws_url(addr), Some(KEY.to_string()));
        let err = UpstreamSession::connect(&target).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts TCP but never answers the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let target = UpstreamTarget::new(ws_url(addr), Some(KEY.to_string()))
            .with_connect_timeout(Duration::from_millis(100));
        let err = UpstreamSession::connect(&target).await.unwrap_err();
        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_frames_round_trip_through_echo_server() {
        let endpoint = spawn_upstream(KEY, |mut socket| async move {
            while let Some(Ok(message)) = socket.next().await {
                if message.is_text() || message.is_binary() {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            }
        })
        .await;

        let target = UpstreamTarget::new(endpoint, Some(KEY.to_string()));
        let mut session = UpstreamSession::connect(&target).await.unwrap();
        assert_eq!(session.state(), SessionState::Open);

        session.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();
        session.send(Frame::Text("hello".into())).await.unwrap();

        let first = timeout(LIMIT, session.receive()).await.unwrap().unwrap();
        let second = timeout(LIMIT, session.receive()).await.unwrap().unwrap();
        assert_eq!(first, Some(Frame::Binary(vec![1, 2, 3])));
        assert_eq!(second, Some(Frame::Text("hello".into())));

        assert!(session.close());
    }

    #[tokio::test]
    async fn test_results_then_abrupt_drop() {
        let endpoint = spawn_upstream(KEY, |mut socket| async move {
            let _ = socket.send(Message::Text("r1".into())).await;
            let _ = socket.send(Message::Text("r2".into())).await;
            // Dropping the socket without a close frame
        })
        .await;

        let target = UpstreamTarget::new(endpoint, Some(KEY.to_string()));
        let mut session = UpstreamSession::connect(&target).await.unwrap();

        assert_eq!(
            timeout(LIMIT, session.receive()).await.unwrap(),
            Ok(Some(Frame::Text("r1".into())))
        );
        assert_eq!(
            timeout(LIMIT, session.receive()).await.unwrap(),
            Ok(Some(Frame::Text("r2".into())))
        );
        assert!(timeout(LIMIT, session.receive()).await.unwrap().is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_clean_close_from_server() {
        let endpoint = spawn_upstream(KEY, |mut socket| async move {
            let _ = socket.send(Message::Text("final".into())).await;
            let _ = socket.close(None).await;
        })
        .await;

        let target = UpstreamTarget::new(endpoint, Some(KEY.to_string()));
        let mut session = UpstreamSession::connect(&target).await.unwrap();

        assert_eq!(
            timeout(LIMIT, session.receive()).await.unwrap(),
            Ok(Some(Frame::Text("final".into())))
        );
        assert_eq!(timeout(LIMIT, session.receive()).await.unwrap(), Ok(None));
    }

    #[test]
    fn test_target_from_config() {
        let mut config = AppConfig::default();
        config.upstream.api_key = Some("  key-with-padding \n".to_string());
        config.upstream.connect_timeout_ms = 250;
        config.relay.channel_capacity = 7;

        let target = UpstreamTarget::from_config(&config);
        assert_eq!(target.endpoint, config.upstream.endpoint());
        assert_eq!(target.credential.as_deref(), Some("key-with-padding"));
        assert_eq!(target.connect_timeout, Duration::from_millis(250));
        assert_eq!(target.channel_capacity, 7);

        config.upstream.api_key = Some("   ".to_string());
        assert_eq!(UpstreamTarget::from_config(&config).credential, None);
    }

    #[test]
    fn test_debug_redacts_credential() {
        let target = UpstreamTarget::new("ws://localhost/ws", Some("super-secret".to_string()));
        let debug = format!("{:?}", target);
        assert!(!debug.contains("super-secret"));
    }
}
