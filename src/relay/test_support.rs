//! Local stand-in for the transcription service, used by the relay tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub(crate) fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{}/v2/realtime/ws", addr)
}

/// Start a WebSocket server on an ephemeral port.
///
/// Handshakes whose `Authorization` header differs from `expected_key` are
/// answered with HTTP 401. Accepted connections are handed to `script`.
pub(crate) async fn spawn_upstream<F, Fut>(expected_key: &str, script: F) -> String
where
    F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let expected_key = expected_key.to_string();
    let script = Arc::new(script);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let expected_key = expected_key.clone();
            let script = script.clone();

            tokio::spawn(async move {
                let check = move |request: &Request, response: Response| {
                    let presented = request.headers().get(AUTHORIZATION).and_then(|value| value.to_str().ok());
                    if presented == Some(expected_key.as_str()) {
                        Ok(response)
                    } else {
                        let mut rejection = ErrorResponse::new(Some("invalid credential".to_string()));
                        *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                        Err(rejection)
                    }
                };

                if let Ok(socket) = accept_hdr_async(stream, check).await {
                    script(socket).await;
                }
            });
        }
    });

    ws_url(addr)
}
