//! # Error Handling
//!
//! This module defines every error type used by the relay, plus how the HTTP-facing
//! ones are converted to responses.
//!
//! ## Error Families:
//! - **AppError**: Problems surfaced to HTTP callers (health, metrics, upgrade route)
//! - **ConnectionError**: Dialing or handshaking a session failed - the session never opens
//! - **SendError / ReceiveError**: A live session failed mid-stream - terminal for its bridge
//! - **BridgeSetupError**: A bridge could not be started (precondition violated)
//! - **RelayError**: Everything that can go wrong while accepting one client connection
//!
//! ## Propagation:
//! Mid-stream errors stay local to one bridge. They are logged by the bridge teardown
//! and never bubble up to the server loop, so one broken connection cannot take the
//! process down.

use crate::relay::session::{SessionRole, SessionState};
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait
use std::time::Duration;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **BadRequest**: Client sent an invalid upgrade request (400 errors)
/// - **Unavailable**: The relay is at capacity (503 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Unavailable("relay is at capacity".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Client sent an invalid or malformed request
    BadRequest(String),

    /// The service cannot take more work right now
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts AppError into an HTTP response.
///
/// ## HTTP Status Code Mapping:
/// - BadRequest → 400 (Bad Request)
/// - Unavailable → 503 (Service Unavailable)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unavailable",
///     "message": "relay is at capacity (64 active bridges)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::BadRequest(_) => actix_web::http::StatusCode::BAD_REQUEST,          // 400
            AppError::Unavailable(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE, // 503
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Failure to establish a session.
///
/// ## When this happens:
/// Only before a session reaches `Open`. A session that fails with one of these
/// goes straight from `Connecting` to `Closed` and is never handed to a bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// No credential was configured for the upstream service
    MissingCredential,

    /// The credential cannot be sent as an HTTP header value
    InvalidCredential,

    /// The target is not a usable ws:// or wss:// URL
    InvalidEndpoint(String),

    /// The remote answered the handshake with a non-101 HTTP status
    Rejected { status: u16 },

    /// The handshake did not complete in time
    Timeout(Duration),

    /// Network or protocol failure while dialing
    Transport(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::MissingCredential => write!(f, "upstream credential is not configured"),
            ConnectionError::InvalidCredential => write!(f, "upstream credential is not a valid header value"),
            ConnectionError::InvalidEndpoint(msg) => write!(f, "invalid upstream endpoint: {}", msg),
            ConnectionError::Rejected { status } => {
                write!(f, "upstream rejected the handshake with HTTP {}", status)
            }
            ConnectionError::Timeout(after) => {
                write!(f, "upstream handshake timed out after {}ms", after.as_millis())
            }
            ConnectionError::Transport(msg) => write!(f, "upstream connection failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Failure to hand a frame to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    /// The session is not accepting frames in its current state
    NotOpen(SessionState),

    /// The transport behind the session has gone away
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NotOpen(state) => write!(f, "session is {}, not open", state),
            SendError::Disconnected => write!(f, "session transport disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

/// Failure reported by a session's transport while receiving.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveError {
    /// Network failure on the underlying connection
    Transport(String),

    /// The peer violated the WebSocket protocol
    Protocol(String),

    /// The peer stopped answering heartbeats
    HeartbeatTimeout,

    /// The connection dropped without a close handshake
    Disconnected,
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::Transport(msg) => write!(f, "transport error: {}", msg),
            ReceiveError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ReceiveError::HeartbeatTimeout => write!(f, "heartbeat timed out"),
            ReceiveError::Disconnected => write!(f, "connection dropped without close handshake"),
        }
    }
}

impl std::error::Error for ReceiveError {}

/// A bridge could not be started.
///
/// ## Resource guarantee:
/// Whenever `RelayBridge::start` returns one of these, both sessions it was given
/// have already been closed and nothing was registered.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeSetupError {
    /// One of the sessions was not open
    NotOpen { role: SessionRole, state: SessionState },

    /// The registry already holds the maximum number of bridges
    AtCapacity { max: usize },

    /// A bridge with the same id is already registered
    DuplicateBridge(String),
}

impl fmt::Display for BridgeSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeSetupError::NotOpen { role, state } => {
                write!(f, "{} session is {}, expected open", role, state)
            }
            BridgeSetupError::AtCapacity { max } => {
                write!(f, "relay is at capacity ({} active bridges)", max)
            }
            BridgeSetupError::DuplicateBridge(id) => write!(f, "bridge {} is already registered", id),
        }
    }
}

impl std::error::Error for BridgeSetupError {}

/// Everything that can fail while accepting one client connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    Connection(ConnectionError),
    Setup(BridgeSetupError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Connection(err) => write!(f, "{}", err),
            RelayError::Setup(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Connection(err) => Some(err),
            RelayError::Setup(err) => Some(err),
        }
    }
}

impl From<ConnectionError> for RelayError {
    fn from(err: ConnectionError) -> Self {
        RelayError::Connection(err)
    }
}

impl From<BridgeSetupError> for RelayError {
    fn from(err: BridgeSetupError) -> Self {
        RelayError::Setup(err)
    }
}

/// Type alias for Results that use our HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unavailable("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unavailable_response_body() {
        let err = AppError::Unavailable(BridgeSetupError::AtCapacity { max: 4 }.to_string());
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("4 active bridges"));
    }

    #[test]
    fn test_relay_error_keeps_source() {
        use std::error::Error;

        let err = RelayError::from(ConnectionError::Rejected { status: 401 });
        assert_eq!(err.to_string(), "upstream rejected the handshake with HTTP 401");
        assert!(err.source().is_some());
    }
}
