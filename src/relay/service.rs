//! # Relay Service
//!
//! Connection acceptance: for each client session, dial the transcription service
//! and start a bridge between the two.
//!
//! ## Failure handling:
//! A failed dial is reported to the browser as a JSON notice, then the client
//! session is closed. No bridge is registered and the server keeps running.

use crate::error::{ConnectionError, RelayError};
use crate::relay::bridge::{BridgeHandle, BridgeSummary, RelayBridge};
use crate::relay::registry::SessionRegistry;
use crate::relay::session::{Frame, Session};
use crate::relay::upstream::{UpstreamSession, UpstreamTarget};
use serde::Serialize;
use tracing::{error, info, warn};

/// Control message sent to the browser by the relay itself.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientNotice {
    Error { code: &'static str, message: String },
}

impl ClientNotice {
    fn upstream_unavailable(err: &ConnectionError) -> Self {
        ClientNotice::Error {
            code: "upstream_unavailable",
            message: err.to_string(),
        }
    }
}

/// Accepts client sessions and bridges them upstream.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Debug, Clone)]
pub struct RelayService {
    target: UpstreamTarget,
    registry: SessionRegistry,
}

impl RelayService {
    pub fn new(target: UpstreamTarget, registry: SessionRegistry) -> Self {
        Self { target, registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Dial upstream for `client` and start relaying.
    ///
    /// ## What this does:
    /// 1. Opens an upstream session with the configured target
    /// 2. On failure, sends the browser an `upstream_unavailable` notice and closes it
    /// 3. On success, starts a [`RelayBridge`] between the two sessions
    ///
    /// ## Returns:
    /// - **Ok(handle)**: The bridge is running and registered
    /// - **Err(Connection)**: The dial failed; the client got an error notice and is closed
    /// - **Err(Setup)**: The bridge could not start; both sessions are closed
    pub async fn accept(&self, client: Session) -> Result<BridgeHandle, RelayError> {
        let upstream = match UpstreamSession::connect(&self.target).await {
            Ok(upstream) => upstream,
            Err(err) => {
                error!(client_session = %client.id(), error = %err, "Upstream connection failed");
                notify(&client, &ClientNotice::upstream_unavailable(&err)).await;
                client.close();
                return Err(err.into());
            }
        };

        let handle = RelayBridge::start(client, upstream, &self.registry)?;
        Ok(handle)
    }

    /// Accept `client` and wait until its bridge finishes.
    pub async fn serve(&self, client: Session) -> Result<BridgeSummary, RelayError> {
        let handle = self.accept(client).await?;
        let summary = handle.wait().await;
        info!(bridge_id = %summary.bridge_id, reason = %summary.reason, "Client served");
        Ok(summary)
    }
}

async fn notify(client: &Session, notice: &ClientNotice) {
    let text = match serde_json::to_string(notice) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "Failed to encode client notice");
            return;
        }
    };

    if let Err(err) = client.send(Frame::Text(text)).await {
        warn!(client_session = %client.id(), error = %err, "Could not deliver notice to client");
    }
}
