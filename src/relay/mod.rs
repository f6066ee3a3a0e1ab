//! # Relay Module
//!
//! Bidirectional streaming relay between browser WebSocket clients and the realtime
//! transcription service.
//!
//! ## Key Components:
//! - **Session**: One end of a frame stream with a Connecting/Open/Closing/Closed lifecycle
//! - **Upstream Session**: tokio-tungstenite client connection to the transcription API
//! - **Relay Bridge**: Two pump tasks coupling a client and an upstream session
//! - **Session Registry**: Active bridges, capacity limit and bulk shutdown
//! - **Relay Service**: Accepts client sessions, dials upstream, starts bridges
//!
//! ## Frame Handling:
//! Frames are relayed unaltered. Text stays text and binary stays binary; the
//! transcription protocol's message schema is never inspected.

pub mod bridge;      // Pump tasks and one-shot teardown
pub mod registry;    // Active bridge tracking
pub mod service;     // Connection acceptance
pub mod session;     // Session lifecycle and transport ports
pub mod upstream;    // Upstream dialer

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{BridgeHandle, BridgeSummary, RelayBridge, TeardownReason};
pub use registry::{BridgeInfo, SessionRegistry};
pub use service::RelayService;
pub use session::{Frame, Session, SessionRole, SessionState};
pub use upstream::{UpstreamSession, UpstreamTarget};
