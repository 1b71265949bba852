//! Live audio sessions for AudioLMS
//!
//! One teacher connection publishes an audio track into a named session; any
//! number of student connections join the session and receive a relayed copy
//! of that track. This crate coordinates the signaling for all of them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Browsers (teacher / students)                         │
//! │  ↓ JSON over WebSocket                                 │
//! │  WebSocketSignalingServer                              │
//! │  └─ SignalingDispatcher (offer / answer / ICE / join)  │
//! │     ├─ ConnectionRegistry (one handle per connection)  │
//! │     │   └─ NegotiationHandle (RtcEngine: webrtc-rs)    │
//! │     ├─ SessionRegistry (session id → publisher)        │
//! │     └─ RelayCoordinator (PublishedTrack fan-out)       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use audiolms_webrtc::LiveConfig;
//!
//! let config = LiveConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ice.stun_servers.len(), 5);
//! ```
//!
//! ## Running the server
//!
//! ```no_run
//! use audiolms_webrtc::{LiveConfig, RtcEngine, SignalingDispatcher, WebSocketSignalingServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LiveConfig::default();
//! let engine = Arc::new(RtcEngine::new(config.relay_buffer)?);
//! let dispatcher = SignalingDispatcher::new(config, engine);
//!
//! let server = WebSocketSignalingServer::new("0.0.0.0:8080".parse()?, dispatcher);
//! let handle = server.start().await?;
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use auth::{Action, AuthorizationPolicy, Role, RolePolicy};
pub use config::{IceConfig, LiveConfig, TurnServerConfig, DEFAULT_STUN_SERVERS};
pub use error::{Error, Result};
pub use media::{PublishedTrack, RelaySubscription};
pub use peer::{
    ConnectionRegistry, HandleEvent, IceCandidate, NegotiationEngine, NegotiationHandle,
    NegotiationState, RtcEngine, TransportState,
};
pub use session::{Activation, JoinOutcome, MediaAttachment, RelayCoordinator, SessionRegistry};
pub use signaling::{
    ClientMessage, ServerMessage, SignalingDispatcher, WebSocketServerHandle,
    WebSocketSignalingServer,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
