//! Per-connection negotiation
//!
//! Holds the negotiation capability traits, their WebRTC implementation, the
//! negotiation state machine and the connection registry.

pub mod connection;
pub mod handle;
pub mod manager;
pub mod state;

pub use connection::{RtcEngine, RtcHandle};
pub use handle::{
    send_event, HandleEvent, IceCandidate, NegotiationEngine, NegotiationHandle, TransportState,
};
pub use manager::{Connection, ConnectionInfo, ConnectionRegistry, PendingOps};
pub use state::NegotiationState;
