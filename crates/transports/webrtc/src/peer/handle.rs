//! Negotiation capability boundary
//!
//! The coordinator never talks to a peer connection directly. It drives a
//! [`NegotiationHandle`] created by a [`NegotiationEngine`], and receives the
//! handle's asynchronous happenings as [`HandleEvent`]s on a per-connection
//! channel.

use crate::config::IceConfig;
use crate::media::{PublishedTrack, RelaySubscription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Transport-level connectivity reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous happening on one negotiation handle
#[derive(Debug)]
pub enum HandleEvent {
    /// Locally gathered candidate to send to the client
    IceCandidate(IceCandidate),
    /// Inbound audio from the client, ready to be relayed
    Track(PublishedTrack),
    /// Connectivity change
    Transport(TransportState),
}

/// One client's media/transport session
#[async_trait]
pub trait NegotiationHandle: Send + Sync {
    /// Apply a client offer as the remote description
    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Produce and apply the local answer to the current remote offer
    async fn create_answer(&self) -> Result<String>;

    /// Produce and apply a local offer for server-initiated renegotiation
    async fn create_offer(&self) -> Result<String>;

    /// Apply a client answer to the outstanding local offer
    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Start sending a relayed copy of another connection's audio
    async fn attach_relay(&self, subscription: RelaySubscription) -> Result<()>;

    /// Release the handle
    ///
    /// Safe to call more than once and concurrently with other calls.
    async fn close(&self) -> Result<()>;
}

/// Factory for negotiation handles
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Create the handle for `connection_id`
    ///
    /// `events` receives the handle's ICE candidates, inbound tracks and
    /// transport changes. Background work spawned for the handle must stop
    /// once `cancel` fires.
    async fn create_handle(
        &self,
        connection_id: &str,
        ice: &IceConfig,
        events: mpsc::Sender<HandleEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn NegotiationHandle>>;
}

/// Queue `event` for the connection's event pump
///
/// Waits for room in the queue, but gives up once `cancel` fires: the pump
/// may itself be awaiting the close that produced the event. Returns whether
/// the event was queued.
pub async fn send_event(
    events: &mpsc::Sender<HandleEvent>,
    cancel: &CancellationToken,
    event: HandleEvent,
) -> bool {
    if cancel.is_cancelled() {
        return events.try_send(event).is_ok();
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Connection closing, dropping handle event");
            false
        }
        sent = events.send(event) => sent.is_ok(),
    }
}
