//! In-memory negotiation engine for tests
//!
//! Stands in for the WebRTC stack. Every handle records what the coordinator
//! asked of it, drains attached relays into a packet log, and tests push
//! [`HandleEvent`]s into a connection as if the transport had produced them.
//!
//! Available to unit tests and, with the `test-utils` feature, to
//! integration tests.

use crate::config::IceConfig;
use crate::media::{PublishedTrack, RelaySubscription};
use crate::peer::{
    send_event, HandleEvent, IceCandidate, NegotiationEngine, NegotiationHandle, TransportState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

pub const OFFER_SDP: &str =
    "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Opus track published by `publisher_id`
pub fn opus_track(publisher_id: &str) -> PublishedTrack {
    PublishedTrack::new(
        publisher_id,
        format!("mic-{}", publisher_id),
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        64,
    )
}

pub fn rtp(seq: u16) -> Packet {
    let mut packet = Packet::default();
    packet.header.sequence_number = seq;
    packet.header.payload_type = 111;
    packet
}

/// Handle that records calls and drains attached relays into a packet log
pub struct FakeHandle {
    pub connection_id: String,
    pub remote_offers: Mutex<Vec<String>>,
    pub remote_answers: Mutex<Vec<String>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub ice: IceConfig,
    received: Arc<Mutex<Vec<(String, u16)>>>,
    relays: Mutex<Vec<JoinHandle<()>>>,
    offers_created: AtomicUsize,
    close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
    events: mpsc::Sender<HandleEvent>,
    cancel: CancellationToken,
}

/// Marks one negotiation call in progress
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeHandle {
    /// Number of relay subscriptions attached so far
    pub fn relay_count(&self) -> usize {
        self.relays.lock().len()
    }

    /// Sequence numbers received through relays, tagged with the source publisher
    pub fn received(&self) -> Vec<(String, u16)> {
        self.received.lock().clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Highest number of negotiation calls that overlapped on this handle
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

#[async_trait]
impl NegotiationHandle for FakeHandle {
    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let _call = self.enter().await;
        if !sdp.contains("m=") {
            return Err(Error::NegotiationFailure(
                "Offer has no media section".to_string(),
            ));
        }
        self.remote_offers.lock().push(sdp.to_string());
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        let _call = self.enter().await;
        Ok(format!(
            "v=0\r\ns=answer-{}-{}\r\n",
            self.connection_id,
            self.remote_offers.lock().len()
        ))
    }

    async fn create_offer(&self) -> Result<String> {
        let _call = self.enter().await;
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("v=0\r\ns=offer-{}-{}\r\n", self.connection_id, n))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let _call = self.enter().await;
        self.remote_answers.lock().push(sdp.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let _call = self.enter().await;
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn attach_relay(&self, mut subscription: RelaySubscription) -> Result<()> {
        let received = Arc::clone(&self.received);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let publisher = subscription.publisher_id().to_string();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    packet = subscription.next_packet() => match packet {
                        Some(packet) => received
                            .lock()
                            .push((publisher.clone(), packet.header.sequence_number)),
                        None => break,
                    }
                }
            }
        });
        self.relays.lock().push(task);
        Ok(())
    }

    /// Reports `Closed` on the event channel, as a peer connection does on close
    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        send_event(
            &self.events,
            &self.cancel,
            HandleEvent::Transport(TransportState::Closed),
        )
        .await;
        Ok(())
    }
}

/// Engine that hands out [`FakeHandle`]s and keeps them for inspection
#[derive(Default)]
pub struct FakeEngine {
    handles: Mutex<HashMap<String, Arc<FakeHandle>>>,
    events: Mutex<HashMap<String, mpsc::Sender<HandleEvent>>>,
    created: AtomicUsize,
    latency: Mutex<Duration>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay every negotiation call and `close` on handles created from now on
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Total handles created
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn handle(&self, connection_id: &str) -> Option<Arc<FakeHandle>> {
        self.handles.lock().get(connection_id).cloned()
    }

    pub fn close_calls(&self, connection_id: &str) -> usize {
        self.handle(connection_id)
            .map(|h| h.close_calls())
            .unwrap_or(0)
    }

    /// Any handle ids created, in no particular order
    pub fn connection_ids(&self) -> Vec<String> {
        self.handles.lock().keys().cloned().collect()
    }

    /// Deliver `event` as if the transport of `connection_id` produced it
    ///
    /// Panics when no handle was created for `connection_id`. An event for a
    /// connection whose pump already stopped is discarded.
    pub async fn emit(&self, connection_id: &str, event: HandleEvent) {
        let tx = self.events.lock().get(connection_id).cloned();
        let tx = tx.unwrap_or_else(|| panic!("no event channel for {}", connection_id));
        let _ = tx.send(event).await;
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_handle(
        &self,
        connection_id: &str,
        ice: &IceConfig,
        events: mpsc::Sender<HandleEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn NegotiationHandle>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(FakeHandle {
            connection_id: connection_id.to_string(),
            remote_offers: Mutex::new(Vec::new()),
            remote_answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            ice: ice.clone(),
            received: Arc::new(Mutex::new(Vec::new())),
            relays: Mutex::new(Vec::new()),
            offers_created: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency: *self.latency.lock(),
            events: events.clone(),
            cancel,
        });
        self.handles
            .lock()
            .insert(connection_id.to_string(), Arc::clone(&handle));
        self.events
            .lock()
            .insert(connection_id.to_string(), events);
        Ok(handle)
    }
}
