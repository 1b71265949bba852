//! One-to-many relay of a published audio track
//!
//! A [`PublishedTrack`] is the publisher's outbound audio reference. Each
//! subscriber reads it through its own [`RelaySubscription`], so a slow or
//! departing subscriber never touches the publisher or the other readers.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

/// Source side of a published track, shared by every clone of the reference
#[derive(Debug)]
struct TrackSource {
    track_id: String,
    publisher_id: String,
    codec: RTCRtpCodecCapability,
    packets: broadcast::Sender<Packet>,
}

/// Reference to a publisher's inbound audio, re-offered to subscribers
#[derive(Clone)]
pub struct PublishedTrack {
    inner: Arc<TrackSource>,
}

impl PublishedTrack {
    /// Create a new published track
    ///
    /// `capacity` is the number of packets a subscriber may fall behind
    /// before it starts skipping.
    pub fn new(
        publisher_id: impl Into<String>,
        track_id: impl Into<String>,
        codec: RTCRtpCodecCapability,
        capacity: usize,
    ) -> Self {
        let (packets, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(TrackSource {
                track_id: track_id.into(),
                publisher_id: publisher_id.into(),
                codec,
                packets,
            }),
        }
    }

    /// Track identifier as reported by the publisher's transport
    pub fn track_id(&self) -> &str {
        &self.inner.track_id
    }

    /// Connection that publishes this track
    pub fn publisher_id(&self) -> &str {
        &self.inner.publisher_id
    }

    /// Codec negotiated with the publisher
    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.inner.codec
    }

    /// Push one RTP packet to every current subscriber
    ///
    /// Returns the number of subscribers that will see the packet.
    pub fn publish(&self, packet: Packet) -> usize {
        self.inner.packets.send(packet).unwrap_or(0)
    }

    /// Number of live relay subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.packets.receiver_count()
    }

    /// Open an independent read-only view of this track
    pub fn subscribe(&self) -> RelaySubscription {
        RelaySubscription {
            track_id: self.inner.track_id.clone(),
            publisher_id: self.inner.publisher_id.clone(),
            codec: self.inner.codec.clone(),
            receiver: self.inner.packets.subscribe(),
        }
    }

    /// Whether both references point at the same source
    pub fn same_source(&self, other: &PublishedTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PublishedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedTrack")
            .field("track_id", &self.inner.track_id)
            .field("publisher_id", &self.inner.publisher_id)
            .field("mime_type", &self.inner.codec.mime_type)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// One subscriber's view of a published track
///
/// Holds no reference to the source itself: once the publisher's side is
/// gone, [`next_packet`](Self::next_packet) returns `None`.
pub struct RelaySubscription {
    track_id: String,
    publisher_id: String,
    codec: RTCRtpCodecCapability,
    receiver: broadcast::Receiver<Packet>,
}

impl RelaySubscription {
    /// Track identifier of the source
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Connection that publishes the source
    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    /// Codec of the source
    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.codec
    }

    /// Wait for the next relayed packet
    ///
    /// Skips over packets lost to lag. Returns `None` when the source closed.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.receiver.recv().await {
                Ok(packet) => return Some(packet),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "Relay subscriber of {} lagged, skipped {} packets",
                        self.track_id, n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for RelaySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySubscription")
            .field("track_id", &self.track_id)
            .field("publisher_id", &self.publisher_id)
            .finish()
    }
}

/// Destination of relayed packets on a subscriber's connection
#[async_trait]
pub trait RtpSink: Send + Sync {
    /// Write one packet towards the subscriber
    async fn write_packet(&self, packet: &Packet) -> crate::Result<()>;
}

#[async_trait]
impl RtpSink for TrackLocalStaticRTP {
    async fn write_packet(&self, packet: &Packet) -> crate::Result<()> {
        self.write_rtp(packet).await?;
        Ok(())
    }
}

/// Spawn the fan-out task copying a subscription into a sink
///
/// The task ends when the source closes, when the sink rejects a write, or
/// when `cancel` fires.
pub fn spawn_relay_forwarder(
    mut subscription: RelaySubscription,
    sink: Arc<dyn RtpSink>,
    cancel: CancellationToken,
    label: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} relay forwarder cancelled", label);
                    break;
                }
                packet = subscription.next_packet() => {
                    match packet {
                        Some(packet) => {
                            if let Err(e) = sink.write_packet(&packet).await {
                                warn!("{} relay write error: {}", label, e);
                                break;
                            }
                        }
                        None => {
                            info!("{} relay source closed", label);
                            break;
                        }
                    }
                }
            }
        }
    })
}
