//! WebRTC-backed negotiation engine

use super::handle::{
    send_event, HandleEvent, IceCandidate, NegotiationEngine, NegotiationHandle, TransportState,
};
use crate::config::IceConfig;
use crate::media::{spawn_relay_forwarder, PublishedTrack, RelaySubscription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds one `RTCPeerConnection` per client connection
pub struct RtcEngine {
    api: Arc<API>,
    relay_buffer: usize,
}

impl RtcEngine {
    /// Create the engine with default codecs and interceptors
    ///
    /// `relay_buffer` is the per-subscriber packet backlog of every
    /// track published through this engine.
    pub fn new(relay_buffer: usize) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            relay_buffer,
        })
    }
}

fn ice_servers(ice: &IceConfig) -> Vec<RTCIceServer> {
    ice.stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(ice.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

fn transport_state(s: RTCPeerConnectionState) -> Option<TransportState> {
    match s {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        _ => None,
    }
}

#[async_trait]
impl NegotiationEngine for RtcEngine {
    #[instrument(skip(self, ice, events, cancel))]
    async fn create_handle(
        &self,
        connection_id: &str,
        ice: &IceConfig,
        events: mpsc::Sender<HandleEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn NegotiationHandle>> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(ice),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::WebRtcError(format!("Failed to create peer connection: {}", e)),
        )?);

        // Callbacks may fire from inside `close`, which the event pump can be
        // awaiting, so every send gives up once the connection is cancelled.
        let ice_tx = events.clone();
        let ice_cancel = cancel.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let cancel = ice_cancel.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let event = HandleEvent::IceCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        });
                        send_event(&tx, &cancel, event).await;
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let state_tx = events.clone();
        let state_cancel = cancel.clone();
        let state_id = connection_id.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let cancel = state_cancel.clone();
                let id = state_id.clone();
                Box::pin(async move {
                    debug!("Peer connection {} transport state: {}", id, s);
                    if let Some(state) = transport_state(s) {
                        send_event(&tx, &cancel, HandleEvent::Transport(state)).await;
                    }
                })
            },
        ));

        let track_tx = events;
        let track_id_owner = connection_id.to_string();
        let track_cancel = cancel.clone();
        let relay_buffer = self.relay_buffer;
        peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let publisher_id = track_id_owner.clone();
            let cancel = track_cancel.clone();

            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    info!(
                        "Ignoring {} track from {}",
                        track.kind(),
                        publisher_id
                    );
                    return;
                }

                let published = PublishedTrack::new(
                    publisher_id.clone(),
                    track.id(),
                    track.codec().capability.clone(),
                    relay_buffer,
                );
                info!(
                    "Inbound audio track {} from {} (ssrc={})",
                    published.track_id(),
                    publisher_id,
                    track.ssrc()
                );

                let source = published.clone();
                let read_cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = read_cancel.cancelled() => break,
                            read = track.read_rtp() => match read {
                                Ok((packet, _)) => {
                                    source.publish(packet);
                                }
                                Err(e) => {
                                    debug!("RTP read from {} ended: {}", publisher_id, e);
                                    break;
                                }
                            }
                        }
                    }
                });

                send_event(&tx, &cancel, HandleEvent::Track(published)).await;
            })
        }));

        Ok(Arc::new(RtcHandle {
            connection_id: connection_id.to_string(),
            peer_connection,
            cancel,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Negotiation handle over one `RTCPeerConnection`
pub struct RtcHandle {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl RtcHandle {
    async fn local_sdp(&self) -> Result<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| {
                Error::NegotiationFailure("No local description after negotiation".to_string())
            })
    }
}

#[async_trait]
impl NegotiationHandle for RtcHandle {
    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::NegotiationFailure(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| {
                Error::NegotiationFailure(format!("Failed to set remote description: {}", e))
            })
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| {
                Error::NegotiationFailure(format!("Failed to set local description: {}", e))
            })?;

        debug!("Created SDP answer for {}", self.connection_id);
        self.local_sdp().await
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                Error::NegotiationFailure(format!("Failed to set local description: {}", e))
            })?;

        debug!("Created SDP offer for {}", self.connection_id);
        self.local_sdp().await
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::NegotiationFailure(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| {
                Error::NegotiationFailure(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_relay(&self, subscription: RelaySubscription) -> Result<()> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            subscription.codec().clone(),
            format!("relay-{}", subscription.track_id()),
            format!("stream-{}", subscription.publisher_id()),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to add relay track: {}", e)))?;

        // Drain RTCP so the interceptors keep running.
        let rtcp_cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = rtcp_cancel.cancelled() => break,
                    read = sender.read(&mut rtcp_buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        info!(
            "Relaying {} from {} to {}",
            subscription.track_id(),
            subscription.publisher_id(),
            self.connection_id
        );

        let label = format!("{}<-{}", self.connection_id, subscription.publisher_id());
        spawn_relay_forwarder(subscription, track, self.cancel.clone(), label);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing peer connection {}", self.connection_id);
        self.cancel.cancel();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}
