//! Signaling dispatcher
//!
//! Turns inbound [`ClientMessage`]s into operations on one connection's
//! negotiation handle and on the session registry, and answers the
//! originating connection through the [`Outbox`].
//!
//! Every operation is scoped to the connection that sent the message.
//! Operations on the same connection are serialized by that connection's
//! operation lock; operations on different connections run concurrently.

use super::outbox::Outbox;
use super::protocol::{ClientMessage, LeaveRequest, ServerMessage, SessionDescription, SessionRequest};
use crate::auth::{Action, AuthorizationPolicy, Role, RolePolicy};
use crate::config::LiveConfig;
use crate::media::PublishedTrack;
use crate::peer::state::{validate_candidate, validate_sdp};
use crate::peer::{
    Connection, ConnectionRegistry, HandleEvent, IceCandidate, NegotiationEngine, NegotiationState,
    PendingOps, TransportState,
};
use crate::session::{Activation, MediaAttachment, RelayCoordinator, SessionRegistry};
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Coordinates signaling for every connected client
pub struct SignalingDispatcher {
    config: Arc<LiveConfig>,
    connections: Arc<ConnectionRegistry>,
    sessions: Arc<SessionRegistry>,
    relay: RelayCoordinator,
    outbox: Outbox,
    policy: Arc<dyn AuthorizationPolicy>,
}

impl SignalingDispatcher {
    /// Create a dispatcher with the default [`RolePolicy`]
    pub fn new(config: LiveConfig, engine: Arc<dyn NegotiationEngine>) -> Arc<Self> {
        Self::with_policy(config, engine, Arc::new(RolePolicy))
    }

    pub fn with_policy(
        config: LiveConfig,
        engine: Arc<dyn NegotiationEngine>,
        policy: Arc<dyn AuthorizationPolicy>,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new(
            engine,
            Arc::clone(&sessions),
            config.event_buffer,
        ));
        let relay = RelayCoordinator::new(Arc::clone(&sessions), Arc::clone(&connections));

        Arc::new(Self {
            config: Arc::new(config),
            connections,
            sessions,
            relay,
            outbox: Outbox::new(),
            policy,
        })
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Register a client and create its negotiation handle
    ///
    /// `outbound` receives every message addressed to `id`.
    pub async fn connect(&self, id: &str, outbound: mpsc::Sender<ServerMessage>) -> Result<()> {
        self.outbox.register(id, outbound);

        if let Err(e) = self.connections.ensure(id, &self.config.ice).await {
            self.outbox.unregister(id);
            return Err(e);
        }

        info!("Client connected: {}", id);
        Ok(())
    }

    /// Tear down a client: close its handle and end the sessions it published
    pub async fn disconnect(&self, id: &str) {
        self.connections.remove(id).await;
        self.outbox.unregister(id);
        info!("Client disconnected: {}", id);
    }

    /// Queue a message for one client
    pub async fn send(&self, id: &str, message: ServerMessage) -> bool {
        self.outbox.send(id, message).await
    }

    /// Handle one inbound message from `id`
    ///
    /// Failures are reported to `id` as an `error` message, or only logged
    /// when there is no connection to report to. They never propagate.
    pub async fn dispatch(self: &Arc<Self>, id: &str, message: ClientMessage) {
        let event = message.event();
        debug!("Dispatching {} from {}", event, id);

        let result = match message {
            ClientMessage::Offer(desc) => self.handle_offer(id, desc).await,
            ClientMessage::Answer(desc) => self.handle_answer(id, desc).await,
            ClientMessage::IceCandidate(candidate) => self.handle_ice_candidate(id, candidate).await,
            ClientMessage::StartLiveSession(req) => self.start_session(id, req).await,
            ClientMessage::JoinLiveSession(req) => self.join_session(id, req).await,
            ClientMessage::LeaveSession(req) => self.leave_session(id, req).await,
        };

        if let Err(e) = result {
            self.report(id, event, e).await;
        }
    }

    async fn report(&self, id: &str, event: &str, error: Error) {
        if !error.is_reportable() {
            warn!("Dropping {} from {}: {}", event, id, error);
            return;
        }

        warn!("{} from {} failed: {}", event, id, error);
        self.outbox
            .send(id, ServerMessage::error(error.client_message()))
            .await;
    }

    async fn connection(&self, id: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(id)
            .await
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))
    }

    /// Apply a client offer and answer it
    ///
    /// The answer is queued before any local ICE candidate can be forwarded:
    /// the pump forwards candidates under the same operation lock.
    pub async fn handle_offer(self: &Arc<Self>, id: &str, desc: SessionDescription) -> Result<()> {
        let conn = self.connection(id).await?;
        validate_sdp("offer", &desc.sdp_type, &desc.sdp)?;

        let mut ops = conn.lock_ops().await;
        conn.state().accept_offer()?;

        conn.handle().set_remote_offer(&desc.sdp).await?;
        conn.set_state(NegotiationState::HaveRemoteOffer);
        ops.local_offer_pending = false;

        for candidate in std::mem::take(&mut ops.pending_candidates) {
            if let Err(e) = conn.handle().add_ice_candidate(candidate).await {
                warn!("Buffered ICE candidate for {} rejected: {}", id, e);
            }
        }

        let answer = conn.handle().create_answer().await?;
        conn.set_state(settled_state(&conn));

        self.outbox
            .send(id, ServerMessage::Answer(SessionDescription::answer(answer)))
            .await;

        if !ops.events_started {
            ops.events_started = true;
            if let Some(events) = conn.take_events() {
                self.spawn_event_pump(Arc::clone(&conn), events);
            }
        }
        Ok(())
    }

    /// Apply a client answer to the outstanding server offer
    pub async fn handle_answer(&self, id: &str, desc: SessionDescription) -> Result<()> {
        let conn = self.connection(id).await?;
        validate_sdp("answer", &desc.sdp_type, &desc.sdp)?;

        let mut ops = conn.lock_ops().await;
        conn.state().accept_answer(ops.local_offer_pending)?;

        conn.handle().set_remote_answer(&desc.sdp).await?;
        ops.local_offer_pending = false;
        conn.set_state(settled_state(&conn));

        if std::mem::take(&mut ops.renegotiation_needed) {
            self.send_local_offer(&conn, &mut ops).await?;
        }
        Ok(())
    }

    /// Apply or buffer a remote ICE candidate
    pub async fn handle_ice_candidate(&self, id: &str, candidate: IceCandidate) -> Result<()> {
        let conn = self.connection(id).await?;
        if !validate_candidate(&candidate.candidate)? {
            debug!("End of remote candidates for {}", id);
            return Ok(());
        }

        let mut ops = conn.lock_ops().await;
        let state = conn.state();

        if state.is_terminal() {
            return Err(Error::NegotiationFailure(format!(
                "Cannot add ICE candidate in state {:?}",
                state
            )));
        }

        if state.has_remote_description() {
            conn.handle().add_ice_candidate(candidate).await
        } else {
            debug!("Buffering ICE candidate for {} until its offer arrives", id);
            ops.pending_candidates.push(candidate);
            Ok(())
        }
    }

    /// Activate a session with `id` as its publisher
    pub async fn start_session(&self, id: &str, req: SessionRequest) -> Result<()> {
        let role = match req.role.as_deref() {
            Some(role) => role.parse::<Role>()?,
            None => Role::Teacher,
        };
        self.policy.authorize(role, Action::StartSession)?;

        if req.session_id.is_empty() {
            return Err(Error::SessionConflict(
                "Session id must not be empty.".to_string(),
            ));
        }

        let conn = self.connections.get(id).await.ok_or_else(|| {
            Error::SessionConflict("No active WebRTC connection found for you.".to_string())
        })?;

        if let Activation::AlreadyActive { publisher_id } =
            self.sessions.activate(&req.session_id, id)
        {
            debug!(
                "Session {} already published by {}, rejecting {}",
                req.session_id, publisher_id, id
            );
            return Err(Error::SessionConflict(format!(
                "Live session {} is already active.",
                req.session_id
            )));
        }

        // A concurrent disconnect may have cascaded before the activation landed.
        if conn.is_closed() {
            self.sessions.deactivate(&req.session_id, id);
            return Err(Error::ConnectionNotFound(id.to_string()));
        }

        conn.set_role(Role::Teacher);
        if let Some(track) = conn.published_track() {
            self.sessions.set_published_track(id, track);
        }

        info!("Live session {} started by {}", req.session_id, id);
        self.outbox
            .send(
                id,
                ServerMessage::LiveSessionStarted {
                    session_id: req.session_id,
                    status: "success".to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Join `id` to a session and relay its publisher's audio
    pub async fn join_session(&self, id: &str, req: SessionRequest) -> Result<()> {
        // Only activation is role-gated; an unrecognised role joins as a student.
        let role = match req.role.as_deref().map(str::parse::<Role>) {
            Some(Ok(role)) => role,
            Some(Err(e)) => {
                debug!("Treating {} as student: {}", id, e);
                Role::Student
            }
            None => Role::Student,
        };
        self.policy.authorize(role, Action::JoinSession)?;

        let outcome = self.relay.join(&req.session_id, id).await?;
        let conn = self.connection(id).await?;
        conn.set_role(Role::Student);

        self.outbox
            .send(
                id,
                ServerMessage::LiveSessionJoined {
                    session_id: outcome.session_id.clone(),
                    teacher_id: outcome.publisher_id.clone(),
                },
            )
            .await;

        if outcome.media == MediaAttachment::Attached {
            self.renegotiate(&conn).await?;
        }
        Ok(())
    }

    /// Leave a session; a publisher leaving ends it
    pub async fn leave_session(&self, id: &str, req: LeaveRequest) -> Result<()> {
        if self.sessions.deactivate(&req.session_id, id) {
            info!("Live session {} ended by its publisher {}", req.session_id, id);
        } else {
            debug!("{} left session {}", id, req.session_id);
        }

        self.outbox
            .send(
                id,
                ServerMessage::SessionLeft {
                    session_id: req.session_id,
                    status: "success".to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Offer the client a new description after media was attached
    ///
    /// Before the first client offer nothing is sent: the attached media
    /// goes into the answer to that offer.
    async fn renegotiate(&self, conn: &Arc<Connection>) -> Result<()> {
        let mut ops = conn.lock_ops().await;
        match conn.state() {
            NegotiationState::Negotiating | NegotiationState::Connected => {}
            state => {
                debug!("No renegotiation for {} in state {:?}", conn.id(), state);
                return Ok(());
            }
        }

        if ops.local_offer_pending {
            debug!("Offer already outstanding for {}, renegotiating after its answer", conn.id());
            ops.renegotiation_needed = true;
            return Ok(());
        }

        self.send_local_offer(conn, &mut ops).await
    }

    /// Create a local offer and queue it; the caller holds the operation lock
    async fn send_local_offer(&self, conn: &Connection, ops: &mut PendingOps) -> Result<()> {
        let offer = conn.handle().create_offer().await?;
        ops.local_offer_pending = true;
        info!("Renegotiating {} with a server offer", conn.id());

        self.outbox
            .send(conn.id(), ServerMessage::Offer(SessionDescription::offer(offer)))
            .await;
        Ok(())
    }

    fn spawn_event_pump(self: &Arc<Self>, conn: Arc<Connection>, mut events: mpsc::Receiver<HandleEvent>) {
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        let cancel = conn.cancel_token();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                dispatcher.on_handle_event(&conn, event).await;
            }
            debug!("Event pump for {} stopped", conn.id());
        });
    }

    async fn on_handle_event(&self, conn: &Arc<Connection>, event: HandleEvent) {
        match event {
            HandleEvent::IceCandidate(candidate) => {
                // Wait out any offer or answer in progress so it reaches the client first.
                let _ops = conn.lock_ops().await;
                self.outbox
                    .send(conn.id(), ServerMessage::IceCandidate(candidate))
                    .await;
            }
            HandleEvent::Track(track) => self.register_track(conn, track),
            HandleEvent::Transport(state) => self.on_transport(conn, state).await,
        }
    }

    /// Record an inbound track on every session the connection publishes
    fn register_track(&self, conn: &Connection, track: PublishedTrack) {
        info!("Track {} received from {}", track.track_id(), conn.id());
        conn.set_published_track(track.clone());
        self.sessions.set_published_track(conn.id(), track);

        // Removal sets the closed flag before cascading, so either the cascade
        // saw this track or this check sees the flag.
        if conn.is_closed() {
            conn.clear_published_track();
            let ended = self.sessions.remove_by_publisher(conn.id());
            debug!("Track from closed {} discarded, ended {:?}", conn.id(), ended);
        }
    }

    async fn on_transport(&self, conn: &Connection, state: TransportState) {
        conn.set_transport_state(state);

        match state {
            TransportState::Connected => {
                conn.set_state(conn.state().on_transport_connected());
                info!("Connection {} established", conn.id());
            }
            TransportState::Failed => {
                warn!("Connection {} failed, closing", conn.id());
                conn.set_state(NegotiationState::Failed);

                // Closing the handle can report back through this pump.
                let connections = Arc::clone(&self.connections);
                let id = conn.id().to_string();
                tokio::spawn(async move {
                    connections.remove(&id).await;
                });
            }
            other => debug!("Connection {} transport {:?}", conn.id(), other),
        }
    }
}

/// State once a local answer or remote answer has been applied
fn settled_state(conn: &Connection) -> NegotiationState {
    if conn.transport_state() == TransportState::Connected {
        NegotiationState::Connected
    } else {
        NegotiationState::Negotiating
    }
}
