//! Connection registry
//!
//! Owns exactly one negotiation handle per client connection id. Other
//! components look connections up here instead of keeping handles around,
//! so nothing outlives a `remove`.

use super::handle::{HandleEvent, IceCandidate, NegotiationEngine, NegotiationHandle, TransportState};
use super::state::NegotiationState;
use crate::auth::Role;
use crate::config::IceConfig;
use crate::media::PublishedTrack;
use crate::session::SessionRegistry;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Negotiation bookkeeping guarded by the per-connection operation lock
#[derive(Debug, Default)]
pub struct PendingOps {
    /// Remote candidates received before any remote description
    pub pending_candidates: Vec<IceCandidate>,

    /// A server-initiated offer awaits the client's answer
    pub local_offer_pending: bool,

    /// A relay was attached while a local offer was outstanding
    pub renegotiation_needed: bool,

    /// Set once the event pump for this connection has been started
    pub events_started: bool,
}

/// One client connection and its negotiation handle
pub struct Connection {
    id: String,
    handle: Arc<dyn NegotiationHandle>,
    state: parking_lot::Mutex<NegotiationState>,
    transport: parking_lot::Mutex<TransportState>,
    role: parking_lot::Mutex<Option<Role>>,
    published: parking_lot::Mutex<Option<PublishedTrack>>,
    ops: Mutex<PendingOps>,
    events: parking_lot::Mutex<Option<mpsc::Receiver<HandleEvent>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    created_at: SystemTime,
}

impl Connection {
    fn new(
        id: String,
        handle: Arc<dyn NegotiationHandle>,
        events: mpsc::Receiver<HandleEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            handle,
            state: parking_lot::Mutex::new(NegotiationState::New),
            transport: parking_lot::Mutex::new(TransportState::New),
            role: parking_lot::Mutex::new(None),
            published: parking_lot::Mutex::new(None),
            ops: Mutex::new(PendingOps::default()),
            events: parking_lot::Mutex::new(Some(events)),
            cancel,
            closed: AtomicBool::new(false),
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &Arc<dyn NegotiationHandle> {
        &self.handle
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// Move to `new_state`
    ///
    /// Terminal states are sticky; a transition out of them is ignored.
    pub fn set_state(&self, new_state: NegotiationState) {
        let mut state = self.state.lock();
        let old_state = *state;

        if old_state == new_state {
            return;
        }
        if old_state.is_terminal() {
            debug!(
                "Connection {} ignoring transition {:?} -> {:?}",
                self.id, old_state, new_state
            );
            return;
        }

        debug!(
            "Connection {} state transition: {:?} -> {:?}",
            self.id, old_state, new_state
        );
        *state = new_state;
    }

    pub fn transport_state(&self) -> TransportState {
        *self.transport.lock()
    }

    pub fn set_transport_state(&self, transport: TransportState) {
        *self.transport.lock() = transport;
    }

    pub fn role(&self) -> Option<Role> {
        *self.role.lock()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.lock() = Some(role);
    }

    /// Most recent inbound audio track of this connection
    pub fn published_track(&self) -> Option<PublishedTrack> {
        self.published.lock().clone()
    }

    pub fn set_published_track(&self, track: PublishedTrack) {
        *self.published.lock() = Some(track);
    }

    pub fn clear_published_track(&self) -> Option<PublishedTrack> {
        self.published.lock().take()
    }

    /// Serialize a signaling operation on this connection
    pub async fn lock_ops(&self) -> MutexGuard<'_, PendingOps> {
        self.ops.lock().await
    }

    /// Take the handle's event receiver; `None` once taken
    pub fn take_events(&self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.events.lock().take()
    }

    /// Token cancelled when this connection closes
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Close the negotiation handle once
    ///
    /// Later calls return immediately.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.set_state(NegotiationState::Closed);
        self.clear_published_track();
        self.cancel.cancel();
        self.handle.close().await
    }
}

/// Information about a registered connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub state: NegotiationState,
    pub role: Option<Role>,
}

/// Registry of live connections keyed by connection id
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    engine: Arc<dyn NegotiationEngine>,
    sessions: Arc<SessionRegistry>,
    event_buffer: usize,
}

impl ConnectionRegistry {
    /// Create a registry backed by `engine`
    ///
    /// `sessions` receives the cascade when a publisher's connection goes away.
    pub fn new(
        engine: Arc<dyn NegotiationEngine>,
        sessions: Arc<SessionRegistry>,
        event_buffer: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            engine,
            sessions,
            event_buffer: event_buffer.max(1),
        }
    }

    /// Return the connection for `id`, creating its handle if absent
    ///
    /// The handle is created without holding the registry lock. If another
    /// caller registered `id` in the meantime, the freshly created handle is
    /// closed and the registered one returned.
    pub async fn ensure(&self, id: &str, ice: &IceConfig) -> Result<Arc<Connection>> {
        if let Some(existing) = self.get(id).await {
            return Ok(existing);
        }

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let handle = self
            .engine
            .create_handle(id, ice, events_tx, cancel.clone())
            .await?;
        let created = Arc::new(Connection::new(id.to_string(), handle, events_rx, cancel));

        let winner = {
            let mut connections = self.connections.write().await;
            match connections.get(id) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    connections.insert(id.to_string(), Arc::clone(&created));
                    None
                }
            }
        };

        match winner {
            Some(existing) => {
                debug!("Connection {} registered concurrently, discarding duplicate handle", id);
                if let Err(e) = created.close().await {
                    warn!("Error closing duplicate handle for {}: {}", id, e);
                }
                Ok(existing)
            }
            None => {
                info!("Connection {} registered", id);
                Ok(created)
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Detach and close the connection for `id`, then end its sessions
    ///
    /// Returns whether a connection was registered. Safe to call repeatedly.
    pub async fn remove(&self, id: &str) -> bool {
        let detached = self.connections.write().await.remove(id);

        let found = match detached {
            Some(connection) => {
                info!("Removing connection {}", id);
                if let Err(e) = connection.close().await {
                    warn!("Error closing connection {}: {}", id, e);
                }
                true
            }
            None => false,
        };

        let ended = self.sessions.remove_by_publisher(id);
        if !ended.is_empty() {
            info!("Connection {} ended sessions {:?}", id, ended);
        }

        found
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .values()
            .map(|c| ConnectionInfo {
                id: c.id().to_string(),
                state: c.state(),
                role: c.role(),
            })
            .collect()
    }

    /// Remove every connection
    pub async fn clear(&self) {
        let ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        debug!("Clearing {} connections", ids.len());
        for id in ids {
            self.remove(&id).await;
        }
    }
}
