//! Live session test harness
//!
//! Provides infrastructure for integration testing of the coordinator with:
//! - A recording fake negotiation engine in place of the WebRTC stack
//! - Direct dispatcher-level peers with their outbound queues
//! - An embedded WebSocket signaling server on a random port
//!
//! Basic usage pattern:
//!
//! 1. Create a `LiveHarness`
//! 2. Connect peers with `harness.connect("t1")`
//! 3. Dispatch client messages and read what each peer was sent
//! 4. Inject transport events through `harness.engine`

#![allow(dead_code)]

pub mod test_client;

use audiolms_webrtc::{
    ClientMessage, LiveConfig, ServerMessage, SignalingDispatcher, WebSocketServerHandle,
    WebSocketSignalingServer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use audiolms_webrtc::test_support::{opus_track, rtp, FakeEngine, FakeHandle, OFFER_SDP};
pub use test_client::TestClient;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,audiolms_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Let spawned pumps and relay tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// One connected client as seen by the dispatcher
pub struct TestPeer {
    pub id: String,
    rx: mpsc::Receiver<ServerMessage>,
}

impl TestPeer {
    pub async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("{} timed out waiting for a message", self.id))
            .unwrap_or_else(|| panic!("{} outbound queue closed", self.id))
    }

    pub fn try_next(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}

/// Dispatcher wired to a [`FakeEngine`]
pub struct LiveHarness {
    pub engine: Arc<FakeEngine>,
    pub dispatcher: Arc<SignalingDispatcher>,
}

impl LiveHarness {
    pub fn new() -> Self {
        Self::with_config(LiveConfig::default())
    }

    pub fn with_config(config: LiveConfig) -> Self {
        init_logging();
        let engine = FakeEngine::new();
        let dispatcher = SignalingDispatcher::new(config, engine.clone());
        Self { engine, dispatcher }
    }

    pub async fn connect(&self, id: &str) -> TestPeer {
        let (tx, rx) = mpsc::channel(64);
        self.dispatcher
            .connect(id, tx)
            .await
            .unwrap_or_else(|e| panic!("connect {} failed: {}", id, e));
        TestPeer {
            id: id.to_string(),
            rx,
        }
    }

    /// Fake handle created for `id`; panics when none was created
    pub fn handle(&self, id: &str) -> Arc<FakeHandle> {
        self.engine
            .handle(id)
            .unwrap_or_else(|| panic!("no handle created for {}", id))
    }

    pub async fn send(&self, peer: &TestPeer, message: ClientMessage) {
        self.dispatcher.dispatch(&peer.id, message).await;
    }

    /// Start an embedded WebSocket server on a random local port
    pub async fn serve(&self) -> WebSocketServerHandle {
        let server = WebSocketSignalingServer::new(
            "127.0.0.1:0".parse().expect("valid address"),
            Arc::clone(&self.dispatcher),
        );
        server.start().await.expect("server should bind")
    }
}
