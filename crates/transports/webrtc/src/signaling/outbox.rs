//! Per-connection outbound message queues

use super::protocol::ServerMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Routes outbound messages to the connection they are addressed to
#[derive(Debug, Default)]
pub struct Outbox {
    senders: RwLock<HashMap<String, mpsc::Sender<ServerMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, tx: mpsc::Sender<ServerMessage>) {
        self.senders.write().insert(id.to_string(), tx);
    }

    pub fn unregister(&self, id: &str) {
        self.senders.write().remove(id);
    }

    /// Queue `message` for `id`
    ///
    /// Returns `false` when the connection is gone or its writer stopped.
    ///
    /// ```
    /// use audiolms_webrtc::signaling::Outbox;
    /// use audiolms_webrtc::ServerMessage;
    /// use tokio::sync::mpsc;
    ///
    /// # tokio_test::block_on(async {
    /// let outbox = Outbox::new();
    /// let (tx, mut rx) = mpsc::channel(8);
    /// outbox.register("s1", tx);
    ///
    /// assert!(outbox.send("s1", ServerMessage::error("nope")).await);
    /// assert!(!outbox.send("s2", ServerMessage::error("nope")).await);
    /// assert_eq!(rx.recv().await, Some(ServerMessage::error("nope")));
    /// # });
    /// ```
    pub async fn send(&self, id: &str, message: ServerMessage) -> bool {
        let tx = self.senders.read().get(id).cloned();
        let Some(tx) = tx else {
            debug!("Dropping {} for unknown connection {}", message.event(), id);
            return false;
        };

        let event = message.event();
        if tx.send(message).await.is_err() {
            debug!("Dropping {} for closed connection {}", event, id);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }
}
