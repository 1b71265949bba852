//! WebSocket signaling server

use super::handler::handle_connection;
use crate::signaling::dispatcher::SignalingDispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    /// Requested bind address
    addr: SocketAddr,

    dispatcher: Arc<SignalingDispatcher>,
}

impl WebSocketSignalingServer {
    pub fn new(addr: SocketAddr, dispatcher: Arc<SignalingDispatcher>) -> Self {
        Self { addr, dispatcher }
    }

    pub fn dispatcher(&self) -> Arc<SignalingDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Bind and start accepting clients
    ///
    /// Returns once the listener is bound. Each client is served on its own task.
    pub async fn start(self) -> Result<WebSocketServerHandle, std::io::Error> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!("Failed to bind WebSocket server to {}: {}", self.addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket signaling server listening on ws://{}", local_addr);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let accept_shutdown = shutdown_tx.clone();
        let dispatcher = self.dispatcher;

        let task = tokio::spawn(async move {
            let mut shutdown_rx = accept_shutdown.subscribe();

            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted WebSocket connection from {}", peer_addr);
                                let dispatcher = Arc::clone(&dispatcher);
                                let client_shutdown = accept_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, dispatcher, client_shutdown).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("WebSocket signaling server received shutdown signal");
                        break;
                    }
                }
            }

            info!("WebSocket signaling server accept loop exited");
        });

        Ok(WebSocketServerHandle {
            local_addr,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Handle for controlling the WebSocket server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every open client socket
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to WebSocket server");
        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
