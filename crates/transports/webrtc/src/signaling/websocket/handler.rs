//! Per-client WebSocket handling

use crate::signaling::dispatcher::SignalingDispatcher;
use crate::signaling::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, warn};

/// Serve one client until it closes, errors or the server shuts down
///
/// The client gets a fresh UUID v4 connection id. Its negotiation handle is
/// created on connect and torn down when the socket goes away.
pub async fn handle_connection(
    stream: TcpStream,
    dispatcher: Arc<SignalingDispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    let (ws_tx, mut ws_rx) = ws_stream.split();

    let connection_id = uuid::Uuid::new_v4().to_string();
    info!("WebSocket client {} connected as {}", addr, connection_id);

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(dispatcher.config().outbound_buffer);

    let ws_tx = Arc::new(Mutex::new(ws_tx));
    let ws_tx_forward = Arc::clone(&ws_tx);
    let forward_id = connection_id.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} for {}: {}", message.event(), forward_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_tx_forward.lock().await.send(Message::Text(text)).await {
                warn!("Failed to send to {}: {}", forward_id, e);
                break;
            }
        }
    });

    if let Err(e) = dispatcher.connect(&connection_id, tx).await {
        error!("Failed to set up connection {}: {}", connection_id, e);
        if let Ok(text) = ServerMessage::error(e.client_message()).to_json() {
            let _ = ws_tx.lock().await.send(Message::Text(text)).await;
        }
        forward_task.abort();
        return Ok(());
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                        Ok(message) => dispatcher.dispatch(&connection_id, message).await,
                        Err(e) => {
                            warn!("Unparseable message from {}: {}", connection_id, e);
                            dispatcher
                                .send(&connection_id, ServerMessage::error(e.client_message()))
                                .await;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.lock().await.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client {} closed", connection_id);
                        break;
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring {} frame from {}", frame_kind(&other), connection_id);
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", connection_id, e);
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("Closing {} for server shutdown", connection_id);
                let _ = ws_tx.lock().await.send(Message::Close(None)).await;
                break;
            }
        }
    }

    dispatcher.disconnect(&connection_id).await;
    forward_task.abort();

    Ok(())
}

fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "raw",
    }
}
