//! WebSocket signaling test client

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{HarnessError, HarnessResult};

/// Browser stand-in speaking the JSON event protocol
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> HarnessResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| HarnessError::ConnectionError(e.to_string()))?;
        Ok(Self { ws })
    }

    /// Send `{"event": event, "data": data}`
    pub async fn emit(&mut self, event: &str, data: Value) -> HarnessResult<()> {
        let frame = serde_json::json!({ "event": event, "data": data });
        self.send_raw(frame.to_string()).await
    }

    pub async fn send_raw(&mut self, text: String) -> HarnessResult<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| HarnessError::ClientError(e.to_string()))
    }

    /// Next JSON event, skipping control frames
    pub async fn recv(&mut self) -> HarnessResult<Value> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("waiting for server message".to_string()))?;

            match frame {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| HarnessError::ValidationError(e.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HarnessError::ConnectionError("server closed".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(HarnessError::ConnectionError(e.to_string())),
            }
        }
    }

    /// Wait for a specific event, failing on anything else
    pub async fn expect(&mut self, event: &str) -> HarnessResult<Value> {
        let message = self.recv().await?;
        if message["event"] != event {
            return Err(HarnessError::ValidationError(format!(
                "expected {}, got {}",
                event, message
            )));
        }
        Ok(message["data"].clone())
    }

    /// Send a ping and wait for its pong
    pub async fn ping(&mut self, payload: Vec<u8>) -> HarnessResult<Vec<u8>> {
        self.ws
            .send(Message::Ping(payload))
            .await
            .map_err(|e| HarnessError::ClientError(e.to_string()))?;

        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("waiting for pong".to_string()))?;
            match frame {
                Some(Ok(Message::Pong(data))) => return Ok(data),
                Some(Ok(_)) => continue,
                _ => return Err(HarnessError::ConnectionError("no pong".to_string())),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
