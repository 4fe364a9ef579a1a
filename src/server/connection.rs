//! Per-connection WebSocket handling
//!
//! Each accepted socket gets its own task: upgrade, attach to the service,
//! pump outbound messages from the connection's queue, and feed inbound
//! frames to the service in the order they arrive. Whatever ends the loop,
//! the service sees exactly one disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ConnectionId};
use crate::server::config::ServerConfig;
use crate::server::service::SignalingService;

/// How long queued messages and the close frame get to flush after the
/// read side ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A single signaling connection
pub struct Connection {
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    service: Arc<SignalingService>,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        service: Arc<SignalingService>,
    ) -> Self {
        Self {
            socket,
            peer_addr,
            config,
            service,
        }
    }

    /// Run the connection until either side closes it
    pub async fn run(self) -> Result<()> {
        let Connection {
            socket,
            peer_addr,
            config,
            service,
        } = self;

        // Oversized frames are refused while reading the header
        let ws_config = WebSocketConfig {
            max_message_size: Some(config.max_message_size),
            max_frame_size: Some(config.max_message_size),
            ..Default::default()
        };
        let upgrade = tokio_tungstenite::accept_async_with_config(socket, Some(ws_config));
        let ws = match tokio::time::timeout(config.handshake_timeout, upgrade).await {
            Ok(ws) => ws?,
            Err(_) => {
                tracing::debug!(peer = %peer_addr, "WebSocket handshake timed out");
                return Ok(());
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (id, mut outbound) = service.connect().await;

        tracing::debug!(connection = %id, peer = %peer_addr, "WebSocket established");

        let writer_id = id.clone();
        let mut writer = tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(connection = %writer_id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    tracing::debug!(connection = %writer_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let result = loop {
            let frame = match ws_rx.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size }))) => {
                    let err = Error::MessageTooLarge {
                        size,
                        limit: max_size,
                    };
                    tracing::warn!(connection = %id, error = %err, "Inbound frame rejected");
                    service.reject(&id, err.to_string()).await;
                    break Err(err);
                }
                Some(Err(e)) => break Err(Error::from(e)),
                None => break Ok(()),
            };

            match frame {
                Message::Text(text) => on_text(&config, &service, &id, &text).await,
                Message::Binary(data) => {
                    service
                        .reject(&id, format!("Binary frames are not supported ({} bytes)", data.len()))
                        .await;
                }
                Message::Close(_) => break Ok(()),
                // Pings are answered by the WebSocket layer
                _ => {}
            }
        };

        // Detaching drops the queue sender; the writer drains it and closes
        service.on_disconnect(&id).await;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            tracing::debug!(connection = %id, "Writer did not finish in time");
            writer.abort();
        }

        match result {
            Err(e) if e.is_disconnect() => Ok(()),
            other => other,
        }
    }
}

/// Decode one text frame and hand it to the service
async fn on_text(config: &ServerConfig, service: &SignalingService, id: &ConnectionId, text: &str) {
    if text.len() > config.max_message_size {
        let err = Error::MessageTooLarge {
            size: text.len(),
            limit: config.max_message_size,
        };
        tracing::warn!(connection = %id, error = %err, "Inbound frame rejected");
        service.reject(id, err.to_string()).await;
        return;
    }

    match ClientMessage::from_json(text) {
        Ok(msg) => service.handle(id, msg).await,
        Err(e) => {
            tracing::warn!(connection = %id, error = %e, "Malformed client message");
            service
                .reject(id, format!("Malformed message: {}", e))
                .await;
        }
    }
}
