//! Signaling client
//!
//! Connects to a signaling server over WebSocket, learns its connection id
//! from the `welcome` message and then exposes the client operations as
//! plain method calls. Server notifications arrive on a channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::peer::OutboundSignal;
use crate::protocol::{ClientMessage, ConnectionId, NegotiationPayload, ServerMessage, SessionId};

/// WebSocket signaling client
///
/// # Example
/// ```no_run
/// use livesignal::client::SignalingClient;
/// use livesignal::protocol::SessionId;
///
/// # async fn example() -> livesignal::error::Result<()> {
/// let (client, mut events) = SignalingClient::connect("ws://127.0.0.1:3001").await?;
/// client.start_session(SessionId::new("launch-party"), serde_json::json!({"title": "Launch"}))?;
///
/// while let Some(msg) = events.recv().await {
///     println!("Server: {:?}", msg);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SignalingClient {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<ClientMessage>,
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect and wait for the server's `welcome`.
    ///
    /// Returns the client and a receiver for every later server message.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ServerMessage>)> {
        tracing::info!(url = %url, "Connecting to signaling server");

        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();

        let connection_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                    ServerMessage::Welcome { connection_id } => break connection_id,
                    other => {
                        tracing::debug!(message = other.kind(), "Ignoring message before welcome");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(Error::NotConnected),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };

        tracing::info!(connection = %connection_id, "Connected to signaling server");

        let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events_rx) = mpsc::channel(256);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let writer = tokio::spawn(async move {
            loop {
                // Queued messages go out before the close frame
                let msg = tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = &mut shutdown_rx => break,
                };
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode client message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
            tracing::debug!("Writer task terminated");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            if events_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Malformed server message"),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            tracing::debug!("Reader task terminated");
        });

        let client = Self {
            connection_id,
            tx,
            shutdown,
            writer,
            reader,
        };

        Ok((client, events_rx))
    }

    /// Id the server assigned to this connection
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::NotConnected)
    }

    pub fn start_session(&self, session_id: SessionId, metadata: Value) -> Result<()> {
        self.send(ClientMessage::StartSession {
            session_id,
            metadata,
        })
    }

    pub fn end_session(&self, session_id: SessionId) -> Result<()> {
        self.send(ClientMessage::EndSession { session_id })
    }

    pub fn join_session(&self, session_id: SessionId) -> Result<()> {
        self.send(ClientMessage::JoinSession { session_id })
    }

    pub fn leave_session(&self) -> Result<()> {
        self.send(ClientMessage::LeaveSession)
    }

    /// Relay an opaque payload to another connection
    pub fn signal(&self, to: ConnectionId, signal: Value) -> Result<()> {
        self.send(ClientMessage::Signal { to, signal })
    }

    /// Relay a typed negotiation payload
    pub fn send_negotiation(&self, to: ConnectionId, payload: &NegotiationPayload) -> Result<()> {
        self.signal(to, payload.to_value()?)
    }

    /// Relay everything peer links emit until `signals` closes
    pub fn forward_signals(&self, mut signals: mpsc::Receiver<OutboundSignal>) -> JoinHandle<()> {
        let tx = self.tx.clone();

        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let msg = match signal_message(signal) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode negotiation payload");
                        continue;
                    }
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
        })
    }

    /// Close the WebSocket and wait for the close frame to go out
    pub async fn close(self) {
        let SignalingClient {
            shutdown,
            writer,
            reader,
            ..
        } = self;

        let _ = shutdown.send(());
        let _ = writer.await;
        reader.abort();
    }
}

fn signal_message(signal: OutboundSignal) -> std::result::Result<ClientMessage, serde_json::Error> {
    Ok(ClientMessage::Signal {
        to: signal.to,
        signal: signal.payload.to_value()?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::IceCandidate;

    #[test]
    fn test_outbound_signal_becomes_relay_request() {
        let msg = signal_message(OutboundSignal {
            to: ConnectionId::from("viewer-1"),
            payload: NegotiationPayload::Candidate(IceCandidate::new("candidate:0")),
        })
        .unwrap();

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "signal",
                "to": "viewer-1",
                "signal": {"type": "candidate", "data": {"candidate": "candidate:0"}}
            })
        );
    }
}
