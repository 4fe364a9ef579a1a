//! Connection hub
//!
//! Maps each connected identity to its outbound queue and provides the
//! delivery primitives the service needs: point-to-point send, multicast to
//! a set of connections, and broadcast to everyone.
//!
//! Queues are bounded and written with `try_send`, so a stalled client only
//! loses its own messages and never blocks the caller.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, ServerMessage};

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Message queued for the connection
    Delivered,
    /// Target is not connected
    UnknownTarget,
    /// Target's outbound queue is full
    QueueFull,
    /// Target's writer has already shut down
    Closed,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

/// Live connections and their outbound queues
#[derive(Debug, Default)]
pub struct ConnectionHub {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue
    ///
    /// Returns false if the id was already registered (the old queue is kept).
    pub fn attach(&mut self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(id, tx);
        true
    }

    /// Forget a connection; later sends to it are dropped
    pub fn detach(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue a message for one connection
    pub fn send(&self, id: &ConnectionId, msg: ServerMessage) -> Delivery {
        let Some(tx) = self.connections.get(id) else {
            return Delivery::UnknownTarget;
        };

        match tx.try_send(msg) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection = %id,
                    message = msg.kind(),
                    "Outbound queue full, dropping message"
                );
                Delivery::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue a message for each of `targets`, returning how many accepted it
    pub fn multicast<'a, I>(&self, targets: I, msg: &ServerMessage) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        targets
            .into_iter()
            .filter(|id| self.send(id, msg.clone()).is_delivered())
            .count()
    }

    /// Queue a message for every connection
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.multicast(self.connections.keys(), msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended(id: &str) -> ServerMessage {
        ServerMessage::SessionEnded {
            session_id: id.into(),
        }
    }

    #[test]
    fn test_send_to_unknown_target() {
        let hub = ConnectionHub::new();
        assert_eq!(
            hub.send(&ConnectionId::from("ghost"), ended("s1")),
            Delivery::UnknownTarget
        );
    }

    #[test]
    fn test_send_and_receive() {
        let mut hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = ConnectionId::from("a");

        assert!(hub.attach(id.clone(), tx));
        assert_eq!(hub.send(&id, ended("s1")), Delivery::Delivered);
        assert_eq!(rx.try_recv().unwrap(), ended("s1"));
    }

    #[test]
    fn test_duplicate_attach_keeps_first_queue() {
        let mut hub = ConnectionHub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let id = ConnectionId::from("a");

        assert!(hub.attach(id.clone(), tx1));
        assert!(!hub.attach(id.clone(), tx2));

        hub.send(&id, ended("s1"));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let mut hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = ConnectionId::from("slow");
        hub.attach(id.clone(), tx);

        assert_eq!(hub.send(&id, ended("s1")), Delivery::Delivered);
        assert_eq!(hub.send(&id, ended("s2")), Delivery::QueueFull);
    }

    #[test]
    fn test_closed_receiver() {
        let mut hub = ConnectionHub::new();
        let (tx, rx) = mpsc::channel(1);
        let id = ConnectionId::from("gone");
        hub.attach(id.clone(), tx);
        drop(rx);

        assert_eq!(hub.send(&id, ended("s1")), Delivery::Closed);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut hub = ConnectionHub::new();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c"] {
            let (tx, rx) = mpsc::channel(4);
            hub.attach(ConnectionId::from(name), tx);
            receivers.push(rx);
        }

        assert_eq!(hub.broadcast(&ended("s1")), 3);
        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), ended("s1"));
        }

        hub.detach(&ConnectionId::from("b"));
        assert_eq!(hub.broadcast(&ended("s2")), 2);
    }
}
