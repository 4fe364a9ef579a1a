//! Connection lifecycle and event dispatch
//!
//! [`SignalingService`] owns the session registry, the membership tracker
//! and the connection hub behind a single lock. Every connect, disconnect
//! and client intent runs as one critical section, so a registry change and
//! the notifications it causes are never interleaved with another
//! connection's event. Notifications are queued with `try_send` and the lock
//! is never held across I/O.

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::Error;
use crate::membership::{JoinOutcome, MembershipTracker};
use crate::protocol::{ClientMessage, ConnectionId, ServerMessage, SessionId, SessionInfo};
use crate::registry::{RegistryError, SessionEntry, SessionRegistry};
use crate::relay::{self, ConnectionHub, Delivery};
use crate::stats::{ServerMetrics, ServerStats};

use super::config::DEFAULT_OUTBOUND_QUEUE;

/// Shared state mutated under the service lock
#[derive(Debug, Default)]
struct SignalingState {
    hub: ConnectionHub,
    registry: SessionRegistry,
    membership: MembershipTracker,
}

impl SignalingState {
    fn broadcast_sessions(&self) {
        let msg = ServerMessage::SessionsUpdated {
            sessions: self.registry.snapshot(),
        };
        let reached = self.hub.broadcast(&msg);
        tracing::debug!(
            sessions = self.registry.len(),
            connections = reached,
            "Sessions snapshot broadcast"
        );
    }

    /// Broadcast the new snapshot and tell every member the session is gone
    fn finish_session(&mut self, entry: &SessionEntry) {
        self.broadcast_sessions();

        let members = self.membership.remove_session(&entry.id);
        let notice = ServerMessage::SessionEnded {
            session_id: entry.id.clone(),
        };
        let reached = self.hub.multicast(&members, &notice);

        tracing::info!(
            session = %entry.id,
            members = members.len(),
            notified = reached,
            "Session ended"
        );
    }

    fn notify_owner(&self, session: &SessionId, msg: ServerMessage) {
        if let Some(entry) = self.registry.lookup(session) {
            self.hub.send(&entry.owner, msg);
        }
    }

    fn leave(&mut self, viewer: &ConnectionId) -> Option<SessionId> {
        let session = self.membership.leave(viewer)?;

        let msg = ServerMessage::ViewerLeft {
            viewer_id: viewer.clone(),
            session_id: session.clone(),
            viewer_count: self.membership.viewer_count(&session),
        };
        self.notify_owner(&session, msg);

        tracing::info!(viewer = %viewer, session = %session, "Viewer left");
        Some(session)
    }
}

/// Signaling coordination service
///
/// One instance is one isolated signaling domain; tests create as many as
/// they need.
#[derive(Debug)]
pub struct SignalingService {
    state: Mutex<SignalingState>,
    metrics: ServerMetrics,
    outbound_queue: usize,
}

impl SignalingService {
    /// Create a service with the default outbound queue capacity
    pub fn new() -> Self {
        Self::with_outbound_queue(DEFAULT_OUTBOUND_QUEUE)
    }

    /// Create a service whose connections buffer `capacity` outbound messages
    pub fn with_outbound_queue(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SignalingState::default()),
            metrics: ServerMetrics::new(),
            outbound_queue: capacity.max(1),
        }
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Register a new connection with a fresh identity
    ///
    /// Returns the identity and the receiver the transport must drain.
    /// The first messages queued are `welcome` and the current snapshot.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        loop {
            let id = ConnectionId::generate();
            if self.on_connect(id.clone(), tx.clone()).await {
                return (id, rx);
            }
        }
    }

    /// Register an identity created by the transport
    ///
    /// Returns false if the identity is already connected.
    pub async fn on_connect(&self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> bool {
        let mut state = self.state.lock().await;

        if !state.hub.attach(id.clone(), tx) {
            tracing::warn!(connection = %id, "Duplicate connection id");
            return false;
        }
        self.metrics.connection_accepted();

        state.hub.send(
            &id,
            ServerMessage::Welcome {
                connection_id: id.clone(),
            },
        );
        state.hub.send(
            &id,
            ServerMessage::SessionsUpdated {
                sessions: state.registry.snapshot(),
            },
        );

        tracing::info!(connection = %id, connections = state.hub.len(), "Connection attached");
        true
    }

    /// Tear down everything a connection owns or participates in
    ///
    /// Registry and membership cleanup both complete before the lock is
    /// released, so no later event observes a stale owner.
    pub async fn on_disconnect(&self, id: &ConnectionId) {
        let mut state = self.state.lock().await;

        if !state.hub.detach(id) {
            return;
        }

        for entry in state.registry.unregister_owned_by(id) {
            state.finish_session(&entry);
        }
        state.leave(id);

        tracing::info!(connection = %id, connections = state.hub.len(), "Connection detached");
    }

    /// Dispatch one client intent
    pub async fn handle(&self, from: &ConnectionId, msg: ClientMessage) {
        tracing::debug!(connection = %from, message = msg.kind(), "Client message");

        match msg {
            ClientMessage::StartSession {
                session_id,
                metadata,
            } => self.start_session(from, session_id, metadata).await,
            ClientMessage::EndSession { session_id } => {
                match self.end_session(from, &session_id).await {
                    Ok(()) => {}
                    Err(RegistryError::SessionNotFound(_)) => {
                        tracing::debug!(connection = %from, session = %session_id, "End for unknown session ignored");
                    }
                    Err(e) => {
                        let err = Error::from(e);
                        tracing::warn!(connection = %from, error = %err, "End session rejected");
                        self.reject(from, err.to_string()).await;
                    }
                }
            }
            ClientMessage::JoinSession { session_id } => {
                self.join_session(from, session_id).await;
            }
            ClientMessage::LeaveSession => {
                self.leave_session(from).await;
            }
            ClientMessage::Signal { to, signal } => {
                self.relay(from, &to, signal).await;
            }
        }
    }

    /// Register `session` owned by `owner` and broadcast the new snapshot
    pub async fn start_session(&self, owner: &ConnectionId, session: SessionId, metadata: Value) {
        let mut state = self.state.lock().await;

        if !state.hub.is_connected(owner) {
            tracing::debug!(connection = %owner, "Start from detached connection ignored");
            return;
        }

        // An owner is never a member of its own audience
        if state.membership.session_of(owner) == Some(&session) {
            state.leave(owner);
        }

        state.registry.register(session, owner.clone(), metadata);
        state.broadcast_sessions();
    }

    /// End a session owned by `requester`
    pub async fn end_session(
        &self,
        requester: &ConnectionId,
        session: &SessionId,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;

        let entry = state.registry.unregister_as(session, requester)?;
        state.finish_session(&entry);
        Ok(())
    }

    /// Add `viewer` to a live session and notify its owner
    ///
    /// Joining an id that is not live is a silent no-op. Returns whether the
    /// viewer is a member afterwards.
    pub async fn join_session(&self, viewer: &ConnectionId, session: SessionId) -> bool {
        let mut state = self.state.lock().await;

        if !state.hub.is_connected(viewer) {
            return false;
        }

        let owner = match state.registry.lookup(&session) {
            Some(entry) => entry.owner.clone(),
            None => {
                tracing::debug!(viewer = %viewer, session = %session, "Join for unknown session ignored");
                return false;
            }
        };

        if &owner == viewer {
            tracing::debug!(viewer = %viewer, session = %session, "Owner cannot join own session");
            return false;
        }

        match state.membership.join(viewer.clone(), session.clone()) {
            JoinOutcome::AlreadyMember => return true,
            JoinOutcome::Joined { previous } => {
                if let Some(previous) = previous {
                    let msg = ServerMessage::ViewerLeft {
                        viewer_id: viewer.clone(),
                        session_id: previous.clone(),
                        viewer_count: state.membership.viewer_count(&previous),
                    };
                    state.notify_owner(&previous, msg);
                }
            }
        }

        let viewer_count = state.membership.viewer_count(&session);
        state.hub.send(
            &owner,
            ServerMessage::ViewerJoined {
                viewer_id: viewer.clone(),
                session_id: session.clone(),
                viewer_count,
            },
        );

        tracing::info!(viewer = %viewer, session = %session, viewers = viewer_count, "Viewer joined");
        true
    }

    /// Remove `viewer` from whatever session it watches
    pub async fn leave_session(&self, viewer: &ConnectionId) -> Option<SessionId> {
        self.state.lock().await.leave(viewer)
    }

    /// Relay an opaque payload between two connections
    pub async fn relay(&self, from: &ConnectionId, to: &ConnectionId, payload: Value) -> Delivery {
        let delivery = {
            let state = self.state.lock().await;
            relay::relay(&state.hub, from, to, payload)
        };

        if delivery.is_delivered() {
            self.metrics.signal_relayed();
        } else {
            self.metrics.signal_dropped();
        }
        delivery
    }

    /// Tell a connection its input was rejected
    pub async fn reject(&self, to: &ConnectionId, message: impl Into<String>) {
        self.metrics.message_rejected();
        let state = self.state.lock().await;
        state.hub.send(
            to,
            ServerMessage::Error {
                message: message.into(),
            },
        );
    }

    /// Current snapshot of live sessions
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.state.lock().await.registry.snapshot()
    }

    pub async fn lookup(&self, session: &SessionId) -> Option<SessionEntry> {
        self.state.lock().await.registry.lookup(session).cloned()
    }

    /// Live number of viewers of a session
    pub async fn viewer_count(&self, session: &SessionId) -> usize {
        self.state.lock().await.membership.viewer_count(session)
    }

    pub async fn is_connected(&self, id: &ConnectionId) -> bool {
        self.state.lock().await.hub.is_connected(id)
    }

    pub async fn stats(&self) -> ServerStats {
        let state = self.state.lock().await;
        self.metrics.snapshot(
            state.hub.len() as u64,
            state.registry.len() as u64,
            state.membership.len() as u64,
        )
    }
}

impl Default for SignalingService {
    fn default() -> Self {
        Self::new()
    }
}
