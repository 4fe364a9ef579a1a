//! Session entry stored in the registry

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::{ConnectionId, SessionId, SessionInfo};

/// A live session and its current owner
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Caller-chosen session id
    pub id: SessionId,

    /// Connection that registered the session most recently
    pub owner: ConnectionId,

    /// Opaque title/description blob supplied by the owner
    pub metadata: Value,

    /// When this owner registered the session
    pub started_at: Instant,
}

impl SessionEntry {
    pub fn new(id: SessionId, owner: ConnectionId, metadata: Value) -> Self {
        Self {
            id,
            owner,
            metadata,
            started_at: Instant::now(),
        }
    }

    pub fn is_owned_by(&self, connection: &ConnectionId) -> bool {
        &self.owner == connection
    }

    /// How long the current owner has been live
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wire representation for `sessions-updated`
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            owner_id: self.owner.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
