//! Registry error types

use crate::protocol::{ConnectionId, SessionId};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Session is not live
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Requester does not own the session
    #[error("Session {session} is owned by {owner}")]
    NotOwner {
        session: SessionId,
        owner: ConnectionId,
    },
}
