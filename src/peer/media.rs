//! Media transport seam
//!
//! A concrete WebRTC stack lives behind [`MediaTransport`]. The peer link
//! only drives it; it never looks inside descriptions or candidates.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::state::Role;
use crate::protocol::{ConnectionId, IceCandidate, SessionDescription};

/// Failure reported by the media stack
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Asynchronous notifications from the media stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate was discovered
    LocalCandidate(IceCandidate),
    /// Connectivity checks succeeded
    Connected,
    /// Connectivity checks failed or the transport dropped
    Failed(String),
}

/// Operations a peer link needs from the media stack
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: &SessionDescription)
        -> Result<(), TransportError>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Wait for local gathering to finish
    ///
    /// Returns the final local description with every gathered candidate.
    /// Only used in bundled mode.
    async fn gathering_complete(&self) -> Result<SessionDescription, TransportError>;

    /// Release tracks, sockets and any other resources
    async fn close(&self);
}

/// A freshly acquired transport and its event stream
pub struct TransportHandle {
    pub transport: Arc<dyn MediaTransport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Acquires one media transport per remote counterpart
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    async fn create(&self, remote: &ConnectionId, role: Role) -> Result<TransportHandle, TransportError>;
}
