//! Client-side peer negotiation
//!
//! A broadcaster keeps one [`PeerLink`] per viewer and a viewer keeps one
//! for the broadcaster. Each link walks the offer/answer exchange over the
//! signaling relay and drives a [`MediaTransport`] supplied by the caller.
//!
//! ```text
//!   ServerMessage ──► PeerManager ──► driver task ──► PeerLink ──► MediaTransport
//!                          ▲                             │
//!                          └──── OutboundSignal ◄────────┘
//! ```

pub mod link;
pub mod manager;
pub mod media;
pub mod state;

pub use link::{OutboundSignal, PeerLink};
pub use manager::{PeerEvent, PeerManager};
pub use media::{MediaTransport, MediaTransportFactory, TransportError, TransportEvent, TransportHandle};
pub use state::{NegotiationState, Role, TimingMode};

/// Peer negotiation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Desync or transport failure; the link is now closed
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The link was closed while the operation was pending
    #[error("Peer link closed")]
    Closed,

    /// Operation reserved for the other role
    #[error("Operation not available to the {0:?} role")]
    WrongRole(Role),

    /// Operation not allowed in the current state
    #[error("Operation not allowed while {0}")]
    InvalidState(NegotiationState),

    /// Error reported by the media stack
    #[error("Media transport error: {0}")]
    Transport(#[from] TransportError),
}
