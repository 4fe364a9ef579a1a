//! Wire protocol
//!
//! - Connection and session identifiers
//! - Client/server signaling messages
//! - Typed negotiation payloads carried inside `signal`

pub mod id;
pub mod message;
pub mod negotiation;

pub use id::{ConnectionId, SessionId};
pub use message::{ClientMessage, ServerMessage, SessionInfo};
pub use negotiation::{IceCandidate, NegotiationPayload, SessionDescription};
