//! Signaling coordination for live peer-to-peer broadcast sessions
//!
//! A broadcaster announces a live session, viewers discover it and join,
//! and the two sides exchange negotiation payloads through the server until
//! a direct media link exists. Media never passes through here.
//!
//! # Example
//!
//! ```no_run
//! use livesignal::server::{ServerConfig, SignalingServer};
//!
//! #[tokio::main]
//! async fn main() -> livesignal::error::Result<()> {
//!     let config = ServerConfig::default();
//!     let server = SignalingServer::new(config);
//!
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```
//!
//! Client side, [`client::SignalingClient`] speaks the wire protocol and
//! [`peer::PeerManager`] keeps one negotiation per remote counterpart.

pub mod client;
pub mod error;
pub mod membership;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;

pub use client::SignalingClient;
pub use error::{Error, Result};
pub use peer::{NegotiationState, PeerLink, PeerManager, Role, TimingMode};
pub use protocol::{ClientMessage, ConnectionId, ServerMessage, SessionId};
pub use server::{ServerConfig, SignalingServer, SignalingService};
