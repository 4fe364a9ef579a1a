//! Signaling server
//!
//! - `service`: connection lifecycle and event dispatch over shared state
//! - `connection`: per-socket WebSocket loop
//! - `listener`: TCP accept loop with connection limit

pub mod config;
pub mod connection;
pub mod listener;
pub mod service;

pub use config::ServerConfig;
pub use listener::SignalingServer;
pub use service::SignalingService;
