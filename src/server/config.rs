//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 3001;

/// Default per-connection outbound queue capacity
pub const DEFAULT_OUTBOUND_QUEUE: usize = 128;

/// Default limit for a single inbound frame
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Outbound messages buffered per connection before new ones are dropped
    pub outbound_queue: usize,

    /// Largest accepted inbound text frame in bytes
    pub max_message_size: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Signaling is latency bound
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection outbound queue capacity (minimum 1)
    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }

    /// Set the inbound frame size limit
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the WebSocket handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Toggle TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 4001);
    }

    #[test]
    fn test_builder_outbound_queue_floor() {
        let config = ServerConfig::default().outbound_queue(0);

        assert_eq!(config.outbound_queue, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:3001".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .outbound_queue(16)
            .max_message_size(1024)
            .handshake_timeout(Duration::from_secs(2))
            .tcp_nodelay(false);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.outbound_queue, 16);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert!(!config.tcp_nodelay);
    }
}
