//! Error types
//!
//! Server-side failures are always scoped to a single connection; nothing in
//! here is fatal to the process except a failed bind.

use crate::registry::RegistryError;

/// Result alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket framing or handshake failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session registry rejected an operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The signaling connection is gone
    #[error("Not connected")]
    NotConnected,

    /// Inbound frame exceeded the configured size limit
    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },
}

impl Error {
    /// Whether the error only concerns the remote end going away
    pub fn is_disconnect(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            Error::NotConnected => true,
            Error::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MessageTooLarge {
            size: 70_000,
            limit: 65_536,
        };
        assert_eq!(
            err.to_string(),
            "Message too large: 70000 bytes (limit 65536)"
        );
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::NotConnected.is_disconnect());

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(Error::from(reset).is_disconnect());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::from(other).is_disconnect());
    }
}
