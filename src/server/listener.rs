//! Signaling server listener
//!
//! Handles the TCP accept loop and spawns one task per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::service::SignalingService;

/// WebSocket signaling server
pub struct SignalingServer {
    config: ServerConfig,
    service: Arc<SignalingService>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl SignalingServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let service = Arc::new(SignalingService::with_outbound_queue(config.outbound_queue));
        Self::with_service(config, service)
    }

    /// Create a server around an existing service instance
    pub fn with_service(config: ServerConfig, service: Arc<SignalingService>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            service,
            connection_semaphore,
        }
    }

    /// Get a reference to the signaling service
    pub fn service(&self) -> &Arc<SignalingService> {
        &self.service
    }

    /// Run the server
    ///
    /// This method blocks until the accept loop fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Signaling server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Signaling server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit; the permit lives as long as the connection task
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    self.service.metrics().connection_rejected();
                    return;
                }
            }
        } else {
            None
        };

        tracing::debug!(peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let service = Arc::clone(&self.service);

        tokio::spawn(async move {
            let _permit = permit;
            let connection = Connection::new(socket, peer_addr, config, service);

            if let Err(e) = connection.run().await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }

            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
