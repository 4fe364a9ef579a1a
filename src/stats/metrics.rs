//! Server-wide counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of the service counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Currently attached connections
    pub active_connections: u64,
    /// Connections refused because of the connection limit
    pub rejected_connections: u64,
    /// Sessions currently live
    pub live_sessions: u64,
    /// Viewers currently watching any session
    pub active_viewers: u64,
    /// Signals delivered to their target
    pub relayed_signals: u64,
    /// Signals dropped (unknown target or full queue)
    pub dropped_signals: u64,
    /// Inbound frames rejected as malformed or oversized
    pub rejected_messages: u64,
    /// Time since the service was created
    pub uptime: Duration,
}

/// Lock-free counters updated by the service and connection tasks
#[derive(Debug)]
pub struct ServerMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    relayed_signals: AtomicU64,
    dropped_signals: AtomicU64,
    rejected_messages: AtomicU64,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            relayed_signals: AtomicU64::new(0),
            dropped_signals: AtomicU64::new(0),
            rejected_messages: AtomicU64::new(0),
        }
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signal_relayed(&self) {
        self.relayed_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signal_dropped(&self) {
        self.dropped_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.rejected_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine the counters with gauges read from the shared state
    pub fn snapshot(&self, active_connections: u64, live_sessions: u64, active_viewers: u64) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections,
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            live_sessions,
            active_viewers,
            relayed_signals: self.relayed_signals.load(Ordering::Relaxed),
            dropped_signals: self.dropped_signals.load(Ordering::Relaxed),
            rejected_messages: self.rejected_messages.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}
