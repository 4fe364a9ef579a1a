//! Statistics for the signaling service

pub mod metrics;

pub use metrics::{ServerMetrics, ServerStats};
