//! Signaling relay
//!
//! Pass-through delivery of negotiation payloads between two connections.
//! The payload is never inspected here; its structure belongs to
//! [`crate::peer`]. Undeliverable payloads are dropped: a failed negotiation
//! is recovered by the peers starting a fresh one, not by durable delivery.

pub mod hub;

pub use hub::{ConnectionHub, Delivery};

use serde_json::Value;

use crate::protocol::{ConnectionId, ServerMessage};

/// Deliver `payload` verbatim to `to`, tagged with the sender
pub fn relay(hub: &ConnectionHub, from: &ConnectionId, to: &ConnectionId, payload: Value) -> Delivery {
    let delivery = hub.send(
        to,
        ServerMessage::Signal {
            from: from.clone(),
            signal: payload,
        },
    );

    if delivery.is_delivered() {
        tracing::debug!(from = %from, to = %to, "Signal relayed");
    } else {
        tracing::debug!(from = %from, to = %to, outcome = ?delivery, "Signal dropped");
    }

    delivery
}
