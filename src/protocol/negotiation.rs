//! Typed negotiation payloads
//!
//! The relay forwards `signal` bodies untouched; only peer links decode them
//! into [`NegotiationPayload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One possible network path for the direct peer transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Offer or answer body
///
/// `candidates` is only populated in bundled mode, where gathering finishes
/// before the description is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<IceCandidate>,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            candidates: Vec::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Payload of a `signal` message as understood by a peer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NegotiationPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl NegotiationPayload {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationPayload::Offer(_) => "offer",
            NegotiationPayload::Answer(_) => "answer",
            NegotiationPayload::Candidate(_) => "candidate",
        }
    }
}
