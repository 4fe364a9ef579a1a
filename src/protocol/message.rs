//! Signaling messages exchanged between a connection and the service
//!
//! Every message is one JSON object per WebSocket text frame, tagged by a
//! kebab-case `type` field. The `signal` body is opaque at this layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::{ConnectionId, SessionId};

/// Messages a connection sends to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Register (or take over) a live session owned by the sender
    #[serde(rename_all = "camelCase")]
    StartSession {
        session_id: SessionId,
        #[serde(default)]
        metadata: Value,
    },

    /// End a session owned by the sender
    #[serde(rename_all = "camelCase")]
    EndSession { session_id: SessionId },

    /// Start watching a session
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: SessionId },

    /// Stop watching whatever session the sender is watching
    LeaveSession,

    /// Relay an opaque negotiation payload to another connection
    Signal { to: ConnectionId, signal: Value },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::StartSession { .. } => "start-session",
            ClientMessage::EndSession { .. } => "end-session",
            ClientMessage::JoinSession { .. } => "join-session",
            ClientMessage::LeaveSession => "leave-session",
            ClientMessage::Signal { .. } => "signal",
        }
    }
}

/// One live session as published in `sessions-updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner_id: ConnectionId,
    #[serde(default)]
    pub metadata: Value,
}

/// Messages the service sends to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: ConnectionId },

    /// Full snapshot of the live sessions
    SessionsUpdated { sessions: Vec<SessionInfo> },

    /// Sent to a session owner when a viewer joins
    #[serde(rename_all = "camelCase")]
    ViewerJoined {
        viewer_id: ConnectionId,
        session_id: SessionId,
        viewer_count: usize,
    },

    /// Sent to a session owner when a viewer leaves or disconnects
    #[serde(rename_all = "camelCase")]
    ViewerLeft {
        viewer_id: ConnectionId,
        session_id: SessionId,
        viewer_count: usize,
    },

    /// Sent to every member of a session that went away
    #[serde(rename_all = "camelCase")]
    SessionEnded { session_id: SessionId },

    /// Relayed negotiation payload
    Signal { from: ConnectionId, signal: Value },

    /// Sent only to the connection whose input was rejected
    Error { message: String },
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::SessionsUpdated { .. } => "sessions-updated",
            ServerMessage::ViewerJoined { .. } => "viewer-joined",
            ServerMessage::ViewerLeft { .. } => "viewer-left",
            ServerMessage::SessionEnded { .. } => "session-ended",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_start_session() {
        let msg = ClientMessage::from_json(
            r#"{"type":"start-session","sessionId":"s1","metadata":{"title":"Hello"}}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::StartSession {
                session_id: SessionId::from("s1"),
                metadata: json!({"title": "Hello"}),
            }
        );
    }

    #[test]
    fn test_start_session_metadata_optional() {
        let msg = ClientMessage::from_json(r#"{"type":"start-session","sessionId":"s1"}"#).unwrap();
        match msg {
            ClientMessage::StartSession { metadata, .. } => assert!(metadata.is_null()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_leave_and_signal() {
        let leave = ClientMessage::from_json(r#"{"type":"leave-session"}"#).unwrap();
        assert_eq!(leave, ClientMessage::LeaveSession);

        let signal = ClientMessage::from_json(
            r#"{"type":"signal","to":"peer-b","signal":{"anything":[1,2,3]}}"#,
        )
        .unwrap();
        assert_eq!(signal.kind(), "signal");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"stream-start","sessionId":"s1"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let msg = ServerMessage::ViewerJoined {
            viewer_id: ConnectionId::from("b"),
            session_id: SessionId::from("s1"),
            viewer_count: 1,
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "viewer-joined", "viewerId": "b", "sessionId": "s1", "viewerCount": 1})
        );
    }

    #[test]
    fn test_sessions_updated_shape() {
        let msg = ServerMessage::SessionsUpdated {
            sessions: vec![SessionInfo {
                id: SessionId::from("s1"),
                owner_id: ConnectionId::from("a"),
                metadata: json!({"title": "t"}),
            }],
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "sessions-updated");
        assert_eq!(value["sessions"][0]["ownerId"], "a");
    }
}
