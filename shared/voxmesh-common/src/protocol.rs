//! Signaling Protocol
//!
//! JSON text frames exchanged over the signaling WebSocket. Every frame is an
//! object whose `type` field names the event.

use serde::{Deserialize, Serialize};

use crate::types::{
    ConnectionId, ParticipantInfo, ParticipantProfile, RoomId, SessionId, TogglePatch,
};
use crate::Result;

/// Client-to-server events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Keepalive.
    Ping,
    /// Join a voice room, leaving any other room first.
    JoinVoice {
        room_id: RoomId,
        participant: ParticipantProfile,
        connection_id: ConnectionId,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        deafened: bool,
    },
    /// Leave whatever room the session is in.
    LeaveVoice,
    /// Merge toggle changes into the session's participant record.
    UserToggleState(TogglePatch),
    /// Relay a peer signal to another connection.
    Signal {
        to: ConnectionId,
        signal: SignalPayload,
    },
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Session opened; `connection_id` is the address counterparts will use.
    Ready {
        session_id: SessionId,
        connection_id: ConnectionId,
    },
    /// Keepalive response.
    Pong,
    /// Authoritative roster of a room.
    RosterUpdate {
        room_id: RoomId,
        participants: Vec<ParticipantInfo>,
    },
    /// A participant joined a room the receiver was already in.
    NewParticipant { connection_id: ConnectionId },
    /// A participant left a room the receiver is still in.
    ParticipantLeft { connection_id: ConnectionId },
    /// A peer signal relayed from another connection.
    Signal {
        from: ConnectionId,
        signal: SignalPayload,
    },
    /// The target of a relayed signal is not connected.
    PeerUnavailable { connection_id: ConnectionId },
    /// A request was rejected.
    Error { code: String, message: String },
}

/// Offer/answer/ICE payload carried between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    /// JSON-encoded ICE candidate init.
    IceCandidate { candidate: String },
}

impl ClientEvent {
    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build an error event from a code and message.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn join_voice_wire_shape() {
        let text = r#"{
            "type": "join-voice",
            "room_id": "voice-1",
            "participant": {"id": "00000000-0000-0000-0000-000000000001", "display_name": "A"},
            "connection_id": "00000000-0000-0000-0000-000000000002"
        }"#;

        match ClientEvent::from_json(text).unwrap() {
            ClientEvent::JoinVoice {
                room_id,
                participant,
                muted,
                deafened,
                ..
            } => {
                assert_eq!(room_id, "voice-1");
                assert_eq!(participant.display_name, "A");
                assert!(!muted && !deafened);
            }
            other => panic!("Expected JoinVoice, got {other:?}"),
        }
    }

    #[test]
    fn toggle_state_is_flat() {
        let event = ClientEvent::UserToggleState(TogglePatch::muted(true));
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":"user-toggle-state","muted":true}"#
        );

        let parsed = ClientEvent::from_json(r#"{"type":"user-toggle-state","deafened":false}"#)
            .unwrap();
        assert_eq!(parsed, ClientEvent::UserToggleState(TogglePatch::deafened(false)));
    }

    #[test]
    fn server_event_names() {
        let id = Uuid::nil();
        let cases = [
            (ServerEvent::NewParticipant { connection_id: id }, "new-participant"),
            (ServerEvent::ParticipantLeft { connection_id: id }, "participant-left"),
            (ServerEvent::PeerUnavailable { connection_id: id }, "peer-unavailable"),
            (
                ServerEvent::RosterUpdate {
                    room_id: "r".into(),
                    participants: vec![],
                },
                "roster-update",
            ),
        ];

        for (event, name) in cases {
            let json: serde_json::Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], name);
        }
    }

    #[test]
    fn signal_payload_tagged_by_kind() {
        let event = ServerEvent::Signal {
            from: Uuid::nil(),
            signal: SignalPayload::Answer { sdp: "v=0".into() },
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signal");
        assert_eq!(json["signal"]["kind"], "answer");
        assert_eq!(json["signal"]["sdp"], "v=0");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ClientEvent::from_json("{\"type\":\"dance\"}").is_err());
        assert!(ServerEvent::from_json("not json").is_err());
    }
}
