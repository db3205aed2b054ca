//! Shared Types

mod participant;
mod quality;

pub use participant::{ParticipantInfo, ParticipantProfile, TogglePatch, ToggleState};
pub use quality::Quality;

use uuid::Uuid;

/// Identifier of one authenticated transport session, assigned by the server.
pub type SessionId = Uuid;

/// Identifier counterparts use to address a participant during connection setup.
pub type ConnectionId = Uuid;

/// Identifier of the external identity behind a participant.
pub type ParticipantId = Uuid;

/// Name of a voice room.
pub type RoomId = String;
