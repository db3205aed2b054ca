//! Participant Types

use serde::{Deserialize, Serialize};

use super::{ConnectionId, ParticipantId};

/// Identity and display metadata supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    /// Participant ID.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Avatar image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Live toggle state of a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleState {
    /// Outgoing microphone audio is disabled.
    pub muted: bool,
    /// Local playback of incoming audio is silenced.
    pub deafened: bool,
    /// A screen video track is being sent.
    #[serde(default)]
    pub screen_sharing: bool,
}

impl ToggleState {
    /// Merge a partial update. Absent fields keep their value.
    pub fn apply(&mut self, patch: &TogglePatch) {
        if let Some(muted) = patch.muted {
            self.muted = muted;
        }
        if let Some(deafened) = patch.deafened {
            self.deafened = deafened;
        }
        if let Some(screen_sharing) = patch.screen_sharing {
            self.screen_sharing = screen_sharing;
        }
    }
}

/// Partial toggle update sent by the owning session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TogglePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deafened: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_sharing: Option<bool>,
}

impl TogglePatch {
    /// Patch that only changes `muted`.
    #[must_use]
    pub const fn muted(muted: bool) -> Self {
        Self {
            muted: Some(muted),
            deafened: None,
            screen_sharing: None,
        }
    }

    /// Patch that only changes `deafened`.
    #[must_use]
    pub const fn deafened(deafened: bool) -> Self {
        Self {
            muted: None,
            deafened: Some(deafened),
            screen_sharing: None,
        }
    }

    /// Patch that only changes `screen_sharing`.
    #[must_use]
    pub const fn screen_sharing(screen_sharing: bool) -> Self {
        Self {
            muted: None,
            deafened: None,
            screen_sharing: Some(screen_sharing),
        }
    }

    /// True if the patch carries no field.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.muted.is_none() && self.deafened.is_none() && self.screen_sharing.is_none()
    }
}

/// One roster entry as seen by every member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    #[serde(flatten)]
    pub profile: ParticipantProfile,
    /// Address used by counterparts for connection setup.
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub state: ToggleState,
}
