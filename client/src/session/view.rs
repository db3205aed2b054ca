//! Render state of a voice session.

use std::collections::{HashMap, HashSet};

use voxmesh_common::{ConnectionId, ParticipantInfo, RoomId, ToggleState};

use crate::broker::PeerState;
use crate::network::ConnectionStatus;

/// Snapshot handed to renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceView {
    pub signaling: ConnectionStatus,
    /// Our connection id once the server announced it.
    pub connection_id: Option<ConnectionId>,
    /// Room we are in (or will rejoin once signaling is back).
    pub room_id: Option<RoomId>,
    /// Latest roster from the server, in join order.
    pub roster: Vec<ParticipantInfo>,
    /// Counterparts currently speaking.
    pub speaking: HashSet<ConnectionId>,
    pub local_speaking: bool,
    pub peers: HashMap<ConnectionId, PeerState>,
    pub local: ToggleState,
    /// Microphone capture is running.
    pub microphone: bool,
    pub last_error: Option<String>,
}

impl VoiceView {
    pub fn is_speaking(&self, connection_id: ConnectionId) -> bool {
        if Some(connection_id) == self.connection_id {
            return self.local_speaking;
        }
        self.speaking.contains(&connection_id)
    }

    pub fn participant(&self, connection_id: ConnectionId) -> Option<&ParticipantInfo> {
        self.roster
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn peer_state(&self, connection_id: ConnectionId) -> Option<PeerState> {
        self.peers.get(&connection_id).copied()
    }
}
