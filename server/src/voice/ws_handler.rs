//! Voice WebSocket Message Handlers
//!
//! Handles voice signaling messages from WebSocket connections.

use tracing::{debug, info};

use voxmesh_common::protocol::{ClientEvent, SignalPayload};
use voxmesh_common::{ConnectionId, ParticipantProfile, RoomId, SessionId, TogglePatch};

use super::directory::{ConnectionDirectory, Relay};
use super::error::VoiceError;
use super::registry::{EventSender, JoinRequest, RoomRegistry};

/// Longest accepted room id, in bytes.
const MAX_ROOM_ID_LEN: usize = 128;

/// Identity of the WebSocket session an event arrived on.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
}

/// Handle a voice-related client event.
pub async fn handle_voice_event(
    registry: &RoomRegistry,
    directory: &ConnectionDirectory,
    session: SessionContext,
    event: ClientEvent,
    tx: &EventSender,
) -> Result<(), VoiceError> {
    match event {
        ClientEvent::JoinVoice {
            room_id,
            participant,
            connection_id,
            muted,
            deafened,
        } => {
            if connection_id != session.connection_id {
                debug!(
                    claimed = %connection_id,
                    assigned = %session.connection_id,
                    "Join names a foreign connection id, using the assigned one"
                );
            }
            handle_join(registry, session, room_id, participant, muted, deafened, tx).await
        }
        ClientEvent::LeaveVoice => {
            registry.leave(session.session_id).await;
            Ok(())
        }
        ClientEvent::UserToggleState(patch) => handle_toggle(registry, session, &patch).await,
        ClientEvent::Signal { to, signal } => {
            handle_signal(directory, session, to, signal, tx).await;
            Ok(())
        }
        ClientEvent::Ping => Ok(()), // Keepalive handled by the socket loop
    }
}

/// Handle a participant joining a voice room.
async fn handle_join(
    registry: &RoomRegistry,
    session: SessionContext,
    room_id: RoomId,
    participant: ParticipantProfile,
    muted: bool,
    deafened: bool,
    tx: &EventSender,
) -> Result<(), VoiceError> {
    let room_id = validate_room_id(room_id)?;

    info!(
        session_id = %session.session_id,
        room_id = %room_id,
        display_name = %participant.display_name,
        "Participant joining voice room"
    );

    let request = JoinRequest {
        room_id,
        participant,
        connection_id: session.connection_id,
        muted,
        deafened,
    };
    registry.join(session.session_id, request, tx.clone()).await;

    Ok(())
}

async fn handle_toggle(
    registry: &RoomRegistry,
    session: SessionContext,
    patch: &TogglePatch,
) -> Result<(), VoiceError> {
    if patch.is_empty() {
        return Err(VoiceError::EmptyPatch);
    }

    if !registry.toggle_state(session.session_id, patch).await {
        debug!(session_id = %session.session_id, "Toggle from session in no room ignored");
    }
    Ok(())
}

async fn handle_signal(
    directory: &ConnectionDirectory,
    session: SessionContext,
    to: ConnectionId,
    signal: SignalPayload,
    tx: &EventSender,
) {
    debug!(from = %session.connection_id, to = %to, "Relaying peer signal");
    if directory.relay(session.connection_id, to, signal, tx).await == Relay::Unavailable {
        info!(
            from = %session.connection_id,
            to = %to,
            "Signal target not connected, sender notified"
        );
    }
}

fn validate_room_id(room_id: RoomId) -> Result<RoomId, VoiceError> {
    let trimmed = room_id.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ROOM_ID_LEN {
        return Err(VoiceError::InvalidRoomId);
    }
    if trimmed.len() == room_id.len() {
        Ok(room_id)
    } else {
        Ok(trimmed.to_string())
    }
}
