//! Voice HTTP Handlers
//!
//! HTTP endpoints for voice-related operations.
//! Voice signaling (join/leave/toggle/signal) is handled via WebSocket.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use voxmesh_common::{ParticipantInfo, RoomId};

use super::error::VoiceError;
use crate::api::AppState;

/// ICE server configuration.
#[derive(Debug, Serialize)]
pub struct IceServer {
    /// Server URLs (e.g., "stun:stun.l.google.com:19302")
    pub urls: Vec<String>,
    /// Username for TURN servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Response containing ICE server configuration.
#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    /// List of ICE servers to use for WebRTC.
    pub ice_servers: Vec<IceServer>,
}

/// Roster snapshot of one room.
#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room_id: RoomId,
    pub participants: Vec<ParticipantInfo>,
}

/// Get ICE server configuration.
///
/// GET /api/voice/ice-servers
///
/// Returns STUN and TURN server configuration for peer connections.
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let mut servers = vec![IceServer {
        urls: vec![state.config.stun_server.clone()],
        username: None,
        credential: None,
    }];

    // Add TURN server if configured
    if let Some(turn) = &state.config.turn_server {
        servers.push(IceServer {
            urls: vec![turn.clone()],
            username: state.config.turn_username.clone(),
            credential: state.config.turn_credential.clone(),
        });
    }

    Json(IceServersResponse {
        ice_servers: servers,
    })
}

/// Get the roster of a room.
///
/// GET /api/voice/rooms/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<RoomResponse>, VoiceError> {
    let participants = state
        .registry
        .roster(&room_id)
        .await
        .ok_or_else(|| VoiceError::RoomNotFound(room_id.clone()))?;

    Ok(Json(RoomResponse {
        room_id,
        participants,
    }))
}
