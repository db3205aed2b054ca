//! Voice Service Errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use voxmesh_common::RoomId;

/// Errors that can occur during voice operations.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Room id is empty or too long.
    #[error("Invalid room id")]
    InvalidRoomId,

    /// Client sent a frame that is not a known event.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Toggle with no fields.
    #[error("Toggle patch is empty")]
    EmptyPatch,
}

impl VoiceError {
    /// Stable machine-readable code, shared by HTTP bodies and `error` events.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "ROOM_NOT_FOUND",
            Self::InvalidRoomId => "INVALID_ROOM_ID",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::EmptyPatch => "EMPTY_PATCH",
        }
    }
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::RoomNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::InvalidRoomId | Self::MalformedEvent(_) | Self::EmptyPatch => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<voxmesh_common::Error> for VoiceError {
    fn from(err: voxmesh_common::Error) -> Self {
        Self::MalformedEvent(err.to_string())
    }
}
