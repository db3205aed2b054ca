//! Voice Rooms
//!
//! Room registry, peer signal relay and the HTTP voice routes. Media flows
//! directly between participants; the server only carries signaling.

pub mod directory;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod ws_handler;

use axum::routing::get;
use axum::Router;

use crate::api::AppState;

pub use directory::{ConnectionDirectory, Relay};
pub use error::VoiceError;
pub use registry::{Departure, EventSender, JoinOutcome, JoinRequest, Room, RoomRegistry};
pub use ws_handler::{handle_voice_event, SessionContext};

/// Create voice router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ice-servers", get(handlers::get_ice_servers))
        .route("/rooms/{room_id}", get(handlers::get_room))
}
