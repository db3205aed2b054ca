//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::State, http::HeaderValue, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    config::Config,
    voice::{self, ConnectionDirectory, RoomRegistry},
    ws,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Voice room registry
    pub registry: Arc<RoomRegistry>,
    /// Live signaling connections
    pub directory: Arc<ConnectionDirectory>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(RoomRegistry::new()),
            directory: Arc::new(ConnectionDirectory::new()),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Voice routes
        .nest("/api/voice", voice::router())
        // WebSocket
        .route("/ws", get(ws::handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = match &config.cors_allowed_origins {
        Some(origins) => AllowOrigin::list(origins.iter().filter_map(|o| {
            HeaderValue::from_str(o)
                .inspect_err(|_| warn!(origin = %o, "Ignoring invalid CORS origin"))
                .ok()
        })),
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Rooms created since start
    rooms: usize,
    /// Open signaling connections
    connections: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: state.registry.room_count().await,
        connections: state.directory.len(),
    })
}
