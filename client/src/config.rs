//! Client Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling server base URL (e.g., "http://localhost:8080")
    pub server_url: String,

    /// Fallback STUN server when the server's ICE list cannot be fetched
    pub stun_server: String,

    /// Delay before the single retry of a call to a just-joined participant
    pub newcomer_retry: Duration,

    /// RMS level above which a stream counts as speaking
    pub speaking_threshold: f32,

    /// Speaking detector sampling interval
    pub speaking_interval: Duration,

    /// Display name announced on join (headless client)
    pub display_name: String,

    /// Room joined at startup (headless client)
    pub room_id: String,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let server_url = env::var("VOXMESH_SERVER_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into());
        Url::parse(&server_url).context("VOXMESH_SERVER_URL must be a URL")?;

        let speaking_threshold = env::var("VOXMESH_SPEAKING_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.02);
        if !(0.0..=1.0).contains(&speaking_threshold) {
            anyhow::bail!("VOXMESH_SPEAKING_THRESHOLD must be between 0 and 1");
        }

        Ok(Self {
            server_url,
            stun_server: env::var("VOXMESH_STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            newcomer_retry: Duration::from_millis(
                env::var("VOXMESH_NEWCOMER_RETRY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            speaking_threshold,
            speaking_interval: Duration::from_millis(
                env::var("VOXMESH_SPEAKING_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|ms: &u64| *ms > 0)
                    .unwrap_or(50),
            ),
            display_name: env::var("VOXMESH_DISPLAY_NAME").unwrap_or_else(|_| "guest".into()),
            room_id: env::var("VOXMESH_ROOM").unwrap_or_else(|_| "lobby".into()),
        })
    }

    /// HTTP base URL of the server.
    pub fn http_url(&self) -> Result<Url> {
        Url::parse(&self.server_url).context("invalid server URL")
    }

    /// Signaling WebSocket URL (`ws[s]://host/ws`).
    pub fn ws_url(&self) -> Result<Url> {
        let mut url = self.http_url()?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow::anyhow!("cannot use {scheme} for {}", self.server_url))?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url)
    }

    /// Configuration for tests: short timers, local server.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            stun_server: "stun:stun.l.google.com:19302".into(),
            newcomer_retry: Duration::from_millis(20),
            speaking_threshold: 0.02,
            speaking_interval: Duration::from_millis(5),
            display_name: "tester".into(),
            room_id: "lobby".into(),
        }
    }
}
