//! ICE server configuration from the signaling server.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::NetworkError;
use crate::webrtc::IceServerConfig;

#[derive(Debug, Deserialize)]
struct IceServersResponse {
    ice_servers: Vec<IceServerConfig>,
}

/// GET `/api/voice/ice-servers`.
pub async fn fetch_ice_servers(server_url: &Url) -> Result<Vec<IceServerConfig>, NetworkError> {
    let url = server_url.join("/api/voice/ice-servers")?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response: IceServersResponse = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    debug!(count = response.ice_servers.len(), "Fetched ICE servers");
    Ok(response.ice_servers)
}

/// Fetch ICE servers, falling back to a single STUN server.
pub async fn ice_servers_or_stun(server_url: &Url, stun: &str) -> Vec<IceServerConfig> {
    match fetch_ice_servers(server_url).await {
        Ok(servers) if !servers.is_empty() => servers,
        Ok(_) => vec![IceServerConfig::stun(stun)],
        Err(e) => {
            warn!("Failed to fetch ICE servers, using {}: {}", stun, e);
            vec![IceServerConfig::stun(stun)]
        }
    }
}
