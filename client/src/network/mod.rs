//! Network
//!
//! Signaling transport and ICE configuration fetch.

mod ice;
mod websocket;

use thiserror::Error;

pub use ice::{fetch_ice_servers, ice_servers_or_stun};
pub use websocket::{ConnectionStatus, SignalingClient, SignalingEvent};

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}
