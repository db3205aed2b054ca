//! WebRTC Client
//!
//! The seam between the peer connection broker and the WebRTC stack.
//! [`PeerConnector`] creates one [`PeerLink`] per counterpart; link activity
//! (local ICE candidates, state changes, incoming tracks) is reported to the
//! session queue as [`LinkEvent`]s tagged with the link's generation.

mod rtc;

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

use voxmesh_common::ConnectionId;

use crate::media::{RemoteStream, TrackBundle};

pub use rtc::{RtcConnector, RtcLink};

/// WebRTC errors
#[derive(Error, Debug)]
pub enum WebRtcError {
    #[error("WebRTC API error: {0}")]
    ApiError(String),
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),
    #[error("SDP error: {0}")]
    SdpError(String),
    #[error("ICE error: {0}")]
    IceError(String),
    #[error("Track error: {0}")]
    TrackError(String),
    #[error("Signaling unavailable")]
    SignalingClosed,
    #[error("Peer {0} is not connected to the server")]
    PeerUnavailable(ConnectionId),
}

/// Connection state reported by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// STUN-only entry.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self::stun("stun:stun.l.google.com:19302")
    }
}

/// Activity of one link, tagged with the generation it was created with.
#[derive(Debug)]
pub enum LinkEvent {
    /// A local ICE candidate (JSON of an ICE candidate init) to send to the remote.
    IceCandidate {
        remote: ConnectionId,
        generation: u64,
        candidate: String,
    },
    StateChanged {
        remote: ConnectionId,
        generation: u64,
        state: LinkState,
    },
    RemoteStream {
        remote: ConnectionId,
        generation: u64,
        stream: RemoteStream,
    },
}

/// Creates peer connections.
pub trait PeerConnector: Send + 'static {
    type Link: PeerLink;

    /// Create a connection to `remote` carrying `bundle`.
    fn create(
        &self,
        remote: ConnectionId,
        generation: u64,
        bundle: TrackBundle,
    ) -> impl Future<Output = Result<Self::Link, WebRtcError>> + Send;
}

/// One peer connection.
pub trait PeerLink: Send + Sync + 'static {
    /// Create an offer and apply it locally. Returns the offer SDP.
    fn create_offer(&self) -> impl Future<Output = Result<String, WebRtcError>> + Send;

    /// Apply a remote offer and answer it. Returns the answer SDP.
    fn accept_offer(&self, sdp: &str) -> impl Future<Output = Result<String, WebRtcError>> + Send;

    /// Apply the remote answer to our offer.
    fn accept_answer(&self, sdp: &str) -> impl Future<Output = Result<(), WebRtcError>> + Send;

    /// Add a remote ICE candidate (JSON of an ICE candidate init).
    fn add_ice_candidate(
        &self,
        candidate: &str,
    ) -> impl Future<Output = Result<(), WebRtcError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}
