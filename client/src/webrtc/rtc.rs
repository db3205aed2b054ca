//! Peer connections on the `webrtc` crate.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder, API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecParameters, RTPCodecType},
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

use voxmesh_common::ConnectionId;

use super::{IceServerConfig, LinkEvent, LinkState, PeerConnector, PeerLink, WebRtcError};
use crate::audio::{new_decoder, AudioOutput, LevelMeter};
use crate::media::{opus_capability, vp8_capability, LocalTracks, MediaKind, RemoteStream, TrackBundle};
use crate::session::{EventSender, SessionEvent};

/// Creates `RTCPeerConnection`s sharing one API instance and one set of local tracks.
pub struct RtcConnector {
    api: Arc<API>,
    config: RTCConfiguration,
    tracks: LocalTracks,
    output: AudioOutput,
    events: EventSender,
}

impl RtcConnector {
    pub fn new(
        ice_servers: &[IceServerConfig],
        tracks: LocalTracks,
        output: AudioOutput,
        events: EventSender,
    ) -> Result<Self, WebRtcError> {
        let mut media_engine = MediaEngine::default();

        // Register Opus codec for audio
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        // Register VP8 codec for screen video
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: vp8_capability(),
                    payload_type: 96,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(ice_servers = ice_servers.len(), "WebRTC connector initialized");

        Ok(Self {
            api: Arc::new(api),
            config: rtc_config(ice_servers),
            tracks,
            output,
            events,
        })
    }

    async fn attach(
        pc: &RTCPeerConnection,
        track: Arc<TrackLocalStaticSample>,
        kind: RTPCodecType,
        send: bool,
    ) -> Result<(), WebRtcError> {
        if !send {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| WebRtcError::TrackError(e.to_string()))?;
            return Ok(());
        }

        let sender = pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| WebRtcError::TrackError(e.to_string()))?;

        // Drain RTCP so interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }
}

impl RtcConnector {
    /// Attach the bundle's tracks, or recvonly transceivers for absent ones.
    async fn attach_bundle(
        &self,
        pc: &RTCPeerConnection,
        bundle: TrackBundle,
    ) -> Result<(), WebRtcError> {
        Self::attach(pc, self.tracks.audio.clone(), RTPCodecType::Audio, bundle.mic).await?;
        Self::attach(pc, self.tracks.video.clone(), RTPCodecType::Video, bundle.screen).await
    }
}

/// Close a half-built connection whose setup failed, passing the error on.
async fn close_on_error(
    pc: &RTCPeerConnection,
    remote: ConnectionId,
    result: Result<(), WebRtcError>,
) -> Result<(), WebRtcError> {
    if result.is_err() {
        if let Err(e) = pc.close().await {
            warn!(remote = %remote, "Error closing half-built peer connection: {}", e);
        }
    }
    result
}

/// Build `RTCConfiguration` from ICE server config.
fn rtc_config(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
    let ice_servers = ice_servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

const fn map_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
        _ => LinkState::Connecting,
    }
}

impl PeerConnector for RtcConnector {
    type Link = RtcLink;

    async fn create(
        &self,
        remote: ConnectionId,
        generation: u64,
        bundle: TrackBundle,
    ) -> Result<RtcLink, WebRtcError> {
        let pc = self
            .api
            .new_peer_connection(self.config.clone())
            .await
            .map_err(|e| WebRtcError::PeerConnectionError(e.to_string()))?;
        let pc = Arc::new(pc);

        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json().map(|init| serde_json::to_string(&init)) {
                    Ok(Ok(candidate)) => {
                        let _ = events.send(SessionEvent::Link(LinkEvent::IceCandidate {
                            remote,
                            generation,
                            candidate,
                        }));
                    }
                    Ok(Err(e)) => warn!("Failed to encode ICE candidate: {}", e),
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let events = self.events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                debug!(remote = %remote, generation, state = %s, "Peer connection state changed");
                let _ = events.send(SessionEvent::Link(LinkEvent::StateChanged {
                    remote,
                    generation,
                    state: map_state(s),
                }));
            })
        }));

        let events = self.events.clone();
        let output = self.output.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let events = events.clone();
                let output = output.clone();
                Box::pin(async move {
                    info!(
                        remote = %remote,
                        "Remote track received: {} ({})",
                        track.kind(),
                        track.codec().capability.mime_type
                    );
                    let stream = spawn_reader(track, output);
                    let _ = events.send(SessionEvent::Link(LinkEvent::RemoteStream {
                        remote,
                        generation,
                        stream,
                    }));
                })
            },
        ));

        let attached = self.attach_bundle(&pc, bundle).await;
        close_on_error(&pc, remote, attached).await?;

        debug!(remote = %remote, generation, ?bundle, "Peer connection created");
        Ok(RtcLink { pc })
    }
}

/// Read an incoming track. Audio is decoded (when this build can), metered
/// and queued for playback; video is drained.
fn spawn_reader(track: Arc<TrackRemote>, output: AudioOutput) -> RemoteStream {
    let meter = LevelMeter::new();

    if track.kind() != RTPCodecType::Audio {
        let reader = tokio::spawn(async move {
            let mut packets = 0u64;
            while track.read_rtp().await.is_ok() {
                packets += 1;
            }
            trace!(packets, "Remote video track ended");
        });
        return RemoteStream::new(MediaKind::Video, meter, reader);
    }

    let reader_meter = meter.clone();
    let reader = tokio::spawn(async move {
        let mut decoder = new_decoder();
        while let Ok((packet, _)) = track.read_rtp().await {
            let Some(decoder) = decoder.as_mut() else {
                continue;
            };
            match decoder.decode(&packet.payload) {
                Ok(pcm) => {
                    reader_meter.measure(&pcm);
                    output.submit(pcm);
                }
                Err(e) => trace!("Dropping undecodable packet: {}", e),
            }
        }
        reader_meter.reset();
        trace!("Remote audio track ended");
    });
    RemoteStream::new(MediaKind::Audio, meter, reader)
}

/// One `RTCPeerConnection`.
pub struct RtcLink {
    pc: Arc<RTCPeerConnection>,
}

impl PeerLink for RtcLink {
    async fn create_offer(&self) -> Result<String, WebRtcError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, WebRtcError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), WebRtcError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), WebRtcError> {
        let init: RTCIceCandidateInit =
            serde_json::from_str(candidate).map_err(|e| WebRtcError::IceError(e.to_string()))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| WebRtcError::IceError(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer connection: {}", e);
        }
    }
}
