//! voxmesh Client - Headless Entry Point
//!
//! Joins the configured room and logs voice state changes until Ctrl-C.

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use voxmesh_client::audio::AudioOutput;
use voxmesh_client::media::LocalTracks;
use voxmesh_client::network::{ice_servers_or_stun, SignalingClient};
use voxmesh_client::session::{self, SessionSetup, VoiceSession, VoiceView};
use voxmesh_client::webrtc::RtcConnector;
use voxmesh_client::ClientConfig;
use voxmesh_common::ParticipantProfile;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxmesh_client=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;
    let http_url = config.http_url()?;
    let ws_url = config.ws_url()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %http_url,
        room = %config.room_id,
        "voxmesh client starting"
    );

    let ice_servers = ice_servers_or_stun(&http_url, &config.stun_server).await;

    #[cfg(feature = "native-audio")]
    let (output, _playback) = match voxmesh_client::audio::native::start_playback() {
        Ok((output, playback)) => (output, Some(playback)),
        Err(e) => {
            warn!("Playback unavailable: {}", e);
            (AudioOutput::detached(), None)
        }
    };
    #[cfg(not(feature = "native-audio"))]
    let output = AudioOutput::detached();

    #[cfg(feature = "native-audio")]
    let backend = voxmesh_client::audio::native::NativeBackend;
    #[cfg(not(feature = "native-audio"))]
    let backend = voxmesh_client::media::SilenceBackend;

    let (events, inbox) = session::event_channel();
    let tracks = LocalTracks::new();
    let connector = RtcConnector::new(&ice_servers, tracks.clone(), output.clone(), events.clone())?;
    let mut signaling = SignalingClient::connect(ws_url, events.clone());

    let setup = SessionSetup {
        profile: ParticipantProfile {
            id: Uuid::new_v4(),
            display_name: config.display_name.clone(),
            avatar_url: None,
        },
        backend,
        connector,
        tracks,
        output,
        signal_tx: signaling.sender(),
    };
    let session = VoiceSession::spawn(&config, setup, events, inbox);

    let joined = session.join(config.room_id.clone()).await?;
    if let Some(e) = &joined.degraded {
        warn!("Joined {} without microphone: {}", joined.room_id, e);
    }

    let mut view = session.subscribe();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                log_view(&snapshot);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Received shutdown signal, leaving room...");
                break;
            }
        }
    }

    session.shutdown().await;
    signaling.disconnect().await;
    info!("Client shutdown complete");

    Ok(())
}

fn log_view(view: &VoiceView) {
    let speaking: Vec<&str> = view
        .roster
        .iter()
        .filter(|p| view.is_speaking(p.connection_id))
        .map(|p| p.profile.display_name.as_str())
        .collect();

    info!(
        signaling = ?view.signaling,
        room = view.room_id.as_deref().unwrap_or("-"),
        participants = view.roster.len(),
        peers = view.peers.len(),
        muted = view.local.muted,
        deafened = view.local.deafened,
        sharing = view.local.screen_sharing,
        speaking = ?speaking,
        error = view.last_error.as_deref().unwrap_or(""),
        "Voice state"
    );
}
