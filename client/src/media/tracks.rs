//! Local sample tracks shared by every peer connection, and the pumps that
//! feed captured frames into them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::MediaFrame;
use crate::session::{EventSender, SessionEvent};

/// Opus capability used for the microphone track.
#[must_use]
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// VP8 capability used for the screen track.
#[must_use]
pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Outgoing tracks. One instance per participant, bound to every connection.
#[derive(Clone)]
pub struct LocalTracks {
    pub audio: Arc<TrackLocalStaticSample>,
    pub video: Arc<TrackLocalStaticSample>,
}

impl LocalTracks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            audio: Arc::new(TrackLocalStaticSample::new(
                opus_capability(),
                "audio".to_string(),
                "voxmesh-mic".to_string(),
            )),
            video: Arc::new(TrackLocalStaticSample::new(
                vp8_capability(),
                "video".to_string(),
                "voxmesh-screen".to_string(),
            )),
        }
    }
}

impl Default for LocalTracks {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed microphone frames into the audio track. Frames are dropped while `muted`.
pub(crate) fn spawn_mic_pump(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<MediaFrame>,
    muted: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if muted.load(Ordering::Relaxed) {
                continue;
            }
            write(&track, frame).await;
        }
        debug!("Microphone capture ended");
    })
}

/// Feed display frames into the video track.
///
/// When the backend closes the frame channel the session is told which
/// capture generation ended.
pub(crate) fn spawn_screen_pump(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<MediaFrame>,
    generation: u64,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            write(&track, frame).await;
        }
        debug!(generation, "Display capture ended");
        let _ = events.send(SessionEvent::ScreenCaptureEnded { generation });
    })
}

async fn write(track: &TrackLocalStaticSample, frame: MediaFrame) {
    let sample = Sample {
        data: frame.data,
        duration: frame.duration,
        ..Default::default()
    };
    if let Err(e) = track.write_sample(&sample).await {
        warn!("Failed to write sample: {}", e);
    }
}
