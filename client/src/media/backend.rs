//! Capture backend for builds without a system audio stack.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use voxmesh_common::Quality;

use super::{CaptureGuard, MediaBackend, MediaError, MediaFrame};
use crate::audio::{LevelMeter, FRAME_SIZE_MS};

/// One 20 ms Opus frame of digital silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Sends Opus silence as the microphone so peers still negotiate an audio
/// track. Display capture is not available.
#[derive(Debug, Default)]
pub struct SilenceBackend;

impl MediaBackend for SilenceBackend {
    fn open_microphone(
        &mut self,
        frames: mpsc::Sender<MediaFrame>,
        meter: LevelMeter,
    ) -> Result<CaptureGuard, MediaError> {
        meter.reset();
        let frame_duration = Duration::from_millis(FRAME_SIZE_MS as u64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            loop {
                ticker.tick().await;
                let frame = MediaFrame {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: frame_duration,
                };
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("Silence source stopped");
        });

        Ok(CaptureGuard::new(move || task.abort()))
    }

    fn open_display(
        &mut self,
        _quality: Quality,
        _frames: mpsc::Sender<MediaFrame>,
    ) -> Result<CaptureGuard, MediaError> {
        Err(MediaError::Unsupported("display capture"))
    }
}
