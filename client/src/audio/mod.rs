//! Audio Input/Output
//!
//! Level metering, the playback gate used by deafen, and the decoder seam for
//! incoming Opus streams. The system audio stack (cpal + opus) lives in
//! [`native`] behind the `native-audio` feature.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[cfg(feature = "native-audio")]
pub mod native;

/// Audio configuration constants
pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u16 = 2;
pub const FRAME_SIZE_MS: usize = 20;
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize * FRAME_SIZE_MS) / 1000; // 960 samples per channel

/// Audio errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,
    #[error("No output device available")]
    NoOutputDevice,
    #[error("Opus encoder error: {0}")]
    EncoderError(String),
    #[error("Opus decoder error: {0}")]
    DecoderError(String),
}

/// Root-mean-square energy of a block of samples in `[-1, 1]`.
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|&s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Latest short-time RMS level of one audio stream.
///
/// Written from the audio path, read by the speaking detector.
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the level of the latest frame.
    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Store the RMS of `samples`.
    pub fn measure(&self, samples: &[f32]) {
        self.set(rms(samples));
    }

    #[must_use]
    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Local playback of incoming audio, gated by the deafen toggle.
///
/// Cloned into every remote stream reader; all clones share the gate.
#[derive(Debug, Clone, Default)]
pub struct AudioOutput {
    deafened: Arc<AtomicBool>,
    sink: Option<mpsc::Sender<Vec<f32>>>,
}

impl AudioOutput {
    /// Output without a playback device. Frames are metered and discarded.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Output feeding a playback task.
    #[must_use]
    pub fn with_sink(sink: mpsc::Sender<Vec<f32>>) -> Self {
        Self {
            deafened: Arc::new(AtomicBool::new(false)),
            sink: Some(sink),
        }
    }

    /// Set deafened state. Does not touch outgoing audio.
    pub fn set_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::Relaxed);
        debug!("Deafened: {}", deafened);
    }

    #[must_use]
    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::Relaxed)
    }

    /// Queue decoded PCM for playback. Returns `false` if the frame was dropped.
    pub fn submit(&self, pcm: Vec<f32>) -> bool {
        if self.is_deafened() {
            return false;
        }
        match &self.sink {
            Some(sink) => sink.try_send(pcm).is_ok(),
            None => false,
        }
    }
}

/// Decodes one incoming Opus stream to interleaved PCM.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, AudioError>;
}

/// Decoder for a new incoming stream, if this build can decode Opus.
///
/// Without `native-audio` remote streams are not decoded and their meters stay at zero.
#[must_use]
pub fn new_decoder() -> Option<Box<dyn AudioDecoder>> {
    #[cfg(feature = "native-audio")]
    {
        match native::OpusDecoder::new() {
            Ok(decoder) => Some(Box::new(decoder)),
            Err(e) => {
                tracing::warn!("Failed to create decoder: {}", e);
                None
            }
        }
    }
    #[cfg(not(feature = "native-audio"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_and_full_scale() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 480]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn meter_clones_share_level() {
        let meter = LevelMeter::new();
        let reader = meter.clone();

        meter.measure(&[0.5, -0.5]);
        assert!((reader.level() - 0.5).abs() < 1e-6);

        meter.reset();
        assert_eq!(reader.level(), 0.0);
    }

    #[test]
    fn deafen_drops_playback() {
        let (tx, mut rx) = mpsc::channel(4);
        let output = AudioOutput::with_sink(tx);
        let reader_side = output.clone();

        assert!(reader_side.submit(vec![0.1; 4]));
        output.set_deafened(true);
        assert!(!reader_side.submit(vec![0.1; 4]));
        output.set_deafened(false);
        assert!(reader_side.submit(vec![0.2; 4]));

        assert_eq!(rx.try_recv().unwrap(), vec![0.1; 4]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.2; 4]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detached_output_discards() {
        let output = AudioOutput::detached();
        assert!(!output.submit(vec![0.0; 2]));
        assert!(!output.is_deafened());
    }
}
