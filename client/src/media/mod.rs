//! Media Stream Multiplexer
//!
//! Owns local capture (microphone and display), decides which tracks every
//! peer connection carries, and pumps captured frames into the shared tracks.

mod backend;
mod remote;
mod tracks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use voxmesh_common::Quality;

use crate::audio::LevelMeter;
use crate::session::EventSender;

pub use backend::SilenceBackend;
pub use remote::{MediaKind, RemoteStream};
pub use tracks::{opus_capability, vp8_capability, LocalTracks};

/// Capacity of the frame queue between a capture backend and its pump.
const FRAME_QUEUE: usize = 64;

/// Media errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Microphone unavailable: {0}")]
    Microphone(String),
    #[error("Not supported by this build: {0}")]
    Unsupported(&'static str),
    #[error("Already sharing screen")]
    AlreadySharing,
    #[error("Not sharing screen")]
    NotSharing,
}

/// Tracks attached to every outgoing connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackBundle {
    /// Microphone audio (absent if capture failed).
    pub mic: bool,
    /// Screen video (present while sharing).
    pub screen: bool,
}

/// One encoded frame from a capture backend.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// Stops a running capture when dropped.
pub struct CaptureGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureGuard {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Guard for captures that need no explicit stop.
    #[must_use]
    pub fn noop() -> Self {
        Self { stop: None }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Source of local media.
///
/// A backend writes encoded frames into `frames` until stopped through the
/// returned guard. Closing `frames` early signals that capture ended on its
/// own (device lost, user stopped sharing from the OS).
pub trait MediaBackend: Send + 'static {
    /// Start microphone capture. Opus frames go to `frames`, RMS levels to `meter`.
    fn open_microphone(
        &mut self,
        frames: mpsc::Sender<MediaFrame>,
        meter: LevelMeter,
    ) -> Result<CaptureGuard, MediaError>;

    /// Start display capture at the given preset. VP8 frames go to `frames`.
    fn open_display(
        &mut self,
        quality: Quality,
        frames: mpsc::Sender<MediaFrame>,
    ) -> Result<CaptureGuard, MediaError>;
}

struct ActiveCapture {
    _guard: CaptureGuard,
    pump: JoinHandle<()>,
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        // Abort before the guard stops the backend so a deliberate stop never
        // reports as an external end.
        self.pump.abort();
    }
}

struct ScreenCapture {
    _capture: ActiveCapture,
    generation: u64,
    quality: Quality,
}

/// Local media state of one participant.
pub struct MediaMultiplexer<B> {
    backend: B,
    tracks: LocalTracks,
    events: EventSender,
    muted: Arc<AtomicBool>,
    meter: LevelMeter,
    mic: Option<ActiveCapture>,
    screen: Option<ScreenCapture>,
    screen_generation: u64,
}

impl<B: MediaBackend> MediaMultiplexer<B> {
    pub fn new(backend: B, tracks: LocalTracks, events: EventSender) -> Self {
        Self {
            backend,
            tracks,
            events,
            muted: Arc::new(AtomicBool::new(false)),
            meter: LevelMeter::new(),
            mic: None,
            screen: None,
            screen_generation: 0,
        }
    }

    /// Current bundle: mic if capture succeeded, screen while sharing.
    pub const fn bundle(&self) -> TrackBundle {
        TrackBundle {
            mic: self.mic.is_some(),
            screen: self.screen.is_some(),
        }
    }

    /// Level meter of the local microphone.
    pub fn local_meter(&self) -> LevelMeter {
        self.meter.clone()
    }

    pub const fn has_microphone(&self) -> bool {
        self.mic.is_some()
    }

    /// Quality of the running screen share.
    pub fn screen_quality(&self) -> Option<Quality> {
        self.screen.as_ref().map(|s| s.quality)
    }

    /// Open microphone capture. A held microphone is kept.
    pub fn acquire_microphone(&mut self) -> Result<(), MediaError> {
        if self.mic.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let guard = self.backend.open_microphone(tx, self.meter.clone())?;
        let pump = tracks::spawn_mic_pump(self.tracks.audio.clone(), rx, self.muted.clone());
        self.mic = Some(ActiveCapture {
            _guard: guard,
            pump,
        });

        info!("Microphone capture started");
        Ok(())
    }

    /// Start display capture. Returns the new bundle.
    pub fn start_screen_share(&mut self, quality: Quality) -> Result<TrackBundle, MediaError> {
        if self.screen.is_some() {
            return Err(MediaError::AlreadySharing);
        }

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let guard = self.backend.open_display(quality, tx)?;

        self.screen_generation += 1;
        let generation = self.screen_generation;
        let pump = tracks::spawn_screen_pump(
            self.tracks.video.clone(),
            rx,
            generation,
            self.events.clone(),
        );
        self.screen = Some(ScreenCapture {
            _capture: ActiveCapture {
                _guard: guard,
                pump,
            },
            generation,
            quality,
        });

        info!(
            quality = %quality,
            width = quality.max_width(),
            height = quality.max_height(),
            fps = quality.max_fps(),
            bitrate = quality.target_bitrate(),
            "Screen share started"
        );
        Ok(self.bundle())
    }

    /// Release display capture. Returns the new bundle.
    pub fn stop_screen_share(&mut self) -> Result<TrackBundle, MediaError> {
        if self.screen.take().is_none() {
            return Err(MediaError::NotSharing);
        }
        info!("Screen share stopped");
        Ok(self.bundle())
    }

    /// Capture generation `generation` ended on its own.
    ///
    /// Returns the new bundle, or `None` if that capture was already replaced.
    pub fn on_capture_ended(&mut self, generation: u64) -> Option<TrackBundle> {
        match &self.screen {
            Some(screen) if screen.generation == generation => {
                self.screen = None;
                warn!(generation, "Display capture ended externally");
                Some(self.bundle())
            }
            _ => None,
        }
    }

    /// Gate outgoing microphone frames.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Stop microphone and display capture.
    pub fn release_all(&mut self) {
        let had_media = self.mic.is_some() || self.screen.is_some();
        self.screen = None;
        self.mic = None;
        self.meter.reset();
        if had_media {
            info!("Local media released");
        }
    }
}
