//! Speaking Detector
//!
//! Samples the level meter of one audio stream at a fixed interval and
//! reports only when the speaking state flips. Purely local; speaking state
//! is never sent to the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use voxmesh_common::ConnectionId;

use crate::audio::LevelMeter;
use crate::session::{EventSender, SessionEvent};

/// Whose audio a detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    Local,
    Remote(ConnectionId),
}

/// A speaking state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakingUpdate {
    pub speaker: Speaker,
    /// Id of the tap that produced the update.
    pub tap: u64,
    pub speaking: bool,
}

/// Threshold comparison with edge detection.
#[derive(Debug, Clone, Copy)]
pub struct SpeakingGate {
    threshold: f32,
    speaking: bool,
}

impl SpeakingGate {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            speaking: false,
        }
    }

    /// Feed one level sample. Returns the new state if it flipped.
    pub fn sample(&mut self, level: f32) -> Option<bool> {
        let speaking = level > self.threshold;
        if speaking == self.speaking {
            return None;
        }
        self.speaking = speaking;
        Some(speaking)
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }
}

/// Starts detector taps with shared settings.
#[derive(Clone)]
pub struct SpeakingDetector {
    threshold: f32,
    interval: Duration,
    events: EventSender,
    next_tap: Arc<AtomicU64>,
}

impl SpeakingDetector {
    pub fn new(threshold: f32, interval: Duration, events: EventSender) -> Self {
        Self {
            threshold,
            interval,
            events,
            next_tap: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start watching `meter`. The tap runs until stopped or dropped.
    pub fn tap(&self, speaker: Speaker, meter: LevelMeter) -> DetectorTap {
        let id = self.next_tap.fetch_add(1, Ordering::Relaxed);
        let mut gate = SpeakingGate::new(self.threshold);
        let interval = self.interval;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some(speaking) = gate.sample(meter.level()) {
                    trace!(?speaker, tap = id, speaking, "Speaking state flipped");
                    let update = SpeakingUpdate {
                        speaker,
                        tap: id,
                        speaking,
                    };
                    if events.send(SessionEvent::Speaking(update)).is_err() {
                        break;
                    }
                }
            }
        });

        DetectorTap {
            id,
            speaker,
            task: Some(task),
        }
    }
}

/// A running detector. Dropping it stops the detector.
#[derive(Debug)]
pub struct DetectorTap {
    id: u64,
    speaker: Speaker,
    task: Option<JoinHandle<()>>,
}

impl DetectorTap {
    /// Id carried by every update of this tap.
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DetectorTap {
    fn drop(&mut self) {
        self.stop();
    }
}
