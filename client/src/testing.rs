//! In-memory media backend and peer connector for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use voxmesh_common::{ConnectionId, Quality};

use crate::audio::LevelMeter;
use crate::media::{CaptureGuard, MediaBackend, MediaError, MediaFrame, TrackBundle};
use crate::webrtc::{PeerConnector, PeerLink, WebRtcError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct BackendState {
    fail_microphone: bool,
    microphones: usize,
    displays: usize,
    display_frames: Option<mpsc::Sender<MediaFrame>>,
    last_quality: Option<Quality>,
}

/// Backend that records open captures and can end the display capture on demand.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn fail_microphone(&self, fail: bool) {
        lock(&self.state).fail_microphone = fail;
    }

    pub fn active_microphones(&self) -> usize {
        lock(&self.state).microphones
    }

    pub fn active_displays(&self) -> usize {
        lock(&self.state).displays
    }

    pub fn last_quality(&self) -> Option<Quality> {
        lock(&self.state).last_quality
    }

    /// Simulate the OS ending the display capture.
    pub fn end_display(&self) {
        lock(&self.state).display_frames = None;
    }
}

impl MediaBackend for MockBackend {
    fn open_microphone(
        &mut self,
        frames: mpsc::Sender<MediaFrame>,
        _meter: LevelMeter,
    ) -> Result<CaptureGuard, MediaError> {
        let mut state = lock(&self.state);
        if state.fail_microphone {
            return Err(MediaError::Microphone("no input device".into()));
        }
        state.microphones += 1;
        drop(state);

        let shared = self.state.clone();
        Ok(CaptureGuard::new(move || {
            drop(frames);
            lock(&shared).microphones -= 1;
        }))
    }

    fn open_display(
        &mut self,
        quality: Quality,
        frames: mpsc::Sender<MediaFrame>,
    ) -> Result<CaptureGuard, MediaError> {
        let mut state = lock(&self.state);
        state.displays += 1;
        state.last_quality = Some(quality);
        state.display_frames = Some(frames);
        drop(state);

        let shared = self.state.clone();
        Ok(CaptureGuard::new(move || {
            let mut state = lock(&shared);
            state.displays -= 1;
            state.display_frames = None;
        }))
    }
}

#[derive(Default)]
struct LinkLog {
    accepted_offer: Option<String>,
    accepted_answer: Option<String>,
    candidates: Vec<String>,
    closed: bool,
}

/// What a test can see of one created link.
#[derive(Clone)]
pub struct LinkRecord {
    pub remote: ConnectionId,
    pub generation: u64,
    pub bundle: TrackBundle,
    log: Arc<Mutex<LinkLog>>,
}

impl LinkRecord {
    pub fn is_closed(&self) -> bool {
        lock(&self.log).closed
    }

    pub fn accepted_offer(&self) -> Option<String> {
        lock(&self.log).accepted_offer.clone()
    }

    pub fn accepted_answer(&self) -> Option<String> {
        lock(&self.log).accepted_answer.clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        lock(&self.log).candidates.clone()
    }
}

#[derive(Default)]
struct ConnectorState {
    links: Vec<LinkRecord>,
    failures: usize,
}

/// Connector producing recorded in-memory links.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Fail the next `n` connection attempts.
    pub fn fail_creates(&self, n: usize) {
        lock(&self.state).failures = n;
    }

    /// Every link created so far, in creation order.
    pub fn links(&self) -> Vec<LinkRecord> {
        lock(&self.state).links.clone()
    }

    /// Links to `remote` that are still open.
    pub fn open_links_to(&self, remote: ConnectionId) -> Vec<LinkRecord> {
        self.links()
            .into_iter()
            .filter(|l| l.remote == remote && !l.is_closed())
            .collect()
    }
}

impl PeerConnector for MockConnector {
    type Link = MockLink;

    async fn create(
        &self,
        remote: ConnectionId,
        generation: u64,
        bundle: TrackBundle,
    ) -> Result<MockLink, WebRtcError> {
        let mut state = lock(&self.state);
        if state.failures > 0 {
            state.failures -= 1;
            return Err(WebRtcError::PeerConnectionError("mock failure".into()));
        }

        let record = LinkRecord {
            remote,
            generation,
            bundle,
            log: Arc::default(),
        };
        state.links.push(record.clone());
        Ok(MockLink { record })
    }
}

pub struct MockLink {
    record: LinkRecord,
}

impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<String, WebRtcError> {
        Ok(format!("offer:{}:{}", self.record.remote, self.record.generation))
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, WebRtcError> {
        lock(&self.record.log).accepted_offer = Some(sdp.to_string());
        Ok(format!("answer:{}:{}", self.record.remote, self.record.generation))
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), WebRtcError> {
        lock(&self.record.log).accepted_answer = Some(sdp.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), WebRtcError> {
        lock(&self.record.log).candidates.push(candidate.to_string());
        Ok(())
    }

    async fn close(&self) {
        lock(&self.record.log).closed = true;
    }
}
