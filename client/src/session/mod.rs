//! Voice Session
//!
//! One task owns all client voice state: the room, the peer broker, local
//! media and speaking detectors. Every input reaches it as a [`SessionEvent`]
//! on one queue, and renderers read the latest [`VoiceView`] from a `watch`
//! channel.

mod task;
mod view;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use voxmesh_common::protocol::ClientEvent;
use voxmesh_common::{ConnectionId, ParticipantProfile, Quality, RoomId};

use crate::audio::AudioOutput;
use crate::config::ClientConfig;
use crate::media::{LocalTracks, MediaBackend, MediaError};
use crate::network::SignalingEvent;
use crate::speaking::SpeakingUpdate;
use crate::webrtc::{LinkEvent, PeerConnector};

pub use view::VoiceView;

/// Sender half of the session queue. Cloned into every producer.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half of the session queue.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the session queue. Producers (signaling, connector) need the sender
/// before the session starts.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Everything the session task reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Command(Command),
    Signaling(SignalingEvent),
    Link(LinkEvent),
    Speaking(SpeakingUpdate),
    /// Display capture `generation` ended without being stopped.
    ScreenCaptureEnded { generation: u64 },
    /// Newcomer retry timer fired.
    RetryCall { remote: ConnectionId },
}

/// User requests.
#[derive(Debug)]
pub enum Command {
    Join {
        room_id: RoomId,
        reply: oneshot::Sender<Joined>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    SetMuted(bool),
    SetDeafened(bool),
    StartScreenShare {
        quality: Quality,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    StopScreenShare {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown,
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not in a voice room")]
    NotInRoom,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Voice session has stopped")]
    Closed,
}

/// Result of a join request.
#[derive(Debug)]
pub struct Joined {
    pub room_id: RoomId,
    /// Why the microphone could not be opened. The join went ahead without
    /// outgoing audio.
    pub degraded: Option<MediaError>,
}

impl Joined {
    pub const fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// What the session is built from.
pub struct SessionSetup<B, C> {
    pub profile: ParticipantProfile,
    pub backend: B,
    pub connector: C,
    pub tracks: LocalTracks,
    pub output: AudioOutput,
    /// Outbound signaling queue.
    pub signal_tx: mpsc::Sender<ClientEvent>,
}

/// Handle to a running voice session. Dropping it stops the session.
pub struct VoiceSession {
    events: EventSender,
    view: watch::Receiver<VoiceView>,
    task: Option<JoinHandle<()>>,
}

impl VoiceSession {
    /// Start the session task.
    pub fn spawn<B: MediaBackend, C: PeerConnector>(
        config: &ClientConfig,
        setup: SessionSetup<B, C>,
        events: EventSender,
        inbox: EventReceiver,
    ) -> Self {
        let (view_tx, view) = watch::channel(VoiceView::default());
        let session = task::SessionTask::new(config, setup, events.clone(), view_tx);
        let task = tokio::spawn(session.run(inbox));

        Self {
            events,
            view,
            task: Some(task),
        }
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.events
            .send(SessionEvent::Command(command))
            .map_err(|_| SessionError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Join `room_id`, leaving any other room. Takes effect on the server as
    /// soon as signaling is ready.
    pub async fn join(&self, room_id: impl Into<RoomId>) -> Result<Joined, SessionError> {
        let room_id = room_id.into();
        self.request(|reply| Command::Join { room_id, reply }).await
    }

    /// Leave the current room. Leaving when in no room is a no-op.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.send(Command::SetMuted(muted))
    }

    pub fn set_deafened(&self, deafened: bool) -> Result<(), SessionError> {
        self.send(Command::SetDeafened(deafened))
    }

    pub async fn start_screen_share(&self, quality: Quality) -> Result<(), SessionError> {
        self.request(|reply| Command::StartScreenShare { quality, reply })
            .await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::StopScreenShare { reply })
            .await?
    }

    /// Latest view snapshot.
    pub fn view(&self) -> VoiceView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<VoiceView> {
        self.view.clone()
    }

    /// Stop the session and wait for teardown to finish.
    pub async fn shutdown(mut self) {
        let _ = self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if self.task.take().is_some() {
            debug!("Voice session handle dropped");
            let _ = self.send(Command::Shutdown);
        }
    }
}
