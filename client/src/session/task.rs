//! The session task and its event dispatch.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use voxmesh_common::protocol::{ClientEvent, ServerEvent, SignalPayload};
use voxmesh_common::{ConnectionId, ParticipantInfo, ParticipantProfile, RoomId, TogglePatch, ToggleState};

use super::{Command, EventReceiver, EventSender, Joined, SessionError, SessionEvent, SessionSetup, VoiceView};
use crate::audio::AudioOutput;
use crate::broker::{PeerBroker, PeerState, RetryPolicy};
use crate::config::ClientConfig;
use crate::media::{MediaBackend, MediaError, MediaMultiplexer, TrackBundle};
use crate::network::{ConnectionStatus, SignalingEvent};
use crate::speaking::{DetectorTap, Speaker, SpeakingDetector, SpeakingUpdate};
use crate::webrtc::{LinkEvent, PeerConnector};

pub(super) struct SessionTask<B: MediaBackend, C: PeerConnector> {
    profile: ParticipantProfile,
    signal_tx: mpsc::Sender<ClientEvent>,
    media: MediaMultiplexer<B>,
    broker: PeerBroker<C>,
    output: AudioOutput,
    detector: SpeakingDetector,
    local_tap: Option<DetectorTap>,
    toggles: ToggleState,
    /// Room we want to be in; survives signaling loss.
    room: Option<RoomId>,
    connection_id: Option<ConnectionId>,
    signaling: ConnectionStatus,
    roster: Vec<ParticipantInfo>,
    /// Speaking remotes and the tap that reported them.
    speaking: HashMap<ConnectionId, u64>,
    local_speaking: bool,
    last_error: Option<String>,
    view: watch::Sender<VoiceView>,
}

impl<B: MediaBackend, C: PeerConnector> SessionTask<B, C> {
    pub(super) fn new(
        config: &ClientConfig,
        setup: SessionSetup<B, C>,
        events: EventSender,
        view: watch::Sender<VoiceView>,
    ) -> Self {
        let detector = SpeakingDetector::new(
            config.speaking_threshold,
            config.speaking_interval,
            events.clone(),
        );
        let broker = PeerBroker::new(
            setup.connector,
            setup.signal_tx.clone(),
            events.clone(),
            detector.clone(),
            config.newcomer_retry,
        );

        Self {
            profile: setup.profile,
            signal_tx: setup.signal_tx,
            media: MediaMultiplexer::new(setup.backend, setup.tracks, events),
            broker,
            output: setup.output,
            detector,
            local_tap: None,
            toggles: ToggleState::default(),
            room: None,
            connection_id: None,
            signaling: ConnectionStatus::Disconnected,
            roster: Vec::new(),
            speaking: HashMap::new(),
            local_speaking: false,
            last_error: None,
            view,
        }
    }

    pub(super) async fn run(mut self, mut inbox: EventReceiver) {
        info!("Voice session started");

        while let Some(event) = inbox.recv().await {
            let keep_running = match event {
                SessionEvent::Command(command) => self.on_command(command).await,
                SessionEvent::Signaling(event) => {
                    self.on_signaling(event).await;
                    true
                }
                SessionEvent::Link(event) => {
                    self.on_link(event).await;
                    true
                }
                SessionEvent::Speaking(update) => {
                    self.on_speaking(update);
                    true
                }
                SessionEvent::ScreenCaptureEnded { generation } => {
                    if let Some(bundle) = self.media.on_capture_ended(generation) {
                        self.screen_share_changed(false, bundle).await;
                    }
                    true
                }
                SessionEvent::RetryCall { remote } => {
                    self.on_retry(remote).await;
                    true
                }
            };

            self.prune_speaking();
            self.publish_view();
            if !keep_running {
                break;
            }
        }

        let in_room = self.room.take().is_some();
        self.teardown().await;
        if in_room && self.connection_id.is_some() {
            self.send(ClientEvent::LeaveVoice);
        }
        self.publish_view();
        info!("Voice session stopped");
    }

    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Join { room_id, reply } => {
                let joined = self.join(room_id).await;
                self.publish_view();
                let _ = reply.send(joined);
            }
            Command::Leave { reply } => {
                self.leave().await;
                self.publish_view();
                let _ = reply.send(());
            }
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SetDeafened(deafened) => {
                self.toggles.deafened = deafened;
                self.output.set_deafened(deafened);
                self.publish_toggle(TogglePatch::deafened(deafened));
            }
            Command::StartScreenShare { quality, reply } => {
                let result = match self.room {
                    None => Err(SessionError::NotInRoom),
                    Some(_) => match self.media.start_screen_share(quality) {
                        Ok(bundle) => {
                            self.screen_share_changed(true, bundle).await;
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                };
                self.publish_view();
                let _ = reply.send(result);
            }
            Command::StopScreenShare { reply } => {
                let result = match self.media.stop_screen_share() {
                    Ok(bundle) => {
                        self.screen_share_changed(false, bundle).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                self.publish_view();
                let _ = reply.send(result);
            }
            Command::Shutdown => return false,
        }
        true
    }

    async fn join(&mut self, room_id: RoomId) -> Joined {
        if self.room.is_some() {
            // The server moves us; our old mesh goes away.
            self.broker.close_all().await;
            self.speaking.clear();
            self.roster.clear();
            if self.media.stop_screen_share().is_ok() {
                self.toggles.screen_sharing = false;
            }
        }

        info!(room_id = %room_id, "Joining voice room");
        self.room = Some(room_id.clone());
        let degraded = self.ensure_microphone();
        self.send_join();

        Joined { room_id, degraded }
    }

    async fn leave(&mut self) {
        let Some(room_id) = self.room.take() else {
            return;
        };
        info!(room_id = %room_id, "Leaving voice room");
        if self.connection_id.is_some() {
            self.send(ClientEvent::LeaveVoice);
        }
        self.teardown().await;
    }

    /// Close every connection, stop every detector and release local media.
    async fn teardown(&mut self) {
        self.broker.close_all().await;
        self.local_tap = None;
        self.local_speaking = false;
        self.speaking.clear();
        self.media.release_all();
        self.toggles.screen_sharing = false;
        self.roster.clear();
    }

    fn ensure_microphone(&mut self) -> Option<MediaError> {
        match self.media.acquire_microphone() {
            Ok(()) => {
                self.start_local_tap();
                None
            }
            Err(e) => {
                warn!("Joining without microphone: {}", e);
                self.last_error = Some(e.to_string());
                Some(e)
            }
        }
    }

    fn start_local_tap(&mut self) {
        if self.local_tap.is_none() && self.media.has_microphone() && !self.toggles.muted {
            self.local_tap = Some(self.detector.tap(Speaker::Local, self.media.local_meter()));
        }
    }

    fn send_join(&self) {
        let (Some(room_id), Some(connection_id)) = (&self.room, self.connection_id) else {
            debug!("Join deferred until signaling is ready");
            return;
        };
        self.send(ClientEvent::JoinVoice {
            room_id: room_id.clone(),
            participant: self.profile.clone(),
            connection_id,
            muted: self.toggles.muted,
            deafened: self.toggles.deafened,
        });
    }

    fn send(&self, event: ClientEvent) {
        if let Err(e) = self.signal_tx.try_send(event) {
            warn!("Dropping signaling event: {}", e);
        }
    }

    fn publish_toggle(&self, patch: TogglePatch) {
        if self.room.is_some() && self.connection_id.is_some() {
            self.send(ClientEvent::UserToggleState(patch));
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.toggles.muted = muted;
        self.media.set_muted(muted);
        if muted {
            self.local_tap = None;
            self.local_speaking = false;
        } else {
            self.start_local_tap();
        }
        self.publish_toggle(TogglePatch::muted(muted));
    }

    async fn screen_share_changed(&mut self, sharing: bool, bundle: TrackBundle) {
        self.toggles.screen_sharing = sharing;
        self.publish_toggle(TogglePatch::screen_sharing(sharing));
        self.renegotiate(bundle).await;
    }

    fn counterparts(&self) -> Vec<ConnectionId> {
        self.roster
            .iter()
            .map(|p| p.connection_id)
            .filter(|id| Some(*id) != self.connection_id)
            .collect()
    }

    async fn renegotiate(&mut self, bundle: TrackBundle) {
        let counterparts = self.counterparts();
        self.speaking.clear();
        for (remote, e) in self.broker.renegotiate(&counterparts, bundle).await {
            warn!(remote = %remote, "Renegotiation failed: {}", e);
            self.last_error = Some(e.to_string());
        }
    }

    async fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                self.signaling = ConnectionStatus::Connected;
            }
            SignalingEvent::Disconnected => {
                warn!("Signaling lost");
                self.signaling = ConnectionStatus::Disconnected;
                self.connection_id = None;
                if self.room.is_some() {
                    self.teardown().await;
                }
            }
            SignalingEvent::Server(event) => self.on_server_event(event).await,
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Ready {
                session_id,
                connection_id,
            } => {
                info!(session_id = %session_id, connection_id = %connection_id, "Signaling ready");
                self.connection_id = Some(connection_id);
                self.broker.set_local_id(connection_id);
                if self.room.is_some() {
                    if !self.media.has_microphone() {
                        self.ensure_microphone();
                    }
                    self.send_join();
                }
            }
            ServerEvent::Pong => {}
            ServerEvent::RosterUpdate {
                room_id,
                participants,
            } => {
                if self.room.as_ref() == Some(&room_id) {
                    debug!(room_id = %room_id, count = participants.len(), "Roster updated");
                    self.roster = participants;
                }
            }
            ServerEvent::NewParticipant { connection_id } => {
                if self.room.is_none() || Some(connection_id) == self.connection_id {
                    return;
                }
                let bundle = self.media.bundle();
                if let Err(e) = self
                    .broker
                    .open_outbound(connection_id, bundle, RetryPolicy::Newcomer)
                    .await
                {
                    self.last_error = Some(e.to_string());
                }
            }
            ServerEvent::ParticipantLeft { connection_id } => {
                self.broker.close(connection_id).await;
                self.speaking.remove(&connection_id);
            }
            ServerEvent::Signal { from, signal } => {
                if self.room.is_none() {
                    debug!(from = %from, "Signal outside a room ignored");
                    return;
                }
                let result = match signal {
                    SignalPayload::Offer { sdp } => {
                        let bundle = self.media.bundle();
                        self.broker.on_inbound_call(from, &sdp, bundle).await
                    }
                    SignalPayload::Answer { sdp } => self.broker.on_answer(from, &sdp).await,
                    SignalPayload::IceCandidate { candidate } => {
                        self.broker.on_ice_candidate(from, &candidate).await;
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    self.last_error = Some(e.to_string());
                }
            }
            ServerEvent::PeerUnavailable { connection_id } => {
                if let Some(e) = self.broker.on_peer_unavailable(connection_id).await {
                    self.last_error = Some(e.to_string());
                }
            }
            ServerEvent::Error { code, message } => {
                warn!(code = %code, "Server rejected request: {}", message);
                self.last_error = Some(format!("{code}: {message}"));
            }
        }
    }

    async fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::IceCandidate {
                remote,
                generation,
                candidate,
            } => {
                if let Err(e) = self.broker.on_local_candidate(remote, generation, candidate) {
                    debug!(remote = %remote, "Candidate not sent: {}", e);
                }
            }
            LinkEvent::StateChanged {
                remote,
                generation,
                state,
            } => {
                if self.broker.on_state(remote, generation, state).await == Some(PeerState::Closed) {
                    self.speaking.remove(&remote);
                }
            }
            LinkEvent::RemoteStream {
                remote,
                generation,
                stream,
            } => {
                self.broker.on_remote_stream(remote, generation, stream);
            }
        }
    }

    fn on_speaking(&mut self, update: SpeakingUpdate) {
        match update.speaker {
            Speaker::Local => {
                if self.local_tap.as_ref().map(DetectorTap::id) == Some(update.tap) {
                    self.local_speaking = update.speaking;
                }
            }
            Speaker::Remote(remote) => {
                // Updates from a replaced connection or stream may still be queued.
                if self.broker.tap_id(remote) != Some(update.tap) {
                    return;
                }
                if update.speaking {
                    self.speaking.insert(remote, update.tap);
                } else {
                    self.speaking.remove(&remote);
                }
            }
        }
    }

    /// Drops speaking flags whose detector no longer watches the remote.
    fn prune_speaking(&mut self) {
        let broker = &self.broker;
        self.speaking
            .retain(|remote, tap| broker.tap_id(*remote) == Some(*tap));
    }

    async fn on_retry(&mut self, remote: ConnectionId) {
        let present = self.roster.iter().any(|p| p.connection_id == remote);
        if self.room.is_none() || !present || self.broker.has_peer(remote) {
            return;
        }
        info!(remote = %remote, "Retrying call to newcomer");
        let bundle = self.media.bundle();
        if let Err(e) = self
            .broker
            .open_outbound(remote, bundle, RetryPolicy::None)
            .await
        {
            self.last_error = Some(e.to_string());
        }
    }

    fn snapshot(&self) -> VoiceView {
        VoiceView {
            signaling: self.signaling,
            connection_id: self.connection_id,
            room_id: self.room.clone(),
            roster: self.roster.clone(),
            speaking: self.speaking.keys().copied().collect(),
            local_speaking: self.local_speaking,
            peers: self.broker.states().collect(),
            local: self.toggles,
            microphone: self.media.has_microphone(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish_view(&self) {
        let next = self.snapshot();
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
