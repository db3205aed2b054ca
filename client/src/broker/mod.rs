//! Peer Connection Broker
//!
//! Keeps exactly one connection per counterpart in the room. Members already
//! present call a newcomer; the newcomer only answers. Every connection gets a
//! fresh generation number so activity from a replaced connection is dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxmesh_common::protocol::{ClientEvent, SignalPayload};
use voxmesh_common::ConnectionId;

use crate::media::{MediaKind, RemoteStream, TrackBundle};
use crate::session::{EventSender, SessionEvent};
use crate::speaking::{DetectorTap, Speaker, SpeakingDetector};
use crate::webrtc::{LinkState, PeerConnector, PeerLink, WebRtcError};

/// Whether a failed outbound call is tried once more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    /// The remote just joined and may not be ready; retry once after a delay.
    Newcomer,
}

/// Connection state exposed for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Negotiating,
    Established,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

struct PeerHandle<L> {
    link: L,
    generation: u64,
    direction: Direction,
    bundle: TrackBundle,
    state: PeerState,
    /// Our offer has not been answered yet.
    awaiting_answer: bool,
    retry: RetryPolicy,
    streams: HashMap<MediaKind, RemoteStream>,
    tap: Option<DetectorTap>,
}

/// Owns every peer connection of one participant.
pub struct PeerBroker<C: PeerConnector> {
    connector: C,
    local_id: Option<ConnectionId>,
    signal_tx: mpsc::Sender<ClientEvent>,
    events: EventSender,
    detector: SpeakingDetector,
    newcomer_retry: Duration,
    peers: HashMap<ConnectionId, PeerHandle<C::Link>>,
    next_generation: u64,
}

impl<C: PeerConnector> PeerBroker<C> {
    pub fn new(
        connector: C,
        signal_tx: mpsc::Sender<ClientEvent>,
        events: EventSender,
        detector: SpeakingDetector,
        newcomer_retry: Duration,
    ) -> Self {
        Self {
            connector,
            local_id: None,
            signal_tx,
            events,
            detector,
            newcomer_retry,
            peers: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Our connection id, announced by the server in `ready`.
    pub fn set_local_id(&mut self, id: ConnectionId) {
        self.local_id = Some(id);
    }

    pub fn state(&self, remote: ConnectionId) -> Option<PeerState> {
        self.peers.get(&remote).map(|p| p.state)
    }

    /// Current state of every connection.
    pub fn states(&self) -> impl Iterator<Item = (ConnectionId, PeerState)> + '_ {
        self.peers.iter().map(|(id, p)| (*id, p.state))
    }

    /// Bundle the connection to `remote` was negotiated with.
    pub fn bundle(&self, remote: ConnectionId) -> Option<TrackBundle> {
        self.peers.get(&remote).map(|p| p.bundle)
    }

    pub fn has_peer(&self, remote: ConnectionId) -> bool {
        self.peers.contains_key(&remote)
    }

    /// True if a speaking detector watches the audio of `remote`.
    pub fn is_tapped(&self, remote: ConnectionId) -> bool {
        self.tap_id(remote).is_some()
    }

    /// Id of the detector currently watching `remote`.
    pub fn tap_id(&self, remote: ConnectionId) -> Option<u64> {
        self.peers
            .get(&remote)
            .and_then(|p| p.tap.as_ref())
            .map(DetectorTap::id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn signal(&self, to: ConnectionId, signal: SignalPayload) -> Result<(), WebRtcError> {
        self.signal_tx
            .try_send(ClientEvent::Signal { to, signal })
            .map_err(|_| WebRtcError::SignalingClosed)
    }

    fn schedule_retry(&self, remote: ConnectionId, retry: RetryPolicy) {
        if retry != RetryPolicy::Newcomer {
            return;
        }
        let delay = self.newcomer_retry;
        let events = self.events.clone();
        debug!(remote = %remote, ?delay, "Scheduling newcomer retry");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::RetryCall { remote });
        });
    }

    /// Call `remote` with `bundle`, replacing any existing connection.
    pub async fn open_outbound(
        &mut self,
        remote: ConnectionId,
        bundle: TrackBundle,
        retry: RetryPolicy,
    ) -> Result<(), WebRtcError> {
        self.close(remote).await;
        let generation = self.next_generation();

        let link = match self.connector.create(remote, generation, bundle).await {
            Ok(link) => link,
            Err(e) => {
                warn!(remote = %remote, "Failed to create connection: {}", e);
                self.schedule_retry(remote, retry);
                return Err(e);
            }
        };

        let sdp = match link.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(remote = %remote, "Failed to create offer: {}", e);
                link.close().await;
                self.schedule_retry(remote, retry);
                return Err(e);
            }
        };

        self.peers.insert(
            remote,
            PeerHandle {
                link,
                generation,
                direction: Direction::Outbound,
                bundle,
                state: PeerState::Negotiating,
                awaiting_answer: true,
                retry,
                streams: HashMap::new(),
                tap: None,
            },
        );

        if let Err(e) = self.signal(remote, SignalPayload::Offer { sdp }) {
            self.close(remote).await;
            return Err(e);
        }

        info!(remote = %remote, generation, ?bundle, "Calling peer");
        Ok(())
    }

    /// Answer an offer from `remote` with `bundle`.
    pub async fn on_inbound_call(
        &mut self,
        remote: ConnectionId,
        sdp: &str,
        bundle: TrackBundle,
    ) -> Result<(), WebRtcError> {
        if let Some(existing) = self.peers.get(&remote) {
            let we_win = self.local_id.is_some_and(|local| local < remote);
            if existing.awaiting_answer && we_win {
                debug!(remote = %remote, "Offer collision, keeping our offer");
                return Ok(());
            }
            if existing.awaiting_answer {
                debug!(remote = %remote, "Offer collision, answering theirs");
            }
        }

        self.close(remote).await;
        let generation = self.next_generation();

        let link = self.connector.create(remote, generation, bundle).await?;
        let answer = match link.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(remote = %remote, "Failed to answer offer: {}", e);
                link.close().await;
                return Err(e);
            }
        };

        self.peers.insert(
            remote,
            PeerHandle {
                link,
                generation,
                direction: Direction::Inbound,
                bundle,
                state: PeerState::Negotiating,
                awaiting_answer: false,
                retry: RetryPolicy::None,
                streams: HashMap::new(),
                tap: None,
            },
        );

        if let Err(e) = self.signal(remote, SignalPayload::Answer { sdp: answer }) {
            self.close(remote).await;
            return Err(e);
        }

        info!(remote = %remote, generation, ?bundle, "Answered peer");
        Ok(())
    }

    /// Apply the answer to our pending offer.
    pub async fn on_answer(&mut self, remote: ConnectionId, sdp: &str) -> Result<(), WebRtcError> {
        let Some(peer) = self.peers.get_mut(&remote) else {
            debug!(remote = %remote, "Answer for unknown peer ignored");
            return Ok(());
        };
        if !peer.awaiting_answer {
            debug!(remote = %remote, "Unexpected answer ignored");
            return Ok(());
        }

        let applied = peer.link.accept_answer(sdp).await;
        match applied {
            Ok(()) => {
                peer.awaiting_answer = false;
                Ok(())
            }
            Err(e) => {
                warn!(remote = %remote, "Failed to apply answer: {}", e);
                self.close(remote).await;
                Err(e)
            }
        }
    }

    /// Add a candidate received from `remote`.
    pub async fn on_ice_candidate(&mut self, remote: ConnectionId, candidate: &str) {
        let Some(peer) = self.peers.get(&remote) else {
            debug!(remote = %remote, "Candidate for unknown peer ignored");
            return;
        };
        if let Err(e) = peer.link.add_ice_candidate(candidate).await {
            debug!(remote = %remote, "Candidate rejected: {}", e);
        }
    }

    /// Send a locally gathered candidate to `remote`.
    pub fn on_local_candidate(
        &self,
        remote: ConnectionId,
        generation: u64,
        candidate: String,
    ) -> Result<(), WebRtcError> {
        if !self.is_current(remote, generation) {
            return Ok(());
        }
        self.signal(remote, SignalPayload::IceCandidate { candidate })
    }

    /// The server could not deliver our offer to `remote`.
    ///
    /// Returns the failure if a pending call was affected.
    pub async fn on_peer_unavailable(&mut self, remote: ConnectionId) -> Option<WebRtcError> {
        let retry = match self.peers.get(&remote) {
            Some(peer) if peer.awaiting_answer => peer.retry,
            _ => return None,
        };
        warn!(remote = %remote, "Peer unavailable");
        self.close(remote).await;
        self.schedule_retry(remote, retry);
        Some(WebRtcError::PeerUnavailable(remote))
    }

    /// Track a link state change. Returns the new peer state if it changed.
    pub async fn on_state(
        &mut self,
        remote: ConnectionId,
        generation: u64,
        state: LinkState,
    ) -> Option<PeerState> {
        if !self.is_current(remote, generation) {
            return None;
        }

        match state {
            LinkState::Connected => {
                let peer = self.peers.get_mut(&remote)?;
                if peer.state == PeerState::Established {
                    return None;
                }
                peer.state = PeerState::Established;
                peer.awaiting_answer = false;
                info!(remote = %remote, direction = ?peer.direction, "Peer connection established");
                Some(PeerState::Established)
            }
            LinkState::Failed | LinkState::Closed => {
                warn!(remote = %remote, ?state, "Peer connection lost");
                self.close(remote).await;
                Some(PeerState::Closed)
            }
            LinkState::Connecting | LinkState::Disconnected => None,
        }
    }

    /// Take ownership of an incoming stream, replacing the previous stream of
    /// the same kind. Audio streams get a speaking detector.
    pub fn on_remote_stream(
        &mut self,
        remote: ConnectionId,
        generation: u64,
        stream: RemoteStream,
    ) -> bool {
        if !self.is_current(remote, generation) {
            return false;
        }
        let Some(peer) = self.peers.get_mut(&remote) else {
            return false;
        };

        if stream.kind == MediaKind::Audio {
            peer.tap = Some(
                self.detector
                    .tap(Speaker::Remote(remote), stream.meter.clone()),
            );
        }
        debug!(remote = %remote, kind = ?stream.kind, "Remote stream attached");
        peer.streams.insert(stream.kind, stream);
        true
    }

    fn is_current(&self, remote: ConnectionId, generation: u64) -> bool {
        self.peers
            .get(&remote)
            .is_some_and(|p| p.generation == generation)
    }

    /// Tear down the connection to `remote`. Returns false if there was none.
    pub async fn close(&mut self, remote: ConnectionId) -> bool {
        let Some(mut peer) = self.peers.remove(&remote) else {
            return false;
        };
        peer.tap = None;
        peer.streams.clear();
        peer.link.close().await;
        debug!(remote = %remote, generation = peer.generation, "Peer connection closed");
        true
    }

    /// Tear down every connection.
    pub async fn close_all(&mut self) {
        let remotes: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for remote in remotes {
            self.close(remote).await;
        }
    }

    /// Reconnect to every counterpart with a new bundle.
    ///
    /// Returns the counterparts that could not be called.
    pub async fn renegotiate(
        &mut self,
        counterparts: &[ConnectionId],
        bundle: TrackBundle,
    ) -> Vec<(ConnectionId, WebRtcError)> {
        info!(peers = counterparts.len(), ?bundle, "Renegotiating all connections");
        self.close_all().await;

        let mut failures = Vec::new();
        for &remote in counterparts {
            if let Err(e) = self.open_outbound(remote, bundle, RetryPolicy::None).await {
                failures.push((remote, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LevelMeter;
    use crate::testing::MockConnector;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use uuid::Uuid;

    const MIC: TrackBundle = TrackBundle {
        mic: true,
        screen: false,
    };

    struct Harness {
        broker: PeerBroker<MockConnector>,
        connector: MockConnector,
        signals: mpsc::Receiver<ClientEvent>,
        events: UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let connector = MockConnector::default();
        let (signal_tx, signals) = mpsc::channel(32);
        let (events_tx, events) = unbounded_channel();
        let detector = SpeakingDetector::new(0.02, Duration::from_millis(2), events_tx.clone());
        let broker = PeerBroker::new(
            connector.clone(),
            signal_tx,
            events_tx,
            detector,
            Duration::from_millis(10),
        );
        Harness {
            broker,
            connector,
            signals,
            events,
        }
    }

    fn next_signal(h: &mut Harness) -> (ConnectionId, SignalPayload) {
        match h.signals.try_recv() {
            Ok(ClientEvent::Signal { to, signal }) => (to, signal),
            other => panic!("Expected signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn outbound_call_sends_offer() {
        let mut h = harness();
        let remote = Uuid::new_v4();

        h.broker
            .open_outbound(remote, MIC, RetryPolicy::None)
            .await
            .unwrap();

        let (to, signal) = next_signal(&mut h);
        assert_eq!(to, remote);
        assert!(matches!(signal, SignalPayload::Offer { .. }));
        assert_eq!(h.broker.state(remote), Some(PeerState::Negotiating));
        assert_eq!(h.broker.bundle(remote), Some(MIC));
    }

    #[tokio::test]
    async fn inbound_call_is_answered_with_local_bundle() {
        let mut h = harness();
        let remote = Uuid::new_v4();

        h.broker
            .on_inbound_call(remote, "offer-sdp", MIC)
            .await
            .unwrap();

        let (to, signal) = next_signal(&mut h);
        assert_eq!(to, remote);
        assert!(matches!(signal, SignalPayload::Answer { .. }));

        let links = h.connector.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].bundle, MIC);
        assert_eq!(links[0].accepted_offer().as_deref(), Some("offer-sdp"));
    }

    #[tokio::test]
    async fn replacing_a_connection_closes_the_old_one() {
        let mut h = harness();
        let remote = Uuid::new_v4();

        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();

        let links = h.connector.links();
        assert_eq!(links.len(), 2);
        assert!(links[0].is_closed());
        assert!(!links[1].is_closed());
        assert_eq!(h.broker.len(), 1);
    }

    #[tokio::test]
    async fn glare_lower_id_keeps_its_offer() {
        let mut h = harness();
        let local = Uuid::from_u128(1);
        let remote = Uuid::from_u128(2);
        h.broker.set_local_id(local);

        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        h.broker.on_inbound_call(remote, "their-offer", MIC).await.unwrap();

        let links = h.connector.links();
        assert_eq!(links.len(), 1);
        assert!(!links[0].is_closed());
        assert_eq!(links[0].accepted_offer(), None);
    }

    #[tokio::test]
    async fn glare_higher_id_answers() {
        let mut h = harness();
        let local = Uuid::from_u128(2);
        let remote = Uuid::from_u128(1);
        h.broker.set_local_id(local);

        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        let _offer = next_signal(&mut h);
        h.broker.on_inbound_call(remote, "their-offer", MIC).await.unwrap();

        let links = h.connector.links();
        assert_eq!(links.len(), 2);
        assert!(links[0].is_closed());
        assert_eq!(links[1].accepted_offer().as_deref(), Some("their-offer"));
        assert!(matches!(next_signal(&mut h).1, SignalPayload::Answer { .. }));
    }

    #[tokio::test]
    async fn answer_for_unknown_peer_is_ignored() {
        let mut h = harness();
        h.broker.on_answer(Uuid::new_v4(), "sdp").await.unwrap();
        h.broker.on_ice_candidate(Uuid::new_v4(), "{}").await;
        assert!(h.broker.is_empty());
    }

    #[tokio::test]
    async fn answer_and_candidates_reach_the_link() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();

        h.broker.on_answer(remote, "answer-sdp").await.unwrap();
        h.broker.on_ice_candidate(remote, "cand-1").await;

        let link = &h.connector.links()[0];
        assert_eq!(link.accepted_answer().as_deref(), Some("answer-sdp"));
        assert_eq!(link.candidates(), vec!["cand-1".to_string()]);
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        let old = h.connector.links()[0].generation;
        let current = h.connector.links()[1].generation;

        assert_eq!(h.broker.on_state(remote, old, LinkState::Failed).await, None);
        assert_eq!(h.broker.state(remote), Some(PeerState::Negotiating));

        assert_eq!(
            h.broker.on_state(remote, current, LinkState::Connected).await,
            Some(PeerState::Established)
        );
        assert_eq!(h.broker.state(remote), Some(PeerState::Established));
    }

    #[tokio::test]
    async fn failed_link_is_torn_down() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.on_inbound_call(remote, "offer", MIC).await.unwrap();
        let generation = h.connector.links()[0].generation;

        assert_eq!(
            h.broker.on_state(remote, generation, LinkState::Failed).await,
            Some(PeerState::Closed)
        );
        assert!(!h.broker.has_peer(remote));
        assert!(h.connector.links()[0].is_closed());
    }

    #[tokio::test]
    async fn remote_audio_replaces_previous_stream_and_gets_tapped() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.on_inbound_call(remote, "offer", MIC).await.unwrap();
        let generation = h.connector.links()[0].generation;

        let first = LevelMeter::new();
        let second = LevelMeter::new();
        assert!(h.broker.on_remote_stream(
            remote,
            generation,
            RemoteStream::detached(MediaKind::Audio, first.clone()),
        ));
        first.set(0.5);
        assert!(h.broker.on_remote_stream(
            remote,
            generation,
            RemoteStream::detached(MediaKind::Audio, second.clone()),
        ));

        // Replacing stops the old stream, which zeroes its meter.
        assert_eq!(first.level(), 0.0);
        assert!(h.broker.is_tapped(remote));

        second.set(0.5);
        let update = loop {
            match h.events.recv().await {
                Some(SessionEvent::Speaking(update)) => break update,
                Some(_) => {}
                None => panic!("Event channel closed"),
            }
        };
        assert_eq!(update.speaker, Speaker::Remote(remote));
        assert!(update.speaking);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();

        assert!(h.broker.close(remote).await);
        assert!(!h.broker.close(remote).await);
        assert!(h.connector.links()[0].is_closed());
    }

    #[tokio::test]
    async fn newcomer_failure_retries_once_after_delay() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.connector.fail_creates(1);

        let result = h
            .broker
            .open_outbound(remote, MIC, RetryPolicy::Newcomer)
            .await;
        assert!(result.is_err());

        match h.events.recv().await {
            Some(SessionEvent::RetryCall { remote: r }) => assert_eq!(r, remote),
            other => panic!("Expected RetryCall, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_failure_is_not_retried() {
        let mut h = harness();
        h.connector.fail_creates(1);

        let result = h
            .broker
            .open_outbound(Uuid::new_v4(), MIC, RetryPolicy::None)
            .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_unavailable_fails_the_pending_call() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker
            .open_outbound(remote, MIC, RetryPolicy::Newcomer)
            .await
            .unwrap();

        let err = h.broker.on_peer_unavailable(remote).await;
        assert!(matches!(err, Some(WebRtcError::PeerUnavailable(r)) if r == remote));
        assert!(!h.broker.has_peer(remote));

        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::RetryCall { .. })
        ));
        assert!(h.broker.on_peer_unavailable(remote).await.is_none());
    }

    #[tokio::test]
    async fn local_candidates_only_for_current_link() {
        let mut h = harness();
        let remote = Uuid::new_v4();
        h.broker.open_outbound(remote, MIC, RetryPolicy::None).await.unwrap();
        let _offer = next_signal(&mut h);
        let generation = h.connector.links()[0].generation;

        h.broker
            .on_local_candidate(remote, generation + 1, "stale".into())
            .unwrap();
        assert!(h.signals.try_recv().is_err());

        h.broker
            .on_local_candidate(remote, generation, "fresh".into())
            .unwrap();
        assert!(matches!(
            next_signal(&mut h).1,
            SignalPayload::IceCandidate { candidate } if candidate == "fresh"
        ));
    }

    #[tokio::test]
    async fn renegotiate_recalls_everyone_with_new_bundle() {
        let mut h = harness();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        h.broker.on_inbound_call(a, "offer", MIC).await.unwrap();
        h.broker.open_outbound(b, MIC, RetryPolicy::None).await.unwrap();

        let sharing = TrackBundle {
            mic: true,
            screen: true,
        };
        let failures = h.broker.renegotiate(&[a, b], sharing).await;
        assert!(failures.is_empty());

        let links = h.connector.links();
        assert_eq!(links.len(), 4);
        assert!(links[..2].iter().all(|l| l.is_closed()));
        assert!(links[2..].iter().all(|l| !l.is_closed() && l.bundle == sharing));
        assert_eq!(h.broker.bundle(a), Some(sharing));
        assert_eq!(h.broker.bundle(b), Some(sharing));
    }
}
