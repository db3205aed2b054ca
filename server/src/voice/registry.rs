//! Room Registry
//!
//! Owns every voice room and its join-ordered member list. Each room guards
//! its members with its own mutex; events for a room are queued while that
//! mutex is held, so every member sees roster updates in mutation order.
//!
//! Queuing never waits on a client. A member whose queue is full or closed
//! is evicted from the room once the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use voxmesh_common::protocol::ServerEvent;
use voxmesh_common::{
    ConnectionId, ParticipantInfo, ParticipantProfile, RoomId, SessionId, TogglePatch,
    ToggleState,
};

/// Outgoing event queue of one WebSocket session.
pub type EventSender = mpsc::Sender<ServerEvent>;

/// Participant record held by a room.
struct Member {
    session_id: SessionId,
    info: ParticipantInfo,
    tx: EventSender,
}

/// A voice room.
pub struct Room {
    /// Room ID.
    pub id: RoomId,
    members: Mutex<Vec<Member>>,
}

/// Arguments of a join request.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub participant: ParticipantProfile,
    pub connection_id: ConnectionId,
    pub muted: bool,
    pub deafened: bool,
}

/// Result of a join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Roster of the joined room, joiner included.
    pub roster: Vec<ParticipantInfo>,
    /// Room the session was moved out of, if any.
    pub moved_from: Option<RoomId>,
}

/// A record removed by `leave` or `disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Current roster in join order.
    pub async fn roster(&self) -> Vec<ParticipantInfo> {
        let members = self.members.lock().await;
        snapshot(&members)
    }

    /// Remove `session_id` and notify the remaining members.
    async fn remove_session(&self, session_id: SessionId) -> Option<Departure> {
        let (departure, stale) = {
            let mut members = self.members.lock().await;
            remove_member(&self.id, &mut members, session_id)?
        };
        self.evict(stale).await;
        Some(departure)
    }

    /// Drop members that could not take an event. Each eviction is an
    /// ordinary departure and may turn up further stalled members.
    async fn evict(&self, mut stale: Vec<SessionId>) {
        while let Some(session_id) = stale.pop() {
            let mut members = self.members.lock().await;
            if let Some((departure, more)) = remove_member(&self.id, &mut members, session_id) {
                warn!(
                    room_id = %self.id,
                    session_id = %session_id,
                    connection_id = %departure.connection_id,
                    "Evicted member with a stalled event queue"
                );
                stale.extend(more);
            }
        }
    }
}

/// Remove `session_id` from a locked member list and notify the rest.
///
/// Returns the departure and the members that could not be notified.
fn remove_member(
    room_id: &RoomId,
    members: &mut Vec<Member>,
    session_id: SessionId,
) -> Option<(Departure, Vec<SessionId>)> {
    let index = members.iter().position(|m| m.session_id == session_id)?;
    let removed = members.remove(index);
    let connection_id = removed.info.connection_id;

    let mut stale = broadcast(room_id, members, None, &roster_event(room_id, members));
    stale.extend(broadcast(
        room_id,
        members,
        None,
        &ServerEvent::ParticipantLeft { connection_id },
    ));

    let departure = Departure {
        room_id: room_id.clone(),
        connection_id,
    };
    Some((departure, stale))
}

fn snapshot(members: &[Member]) -> Vec<ParticipantInfo> {
    members.iter().map(|m| m.info.clone()).collect()
}

fn roster_event(room_id: &RoomId, members: &[Member]) -> ServerEvent {
    ServerEvent::RosterUpdate {
        room_id: room_id.clone(),
        participants: snapshot(members),
    }
}

/// Queue `event` for every member except `exclude`.
///
/// Callers hold the room lock, which keeps per-room ordering intact.
/// Returns the members whose queue is full or closed.
fn broadcast(
    room_id: &RoomId,
    members: &[Member],
    exclude: Option<SessionId>,
    event: &ServerEvent,
) -> Vec<SessionId> {
    let mut stale = Vec::new();
    for member in members.iter().filter(|m| Some(m.session_id) != exclude) {
        if let Err(e) = member.tx.try_send(event.clone()) {
            let reason = match e {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            };
            warn!(
                room_id = %room_id,
                session_id = %member.session_id,
                reason,
                "Dropped event for member"
            );
            stale.push(member.session_id);
        }
    }
    stale
}

/// Registry of all voice rooms.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a room.
    async fn get_or_create_room(&self, room_id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                debug!(room_id = %room_id, "Created new voice room");
                Arc::new(Room::new(room_id.clone()))
            })
            .clone()
    }

    /// Get a room by ID.
    pub async fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Snapshot of every room.
    async fn all_rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Number of rooms ever created since start.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Roster of a room, `None` if the room was never created.
    pub async fn roster(&self, room_id: &str) -> Option<Vec<ParticipantInfo>> {
        let room = self.get_room(room_id).await?;
        Some(room.roster().await)
    }

    /// Add the session to `request.room_id`, removing it from any other room.
    ///
    /// A session already in the target room keeps its position; its record is
    /// replaced and `screen_sharing` resets.
    pub async fn join(
        &self,
        session_id: SessionId,
        request: JoinRequest,
        tx: EventSender,
    ) -> JoinOutcome {
        let mut moved_from = None;
        for room in self.all_rooms().await {
            if room.id == request.room_id {
                continue;
            }
            if let Some(departure) = room.remove_session(session_id).await {
                debug!(
                    session_id = %session_id,
                    from = %departure.room_id,
                    to = %request.room_id,
                    "Moved session between rooms"
                );
                moved_from = Some(departure.room_id);
            }
        }

        let room = self.get_or_create_room(&request.room_id).await;
        let (roster, stale) = {
            let mut members = room.members.lock().await;
            let stale = Self::insert_member(&room, &mut members, session_id, request, tx);
            (snapshot(&members), stale)
        };
        room.evict(stale).await;

        JoinOutcome { roster, moved_from }
    }

    /// Insert or replace the record and notify the room. Runs under the room lock.
    fn insert_member(
        room: &Room,
        members: &mut Vec<Member>,
        session_id: SessionId,
        request: JoinRequest,
        tx: EventSender,
    ) -> Vec<SessionId> {
        let info = ParticipantInfo {
            profile: request.participant,
            connection_id: request.connection_id,
            state: ToggleState {
                muted: request.muted,
                deafened: request.deafened,
                screen_sharing: false,
            },
        };

        match members.iter_mut().find(|m| m.session_id == session_id) {
            Some(existing) => {
                existing.info = info;
                existing.tx = tx;
            }
            None => members.push(Member {
                session_id,
                info,
                tx,
            }),
        }

        let mut stale = broadcast(&room.id, members, None, &roster_event(&room.id, members));
        stale.extend(broadcast(
            &room.id,
            members,
            Some(session_id),
            &ServerEvent::NewParticipant {
                connection_id: request.connection_id,
            },
        ));

        info!(
            session_id = %session_id,
            room_id = %room.id,
            participants = members.len(),
            "Participant joined voice room"
        );
        stale
    }

    /// Remove the session from whatever room holds it. Idempotent.
    pub async fn leave(&self, session_id: SessionId) -> Option<Departure> {
        for room in self.all_rooms().await {
            if let Some(departure) = room.remove_session(session_id).await {
                info!(
                    session_id = %session_id,
                    room_id = %departure.room_id,
                    "Participant left voice room"
                );
                return Some(departure);
            }
        }
        None
    }

    /// Transport loss. Same effect as `leave`.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<Departure> {
        self.leave(session_id).await
    }

    /// Merge a toggle patch into the session's record and broadcast the roster.
    ///
    /// Returns `false` if the session is in no room.
    pub async fn toggle_state(&self, session_id: SessionId, patch: &TogglePatch) -> bool {
        for room in self.all_rooms().await {
            let stale = {
                let mut members = room.members.lock().await;
                let Some(member) = members.iter_mut().find(|m| m.session_id == session_id) else {
                    continue;
                };

                member.info.state.apply(patch);
                debug!(
                    session_id = %session_id,
                    room_id = %room.id,
                    state = ?member.info.state,
                    "Toggle state updated"
                );
                broadcast(&room.id, &members, None, &roster_event(&room.id, &members))
            };
            room.evict(stale).await;
            return true;
        }
        false
    }
}
