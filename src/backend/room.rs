// Room manager: per-canvas membership, presence, broadcast fan-out, and
// the liveness heartbeat that trims dead sessions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use crate::session_protocol::ServerMessage;

pub type ConnectionId = String;

/// One connected client. `outbox` is drained by the connection's own
/// outgoing task (see `session.rs`), so a slow broadcast never blocks the
/// read loop.
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub username: Option<String>,
    pub joined_canvas: Option<String>,
    pub is_alive: bool,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    pub fn send(&self, message: ServerMessage) -> Result<(), String> {
        self.outbox
            .send(message)
            .map_err(|e| format!("session {} is gone: {}", self.connection_id, e))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomUser {
    pub user_id: String,
    pub username: Option<String>,
}

#[derive(Default)]
struct RoomManagerInner {
    rooms: HashMap<String, Vec<ConnectionId>>,
    sessions: HashMap<ConnectionId, Session>,
}

/// Transient, in-memory membership tracker. Holds no persisted state; a
/// room exists exactly as long as it has at least one attached session.
pub struct RoomManager {
    inner: RwLock<RoomManagerInner>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RoomManagerInner::default()),
        }
    }

    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: String,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            connection_id.clone(),
            Session {
                connection_id,
                user_id,
                username: None,
                joined_canvas: None,
                is_alive: true,
                outbox,
            },
        );
    }

    /// Moves a session into `canvas_id`'s room, detaching it from any
    /// previous room first. Returns the peers that should be told about
    /// the join (the room's membership *before* this session was added).
    pub async fn attach(
        &self,
        connection_id: &str,
        canvas_id: &str,
        username: Option<String>,
    ) -> Vec<RoomUser> {
        let mut inner = self.inner.write().await;
        detach_locked(&mut inner, connection_id);

        let peers = room_users_locked(&inner, canvas_id);

        if let Some(session) = inner.sessions.get_mut(connection_id) {
            session.joined_canvas = Some(canvas_id.to_string());
            session.username = username;
        }
        inner
            .rooms
            .entry(canvas_id.to_string())
            .or_default()
            .push(connection_id.to_string());

        peers
    }

    pub async fn detach(&self, connection_id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        detach_locked(&mut inner, connection_id)
    }

    pub async fn unregister(&self, connection_id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        let canvas_id = detach_locked(&mut inner, connection_id);
        inner.sessions.remove(connection_id);
        canvas_id
    }

    /// Sends `message` to every session attached to `canvas_id` except
    /// `exclude`. A send failure for one receiver (buffer full, already
    /// gone) is logged and does not stop the fan-out to the rest.
    pub async fn broadcast(&self, canvas_id: &str, message: ServerMessage, exclude: Option<&str>) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(canvas_id) else {
            return;
        };
        for connection_id in members {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            if let Some(session) = inner.sessions.get(connection_id) {
                if let Err(e) = session.send(message.clone()) {
                    tracing::debug!("broadcast to {} dropped: {}", connection_id, e);
                }
            }
        }
    }

    pub async fn send_to(&self, connection_id: &str, message: ServerMessage) -> Result<(), String> {
        let inner = self.inner.read().await;
        match inner.sessions.get(connection_id) {
            Some(session) => session.send(message),
            None => Err(format!("no such session: {}", connection_id)),
        }
    }

    pub async fn users_of(&self, canvas_id: &str) -> Vec<RoomUser> {
        let inner = self.inner.read().await;
        room_users_locked(&inner, canvas_id)
    }

    pub async fn canvas_of(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(connection_id)
            .and_then(|s| s.joined_canvas.clone())
    }

    pub async fn mark_alive(&self, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(connection_id) {
            session.is_alive = true;
        }
    }

    /// Runs one liveness sweep: pings every session, then (on the next
    /// call) terminates anything that never answered. Mirrors the
    /// ping-then-reap two-phase pattern of a standard heartbeat loop.
    pub async fn sweep_stale(&self, ping: impl Fn() -> ServerMessage) -> Vec<ConnectionId> {
        let mut inner = self.inner.write().await;
        let mut dead = Vec::new();
        for (id, session) in inner.sessions.iter_mut() {
            if !session.is_alive {
                dead.push(id.clone());
                continue;
            }
            session.is_alive = false;
            let _ = session.send(ping());
        }
        for id in &dead {
            detach_locked(&mut inner, id);
            inner.sessions.remove(id);
        }
        dead
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

fn detach_locked(inner: &mut RoomManagerInner, connection_id: &str) -> Option<String> {
    let canvas_id = inner
        .sessions
        .get_mut(connection_id)
        .and_then(|s| s.joined_canvas.take())?;

    if let Some(members) = inner.rooms.get_mut(&canvas_id) {
        members.retain(|id| id != connection_id);
        if members.is_empty() {
            inner.rooms.remove(&canvas_id);
        }
    }
    Some(canvas_id)
}

fn room_users_locked(inner: &RoomManagerInner, canvas_id: &str) -> Vec<RoomUser> {
    inner
        .rooms
        .get(canvas_id)
        .map(|members| {
            members
                .iter()
                .filter_map(|id| inner.sessions.get(id))
                .map(|s| RoomUser {
                    user_id: s.user_id.clone(),
                    username: s.username.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub type SharedRoomManager = Arc<RoomManager>;

pub fn create_shared_room_manager() -> SharedRoomManager {
    Arc::new(RoomManager::new())
}
