pub mod auth;
pub mod fanout;
pub mod rate_limit;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::gateway::auth::UserType;
use crate::models::events::ServerEvent;

/// Outbound buffer per socket. Slow consumers get messages dropped rather
/// than stalling the emitting task.
pub const SESSION_CHANNEL_BUFFER: usize = 256;

pub const ROOM_DRIVERS: &str = "drivers";
pub const ROOM_CUSTOMERS: &str = "customers";

pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn ride_room(ride_id: Uuid) -> String {
    format!("ride:{ride_id}")
}

/// One authenticated socket. A user may hold several concurrent sessions
/// (multi-device); presence stays singular per driver.
pub struct Session {
    pub socket_id: Uuid,
    pub user_id: Uuid,
    pub user_type: UserType,
    tx: mpsc::Sender<Message>,
    rooms: DashSet<String>,
}

impl Session {
    pub fn send(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.tx.try_send(Message::Text(json.into())).is_ok(),
            Err(_) => false,
        }
    }

    fn try_send_raw(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

/// Registry of live sessions and the rooms they belong to.
pub struct Gateway {
    sessions: DashMap<Uuid, Arc<Session>>,
    rooms: DashMap<String, DashSet<Uuid>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Registers a freshly authenticated socket and joins its identity and
    /// class rooms. Returns the session handle plus the receiver feeding
    /// the socket's send half.
    pub fn register(
        &self,
        user_id: Uuid,
        user_type: UserType,
    ) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let session = Arc::new(Session {
            socket_id: Uuid::new_v4(),
            user_id,
            user_type,
            tx,
            rooms: DashSet::new(),
        });

        self.sessions.insert(session.socket_id, session.clone());
        self.join_room(&session, &user_room(user_id));
        let class_room = match user_type {
            UserType::Driver => ROOM_DRIVERS,
            UserType::Customer => ROOM_CUSTOMERS,
        };
        self.join_room(&session, class_room);

        (session, rx)
    }

    /// Removes the session from every room it joined. Returns true when
    /// this was the user's last live session.
    pub fn unregister(&self, session: &Session) -> bool {
        self.sessions.remove(&session.socket_id);
        for room in session.rooms.iter() {
            if let Some(members) = self.rooms.get(room.key()) {
                members.remove(&session.socket_id);
            }
        }
        self.room_size(&user_room(session.user_id)) == 0
    }

    pub fn join_room(&self, session: &Session, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session.socket_id);
        session.rooms.insert(room.to_string());
    }

    pub fn leave_room(&self, session: &Session, room: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(&session.socket_id);
        }
        session.rooms.remove(room);
    }

    /// Serializes once and fans out to every member of the room. Sessions
    /// with a full buffer are skipped.
    pub fn emit_to_room(&self, room: &str, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                debug!(error = %err, "failed to serialize server event");
                return;
            }
        };

        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for member in members.iter() {
            let socket_id = *member.key();
            if let Some(session) = self.sessions.get(&socket_id) {
                if !session.try_send_raw(Message::Text(json.clone().into())) {
                    debug!(socket_id = %socket_id, room, "dropped event for slow session");
                }
            }
        }
    }

    pub fn emit_to_user(&self, user_id: Uuid, event: &ServerEvent) {
        self.emit_to_room(&user_room(user_id), event);
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}
