use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use bookloop_core::Fanout;
use bookloop_types::events::GatewayEvent;

/// Identifies one WebSocket connection.
pub type ConnId = Uuid;

/// Tracks connections and their room memberships, and delivers events.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<Rooms>>,
}

#[derive(Default)]
struct Rooms {
    /// conn_id -> outbound queue and memberships
    connections: HashMap<ConnId, ConnectionEntry>,

    /// Identity rooms: user_id -> connections identified as that user
    users: HashMap<Uuid, HashSet<ConnId>>,

    /// Conversation rooms: conversation_id -> joined connections
    conversations: HashMap<Uuid, HashSet<ConnId>>,
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    user_id: Option<Uuid>,
    conversations: HashSet<Uuid>,
}

impl Rooms {
    fn deliver(&self, conn_ids: &HashSet<ConnId>, event: &GatewayEvent) {
        for conn_id in conn_ids {
            if let Some(entry) = self.connections.get(conn_id) {
                // A closed receiver means the connection is shutting down.
                let _ = entry.tx.send(event.clone());
            }
        }
    }
}

fn remove_member(rooms: &mut HashMap<Uuid, HashSet<ConnId>>, room: Uuid, conn_id: ConnId) {
    if let Some(members) = rooms.get_mut(&room) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&room);
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Rooms> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rooms> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh, unauthenticated connection. Returns (conn_id, receiver).
    pub fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().connections.insert(
            conn_id,
            ConnectionEntry {
                tx,
                user_id: None,
                conversations: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Move the connection into `user_id`'s identity room, leaving any
    /// identity room it was in before.
    pub fn identify(&self, conn_id: ConnId, user_id: Uuid) -> bool {
        let mut rooms = self.write();
        let Some(entry) = rooms.connections.get_mut(&conn_id) else {
            return false;
        };
        let previous = entry.user_id.replace(user_id);

        if let Some(previous) = previous {
            remove_member(&mut rooms.users, previous, conn_id);
        }
        rooms.users.entry(user_id).or_default().insert(conn_id);
        true
    }

    pub fn identity_of(&self, conn_id: ConnId) -> Option<Uuid> {
        self.read().connections.get(&conn_id).and_then(|e| e.user_id)
    }

    pub fn join_conversation(&self, conn_id: ConnId, conversation_id: Uuid) -> bool {
        let mut rooms = self.write();
        let Some(entry) = rooms.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.conversations.insert(conversation_id);
        rooms.conversations.entry(conversation_id).or_default().insert(conn_id);
        true
    }

    pub fn leave_conversation(&self, conn_id: ConnId, conversation_id: Uuid) {
        let mut rooms = self.write();
        if let Some(entry) = rooms.connections.get_mut(&conn_id) {
            entry.conversations.remove(&conversation_id);
        }
        remove_member(&mut rooms.conversations, conversation_id, conn_id);
    }

    /// Drop the connection and every membership it held. Queued events
    /// for it are discarded with the receiver.
    pub fn disconnect(&self, conn_id: ConnId) {
        let mut rooms = self.write();
        let Some(entry) = rooms.connections.remove(&conn_id) else {
            return;
        };
        if let Some(user_id) = entry.user_id {
            remove_member(&mut rooms.users, user_id, conn_id);
        }
        for conversation_id in entry.conversations {
            remove_member(&mut rooms.conversations, conversation_id, conn_id);
        }
        debug!("Connection {} removed from all rooms", conn_id);
    }

    /// Queue an event for one connection only.
    pub fn send_to_connection(&self, conn_id: ConnId, event: GatewayEvent) {
        if let Some(entry) = self.read().connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Users with at least one identified connection, sorted by id.
    pub fn online_users(&self) -> Vec<Uuid> {
        let mut online: Vec<Uuid> = self.read().users.keys().copied().collect();
        online.sort();
        online
    }

    #[cfg(test)]
    pub(crate) fn conversation_members(&self, conversation_id: Uuid) -> usize {
        self.read()
            .conversations
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }
}

impl Fanout for Dispatcher {
    fn publish_to_conversation(&self, conversation_id: Uuid, event: GatewayEvent) {
        let rooms = self.read();
        if let Some(members) = rooms.conversations.get(&conversation_id) {
            rooms.deliver(members, &event);
        }
    }

    fn notify_user(&self, user_id: Uuid, event: GatewayEvent) {
        let rooms = self.read();
        if let Some(members) = rooms.users.get(&user_id) {
            rooms.deliver(members, &event);
        }
    }
}
