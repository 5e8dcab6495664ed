use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub members: HashSet<String>,
    pub created_at: String,
}

/// Snapshot row returned by `list()`; independent of the registry's internal state.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub member_count: usize,
    pub created_at: String,
}

/// In-memory room directory: one mutex guards every mutation and read. A room with an empty
/// member set never persists — the last `leave` removes it.
///
/// Grounded almost 1:1 on the Python original's room manager (`create_room`/`join_room`/
/// `leave_room`/`get_room_users`/`list_rooms`, including the auto-delete-on-empty rule).
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two calls with the same `name` yield two distinct rooms; names are not unique.
    pub fn create(&self, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            members: HashSet::new(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.rooms.lock().unwrap().insert(id.clone(), room);
        id
    }

    /// Idempotent: joining twice is a no-op the second time.
    pub fn join(&self, room_id: &str, username: &str) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.get_mut(room_id) {
            Some(room) => {
                room.members.insert(username.to_string());
                true
            }
            None => false,
        }
    }

    /// Removes `username` from the room. If that empties the member set, the room itself is
    /// removed so no observer ever sees a room with zero members.
    pub fn leave(&self, room_id: &str, username: &str) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        room.members.remove(username);
        if room.members.is_empty() {
            rooms.remove(room_id);
        }
        true
    }

    /// Stable snapshot copy of a room's current members.
    pub fn members(&self, room_id: &str) -> Option<Vec<String>> {
        let rooms = self.rooms.lock().unwrap();
        rooms.get(room_id).map(|room| room.members.iter().cloned().collect())
    }

    pub fn name(&self, room_id: &str) -> Option<String> {
        let rooms = self.rooms.lock().unwrap();
        rooms.get(room_id).map(|room| room.name.clone())
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.rooms.lock().unwrap().contains_key(room_id)
    }

    /// Snapshot copy of every current room, in no particular order.
    pub fn list(&self) -> Vec<RoomSummary> {
        self.rooms
            .lock()
            .unwrap()
            .values()
            .map(|room| RoomSummary {
                id: room.id.clone(),
                name: room.name.clone(),
                member_count: room.members.len(),
                created_at: room.created_at.clone(),
            })
            .collect()
    }
}
