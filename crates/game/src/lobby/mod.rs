use std::sync::Arc;

use parking_lot::Mutex;

pub type PlayerId = u32;
pub type RoomId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub id: PlayerId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub current_players: u32,
    pub max_players: u32,
    pub state: u8,
    pub players: Vec<String>,
    pub owner_id: PlayerId,
}

impl Room {
    /// The first listed member owns the room.
    pub fn from_members(
        id: RoomId,
        name: String,
        current_players: u32,
        max_players: u32,
        state: u8,
        members: Vec<RoomMember>,
    ) -> Self {
        let owner_id = members.first().map_or(0, |m| m.id);
        Self {
            id,
            name,
            current_players,
            max_players,
            state,
            players: members.into_iter().map(|m| m.username).collect(),
            owner_id,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }
}

#[derive(Debug, Default)]
struct RoomCacheInner {
    listed: Vec<Room>,
    current: Option<Room>,
}

/// Client-side view of the lobby. Every write replaces whole values; rooms
/// are never patched field by field.
#[derive(Debug, Default)]
pub struct RoomCache {
    inner: Mutex<RoomCacheInner>,
}

impl RoomCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replace_listing(&self, rooms: Vec<Room>) {
        self.inner.lock().listed = rooms;
    }

    pub fn listing(&self) -> Vec<Room> {
        self.inner.lock().listed.clone()
    }

    pub fn set_current(&self, room: Room) {
        self.inner.lock().current = Some(room);
    }

    pub fn current(&self) -> Option<Room> {
        self.inner.lock().current.clone()
    }

    pub fn clear_current(&self) {
        self.inner.lock().current = None;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.listed.clear();
        inner.current = None;
    }
}
