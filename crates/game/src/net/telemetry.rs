//! Unreliable per-frame telemetry over UDP.
//!
//! Outbound datagrams carry the local player's input; inbound datagrams
//! carry the authoritative world state for a match. Neither direction is
//! acknowledged or ordered, and a bad datagram is simply dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use glam::{IVec2, Vec2};
use parking_lot::Mutex;

use super::payload::{PayloadError, PayloadReader};
use super::transport::{Transport, TransportError};
use crate::lobby::PlayerId;

/// Envelope message type for a player input datagram.
pub const INPUT_MESSAGE_TYPE: u32 = 1;
/// Envelope (12 bytes) plus eight `i32` fields.
pub const TELEMETRY_DATAGRAM_LEN: usize = 44;
pub const MAX_DATAGRAM_LEN: usize = 2048;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveFlags: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
    }
}

impl MoveFlags {
    /// Parses `l`, `r`, `u`, `d` (or `left`, `right`, `up`, `down`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "l" | "left" => Some(Self::LEFT),
            "r" | "right" => Some(Self::RIGHT),
            "u" | "up" => Some(Self::UP),
            "d" | "down" => Some(Self::DOWN),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Action {
    #[default]
    None = 0,
    Shoot = 1,
    Skill = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub player_id: PlayerId,
    pub match_id: u32,
    pub movement: MoveFlags,
    pub action: Action,
    pub action_direction: i32,
    pub target: IVec2,
}

impl TelemetrySnapshot {
    pub fn new(player_id: PlayerId, match_id: u32) -> Self {
        Self {
            player_id,
            match_id,
            movement: MoveFlags::empty(),
            action: Action::None,
            action_direction: 1,
            target: IVec2::splat(-1),
        }
    }

    pub fn with_movement(mut self, movement: MoveFlags) -> Self {
        self.movement = movement;
        self
    }

    pub fn with_action(mut self, action: Action, direction: i32, target: IVec2) -> Self {
        self.action = action;
        self.action_direction = direction;
        self.target = target;
        self
    }

    pub fn encode(&self) -> Bytes {
        let flag = |f: MoveFlags| self.movement.contains(f) as i32;

        let mut buf = BytesMut::with_capacity(TELEMETRY_DATAGRAM_LEN);
        buf.put_u32(self.player_id);
        buf.put_u32(INPUT_MESSAGE_TYPE);
        buf.put_u32(self.match_id);
        buf.put_i32(flag(MoveFlags::LEFT));
        buf.put_i32(flag(MoveFlags::RIGHT));
        buf.put_i32(flag(MoveFlags::UP));
        buf.put_i32(flag(MoveFlags::DOWN));
        buf.put_i32(self.action as i32);
        buf.put_i32(self.action_direction);
        buf.put_i32(self.target.x);
        buf.put_i32(self.target.y);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub position: Vec2,
    pub health: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub match_id: i32,
    pub players: Vec<PlayerState>,
    pub bullets: Vec<Vec2>,
}

impl WorldSnapshot {
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(datagram);
        let match_id = reader.i32("match id")?;

        let player_count = checked_count(&mut reader, "player", 16)?;
        let mut players = Vec::with_capacity(player_count);
        for _ in 0..player_count {
            let id = reader.i32("player id")? as PlayerId;
            let x = reader.f32("player x")?;
            let y = reader.f32("player y")?;
            let health = reader.i32("health")?;
            players.push(PlayerState {
                id,
                position: Vec2::new(x, y),
                health,
            });
        }

        let bullet_count = checked_count(&mut reader, "bullet", 8)?;
        let mut bullets = Vec::with_capacity(bullet_count);
        for _ in 0..bullet_count {
            let x = reader.f32("bullet x")?;
            let y = reader.f32("bullet y")?;
            bullets.push(Vec2::new(x, y));
        }

        Ok(Self {
            match_id,
            players,
            bullets,
        })
    }
}

fn checked_count(
    reader: &mut PayloadReader<'_>,
    field: &'static str,
    entry_len: usize,
) -> Result<usize, PayloadError> {
    let count = reader.i32(field)?;
    if count < 0 || count as usize > reader.remaining() / entry_len {
        return Err(PayloadError::InvalidCount {
            field,
            count: count as i64,
        });
    }
    Ok(count as usize)
}

#[derive(Debug, Default)]
struct SnapshotSlot {
    latest: Arc<WorldSnapshot>,
    fresh: HashSet<PlayerId>,
}

/// Latest world state received over UDP. Each applied snapshot replaces the
/// previous one whole, so readers never see a half-updated world.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    slot: Mutex<SnapshotSlot>,
}

impl SnapshotCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn apply(&self, snapshot: WorldSnapshot) {
        let fresh: HashSet<PlayerId> = snapshot.players.iter().map(|p| p.id).collect();
        let latest = Arc::new(snapshot);

        let mut slot = self.slot.lock();
        slot.latest = latest;
        slot.fresh.extend(fresh);
    }

    pub fn latest(&self) -> Arc<WorldSnapshot> {
        Arc::clone(&self.slot.lock().latest)
    }

    /// Players updated since the last call, each reported once.
    pub fn take_fresh(&self) -> Vec<PlayerState> {
        let mut slot = self.slot.lock();
        let fresh = std::mem::take(&mut slot.fresh);
        slot.latest
            .players
            .iter()
            .filter(|p| fresh.contains(&p.id))
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        *self.slot.lock() = SnapshotSlot::default();
    }
}

/// Drains inbound datagrams into `cache` until `shutdown` fires or the
/// transport closes. Sleeps `poll` between drains.
pub fn spawn_receiver(
    transport: Arc<Transport>,
    cache: Arc<SnapshotCache>,
    poll: Duration,
    shutdown: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("telemetry-rx".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
            loop {
                loop {
                    match transport.recv_datagram(&mut buf) {
                        Ok(Some(size)) => match WorldSnapshot::decode(&buf[..size]) {
                            Ok(snapshot) => cache.apply(snapshot),
                            Err(e) => {
                                transport.record_datagram_dropped();
                                log::debug!("Dropped telemetry datagram: {}", e);
                            }
                        },
                        Ok(None) => break,
                        Err(TransportError::Closed) => return,
                        Err(e) => {
                            log::warn!("Telemetry receive failed: {}", e);
                            break;
                        }
                    }
                }

                match shutdown.recv_timeout(poll) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let snapshot = TelemetrySnapshot::new(7, 3)
            .with_movement(MoveFlags::LEFT | MoveFlags::DOWN)
            .with_action(Action::Shoot, 2, IVec2::new(120, -5));
        let bytes = snapshot.encode();

        assert_eq!(bytes.len(), TELEMETRY_DATAGRAM_LEN);
        let words: Vec<i32> = bytes
            .chunks(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![7, 1, 3, 1, 0, 0, 1, 1, 2, 120, -5]);
    }

    #[test]
    fn test_default_snapshot_is_idle() {
        let bytes = TelemetrySnapshot::new(1, 0).encode();
        let words: Vec<i32> = bytes
            .chunks(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(&words[3..], &[0, 0, 0, 0, 0, 1, -1, -1]);
    }

    #[test]
    fn test_move_keys() {
        assert_eq!(MoveFlags::from_key("L"), Some(MoveFlags::LEFT));
        assert_eq!(MoveFlags::from_key("down"), Some(MoveFlags::DOWN));
        assert_eq!(MoveFlags::from_key("x"), None);
    }

    #[test]
    fn test_decode_world() {
        let players = [(1, 10.5, 20.0, 100), (2, -3.0, 4.25, 80)];
        let datagram = fixtures::world(5, &players, &[(1.0, 2.0)]);
        let world = WorldSnapshot::decode(&datagram).unwrap();

        assert_eq!(world.match_id, 5);
        assert_eq!(world.players.len(), 2);
        assert_eq!(world.player(2).unwrap().position, Vec2::new(-3.0, 4.25));
        assert_eq!(world.player(1).unwrap().health, 100);
        assert_eq!(world.bullets, vec![Vec2::new(1.0, 2.0)]);
    }

    #[test]
    fn test_decode_truncated_datagram() {
        let datagram = fixtures::world(5, &[(1, 10.5, 20.0, 100)], &[(1.0, 2.0)]);
        for cut in 0..datagram.len() {
            assert!(WorldSnapshot::decode(&datagram[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_negative_count() {
        let mut buf = BytesMut::new();
        buf.put_i32(1);
        buf.put_i32(-1);
        buf.put_i32(0);
        assert!(matches!(
            WorldSnapshot::decode(&buf),
            Err(PayloadError::InvalidCount { count: -1, .. })
        ));
    }

    #[test]
    fn test_cache_fresh_flags_are_one_shot() {
        let cache = SnapshotCache::new();
        let datagram = fixtures::world(1, &[(1, 0.0, 0.0, 10), (2, 1.0, 1.0, 10)], &[]);
        cache.apply(WorldSnapshot::decode(&datagram).unwrap());

        let fresh = cache.take_fresh();
        assert_eq!(fresh.len(), 2);
        assert!(cache.take_fresh().is_empty());

        cache.apply(WorldSnapshot::decode(&fixtures::world(1, &[(2, 5.0, 5.0, 9)], &[])).unwrap());
        let fresh = cache.take_fresh();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, 2);
        assert_eq!(fresh[0].position, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn test_cache_swap_keeps_old_readers_valid() {
        let cache = SnapshotCache::new();
        cache.apply(WorldSnapshot::decode(&fixtures::world(1, &[(1, 0.0, 0.0, 10)], &[])).unwrap());
        let before = cache.latest();

        cache.apply(WorldSnapshot::decode(&fixtures::world(2, &[], &[])).unwrap());
        assert_eq!(before.match_id, 1);
        assert_eq!(cache.latest().match_id, 2);

        cache.clear();
        assert_eq!(*cache.latest(), WorldSnapshot::default());
    }
}
