//! Typed payload builders and parsers for each control message type.
//!
//! All integers are big-endian. Strings are carried as a `u32` byte length
//! followed by UTF-8 bytes; invalid UTF-8 is replaced rather than rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::lobby::{Room, RoomMember};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload truncated: needed {needed} more bytes for {field}, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("invalid {field} count {count}")]
    InvalidCount { field: &'static str, count: i64 },
}

/// Bounds-checked cursor over a payload.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, field: &'static str, needed: usize) -> Result<(), PayloadError> {
        if self.buf.remaining() < needed {
            return Err(PayloadError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, PayloadError> {
        self.require(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, PayloadError> {
        self.require(field, 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32, PayloadError> {
        self.require(field, 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn f32(&mut self, field: &'static str) -> Result<f32, PayloadError> {
        self.require(field, 4)?;
        Ok(self.buf.get_f32())
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, PayloadError> {
        let len = self.u32(field)? as usize;
        self.require(field, len)?;
        let text = String::from_utf8_lossy(&self.buf[..len]).into_owned();
        self.buf.advance(len);
        Ok(text)
    }
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

pub fn credentials(username: &str, password: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + username.len() + password.len());
    put_string(&mut buf, username);
    put_string(&mut buf, password);
    buf.freeze()
}

pub fn create_room(name: &str, max_players: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + name.len());
    put_string(&mut buf, name);
    buf.put_u32(max_players);
    buf.freeze()
}

pub fn join_room(room_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(room_id);
    buf.freeze()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub success: bool,
    pub user_id: u32,
    pub error: Option<String>,
}

/// LOGIN_RESPONSE / REGISTER_RESPONSE.
pub fn parse_auth_reply(payload: &[u8]) -> Result<AuthReply, PayloadError> {
    let mut reader = PayloadReader::new(payload);
    let success = reader.u8("success flag")? == 1;
    let user_id = reader.u32("user id")?;
    // The reason string is optional and best effort.
    let error = if !success && reader.remaining() >= 4 {
        reader.string("error message").ok()
    } else {
        None
    };
    Ok(AuthReply {
        success,
        user_id,
        error,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomReply {
    pub success: bool,
    pub room_id: u32,
}

/// CREATE_ROOM_RESPONSE / JOIN_ROOM_RESPONSE.
pub fn parse_room_reply(payload: &[u8]) -> Result<RoomReply, PayloadError> {
    let mut reader = PayloadReader::new(payload);
    let success = reader.u8("success flag")? == 1;
    let room_id = reader.u32("room id")?;
    Ok(RoomReply { success, room_id })
}

/// Replies that carry only a success flag.
pub fn parse_ack(payload: &[u8]) -> Result<bool, PayloadError> {
    PayloadReader::new(payload)
        .u8("success flag")
        .map(|flag| flag == 1)
}

pub fn parse_room_list(payload: &[u8]) -> Result<Vec<Room>, PayloadError> {
    let mut reader = PayloadReader::new(payload);
    let count = reader.u32("room count")?;
    // Each entry needs at least 17 bytes; reject counts the payload cannot hold.
    if count as usize > reader.remaining() / 17 {
        return Err(PayloadError::InvalidCount {
            field: "room",
            count: count as i64,
        });
    }

    let mut rooms = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader.u32("room id")?;
        let name = reader.string("room name")?;
        let current_players = reader.u32("current players")?;
        let max_players = reader.u32("max players")?;
        let state = reader.u8("room state")?;
        rooms.push(Room {
            id,
            name,
            current_players,
            max_players,
            state,
            players: Vec::new(),
            owner_id: 0,
        });
    }
    Ok(rooms)
}

pub fn parse_room_update(payload: &[u8]) -> Result<Room, PayloadError> {
    let mut reader = PayloadReader::new(payload);
    let id = reader.u32("room id")?;
    let name = reader.string("room name")?;
    let current_players = reader.u32("current players")?;
    let max_players = reader.u32("max players")?;
    let state = reader.u8("room state")?;
    let player_count = reader.u32("player count")?;
    if player_count as usize > reader.remaining() / 8 {
        return Err(PayloadError::InvalidCount {
            field: "player",
            count: player_count as i64,
        });
    }

    let mut members = Vec::with_capacity(player_count as usize);
    for _ in 0..player_count {
        let id = reader.u32("player id")?;
        let username = reader.string("username")?;
        members.push(RoomMember { id, username });
    }

    Ok(Room::from_members(
        id,
        name,
        current_players,
        max_players,
        state,
        members,
    ))
}

pub fn parse_error(payload: &[u8]) -> Result<String, PayloadError> {
    PayloadReader::new(payload).string("error message")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn auth_reply(success: bool, user_id: u32, error: Option<&str>) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(success as u8);
        buf.put_u32(user_id);
        if let Some(error) = error {
            put_string(&mut buf, error);
        }
        buf.freeze()
    }

    pub fn room_reply(success: bool, room_id: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(success as u8);
        buf.put_u32(room_id);
        buf.freeze()
    }

    pub fn room_list(rooms: &[(u32, &str, u32, u32, u8)]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(rooms.len() as u32);
        for &(id, name, current, max, state) in rooms {
            buf.put_u32(id);
            put_string(&mut buf, name);
            buf.put_u32(current);
            buf.put_u32(max);
            buf.put_u8(state);
        }
        buf.freeze()
    }

    pub fn room_update(id: u32, name: &str, state: u8, players: &[(u32, &str)]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(id);
        put_string(&mut buf, name);
        buf.put_u32(players.len() as u32);
        buf.put_u32(4);
        buf.put_u8(state);
        buf.put_u32(players.len() as u32);
        for &(player_id, username) in players {
            buf.put_u32(player_id);
            put_string(&mut buf, username);
        }
        buf.freeze()
    }
}
