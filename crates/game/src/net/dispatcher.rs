use std::sync::Arc;

use super::connection::{SessionEvent, SessionState};
use super::correlator::Correlator;
use super::payload::{self, PayloadError};
use super::protocol::{ControlMessage, MessageType};
use crate::lobby::RoomCache;

/// Routes every inbound control message: first to its type handler, which
/// updates session and room state, then to any request waiting on its
/// sequence, whatever the type. Waiters therefore always observe the state
/// the response caused.
pub struct Dispatcher {
    correlator: Arc<Correlator>,
    session: Arc<SessionState>,
    rooms: Arc<RoomCache>,
}

impl Dispatcher {
    pub fn new(
        correlator: Arc<Correlator>,
        session: Arc<SessionState>,
        rooms: Arc<RoomCache>,
    ) -> Self {
        Self {
            correlator,
            session,
            rooms,
        }
    }

    pub fn dispatch(&self, message: ControlMessage) {
        match message.message_type() {
            Some(kind) => {
                if let Err(e) = self.handle(kind, &message.payload) {
                    log::warn!("Dropping malformed {:?} seq={}: {}", kind, message.sequence, e);
                }
            }
            None => log::warn!(
                "Unknown message type {} (seq={})",
                message.kind,
                message.sequence
            ),
        }

        let (kind, sequence) = (message.kind, message.sequence);
        if !self.correlator.complete_if_pending(message) {
            log::trace!("No request waiting for type {} seq={}", kind, sequence);
        }
    }

    fn handle(&self, kind: MessageType, payload: &[u8]) -> Result<(), PayloadError> {
        use MessageType::*;

        match kind {
            LoginResponse | RegisterResponse => {
                let reply = payload::parse_auth_reply(payload)?;
                if reply.success {
                    log::info!("Authenticated as user {}", reply.user_id);
                    self.transition(SessionEvent::Authenticated {
                        user_id: reply.user_id,
                    });
                } else {
                    log::info!(
                        "Authentication rejected: {}",
                        reply.error.as_deref().unwrap_or("no reason given")
                    );
                }
            }
            LogoutResponse => {
                if payload::parse_ack(payload)? {
                    log::info!("Logged out");
                    self.transition(SessionEvent::LoggedOut);
                    self.rooms.clear();
                }
            }
            CreateRoomResponse | JoinRoomResponse => {
                let reply = payload::parse_room_reply(payload)?;
                if reply.success {
                    log::info!("Entered room {}", reply.room_id);
                    self.rooms.clear_current();
                    self.transition(SessionEvent::EnteredRoom {
                        room_id: reply.room_id,
                    });
                }
            }
            LeaveRoomResponse => {
                if payload::parse_ack(payload)? {
                    log::info!("Left room");
                    self.transition(SessionEvent::LeftRoom);
                    self.rooms.clear_current();
                }
            }
            ListRoomsResponse => {
                let rooms = payload::parse_room_list(payload)?;
                log::debug!("Room listing with {} rooms", rooms.len());
                self.rooms.replace_listing(rooms);
            }
            RoomStateUpdate => {
                let room = payload::parse_room_update(payload)?;
                let current = self.session.snapshot().room_id;
                if current != 0 && room.id == current {
                    log::debug!("Room {} now has {} players", room.id, room.players.len());
                    self.rooms.set_current(room);
                } else {
                    log::debug!("Ignoring update for room {} (current {})", room.id, current);
                }
            }
            StartGameResponse => {
                let started = payload::parse_ack(payload)?;
                log::info!("Start game {}", if started { "accepted" } else { "rejected" });
            }
            GameReadyResponse => {
                if payload::parse_ack(payload)? {
                    log::info!("Game ready");
                    self.transition(SessionEvent::GameReady);
                }
            }
            EndGameResponse => {
                if payload::parse_ack(payload)? {
                    log::info!("Game ended");
                    self.transition(SessionEvent::GameEnded);
                }
            }
            ErrorResponse => {
                let message = payload::parse_error(payload)?;
                log::warn!("Server error: {}", message);
            }
            Heartbeat => log::trace!("Heartbeat from server"),
            LoginRequest | RegisterRequest | LogoutRequest | CreateRoomRequest
            | JoinRoomRequest | LeaveRoomRequest | ListRoomsRequest | StartGameRequest
            | EndGameRequest | GameReadyRequest => {
                log::warn!("Ignoring request-type message {:?} from server", kind);
            }
        }
        Ok(())
    }

    fn transition(&self, event: SessionEvent) {
        if let Err(e) = self.session.apply(event) {
            log::warn!("Ignoring state change: {}", e);
        }
    }
}
