use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::lobby::{PlayerId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    InRoom,
    InGame,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Authenticated => "AUTHENTICATED",
            ConnectionState::InRoom => "IN_ROOM",
            ConnectionState::InGame => "IN_GAME",
        }
    }

    /// States in which the control channel is up and heartbeats flow.
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected
                | ConnectionState::Authenticated
                | ConnectionState::InRoom
                | ConnectionState::InGame
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectStarted,
    Connected,
    Authenticated { user_id: PlayerId },
    LoggedOut,
    EnteredRoom { room_id: RoomId },
    LeftRoom,
    GameReady,
    GameEnded,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{event} is not valid while {from}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub event: &'static str,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConnectStarted => "connect start",
            SessionEvent::Connected => "connect",
            SessionEvent::Authenticated { .. } => "authentication",
            SessionEvent::LoggedOut => "logout",
            SessionEvent::EnteredRoom { .. } => "room entry",
            SessionEvent::LeftRoom => "room exit",
            SessionEvent::GameReady => "game ready",
            SessionEvent::GameEnded => "game end",
            SessionEvent::Disconnected => "disconnect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConnectionState,
    pub user_id: PlayerId,
    pub username: String,
    pub room_id: RoomId,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            user_id: 0,
            username: String::new(),
            room_id: 0,
        }
    }
}

impl Session {
    pub fn apply(&mut self, event: SessionEvent) -> Result<ConnectionState, TransitionError> {
        use ConnectionState::*;

        let next = match (self.state, &event) {
            (Disconnected, SessionEvent::ConnectStarted) => Connecting,
            (Connecting, SessionEvent::Connected) => Connected,
            (Connected, SessionEvent::Authenticated { user_id }) => {
                self.user_id = *user_id;
                Authenticated
            }
            (Authenticated | InRoom, SessionEvent::LoggedOut) => {
                self.user_id = 0;
                self.username.clear();
                self.room_id = 0;
                Connected
            }
            (Authenticated, SessionEvent::EnteredRoom { room_id }) => {
                self.room_id = *room_id;
                InRoom
            }
            (InRoom, SessionEvent::LeftRoom) => {
                self.room_id = 0;
                Authenticated
            }
            (InRoom, SessionEvent::GameReady) => InGame,
            (InGame, SessionEvent::GameEnded) => InRoom,
            (_, SessionEvent::Disconnected) => {
                *self = Session::default();
                Disconnected
            }
            (from, event) => {
                return Err(TransitionError {
                    from,
                    event: event.name(),
                });
            }
        };

        self.state = next;
        Ok(next)
    }
}

/// Shared owner of the [`Session`]; the only place the connection state
/// is mutated.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<Session>,
}

impl SessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> Session {
        self.inner.lock().clone()
    }

    pub fn apply(&self, event: SessionEvent) -> Result<ConnectionState, TransitionError> {
        let mut session = self.inner.lock();
        let from = session.state;
        let result = session.apply(event);
        if let Ok(to) = result {
            if to != from {
                log::debug!("Session {} -> {}", from, to);
            }
        }
        result
    }

    /// Checks the current state against `allowed` without holding the lock
    /// past the call.
    pub fn require(&self, allowed: &[ConnectionState]) -> Result<ConnectionState, ConnectionState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(state)
        }
    }

    pub fn set_username(&self, username: &str) {
        self.inner.lock().username = username.to_string();
    }
}
