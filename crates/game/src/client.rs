use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::lobby::{PlayerId, Room, RoomCache, RoomId};
use crate::net::payload;
use crate::net::telemetry::{self, PlayerState, SnapshotCache, TelemetrySnapshot, WorldSnapshot};
use crate::net::{
    ConnectionState, ControlMessage, Correlator, CorrelatorError, Dispatcher, MessageType,
    NetworkStats, SessionEvent, SessionState, Transport, TransportError, heartbeat,
};

use crate::net::ConnectionState::{Authenticated, Connected, Disconnected, InGame, InRoom};

/// Sockets and background threads of one connected session.
struct Link {
    transport: Arc<Transport>,
    // Dropping this stops the heartbeat and telemetry threads.
    shutdown: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    correlator: Arc<Correlator>,
    session: Arc<SessionState>,
    rooms: Arc<RoomCache>,
    world: Arc<SnapshotCache>,
    link: Mutex<Option<Link>>,
}

impl Inner {
    /// Releases the link and fails every waiting request. Only the first
    /// caller does any work.
    fn teardown(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        link.transport.close();
        drop(link.shutdown);

        if let Err(e) = self.session.apply(SessionEvent::Disconnected) {
            log::warn!("Ignoring state change: {}", e);
        }
        self.correlator.fail_all();
        self.rooms.clear();
        self.world.clear();

        let current = thread::current().id();
        for handle in link.threads {
            if handle.thread().id() != current && handle.join().is_err() {
                log::error!("Background thread panicked");
            }
        }
        log::info!("Disconnected");
    }

    fn transport(&self) -> Result<Arc<Transport>, ClientError> {
        self.link
            .lock()
            .as_ref()
            .map(|link| Arc::clone(&link.transport))
            .ok_or(ClientError::SessionClosed)
    }
}

/// Blocking client for the lobby and game server.
///
/// Every operation checks the connection state before touching the
/// network and fails with [`ClientError::Precondition`] when it does not
/// apply. Request methods block the calling thread until the matching
/// response, the request timeout or a disconnect.
pub struct GameClient {
    inner: Arc<Inner>,
}

impl GameClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                correlator: Arc::new(Correlator::new()),
                session: SessionState::new(),
                rooms: RoomCache::new(),
                world: SnapshotCache::new(),
                link: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn require(&self, op: &'static str, allowed: &[ConnectionState]) -> Result<(), ClientError> {
        self.inner
            .session
            .require(allowed)
            .map(|_| ())
            .map_err(|state| ClientError::Precondition { op, state })
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.require("connect", &[Disconnected])?;
        self.inner
            .session
            .apply(SessionEvent::ConnectStarted)
            .map_err(|e| ClientError::Precondition {
                op: "connect",
                state: e.from,
            })?;

        let config = &self.inner.config;
        log::info!("Connecting to {}:{}", config.host, config.tcp_port);

        // Held until the link is stored, so a receive loop that dies at once
        // tears down a complete link.
        let mut slot = self.inner.link.lock();
        match self.open_link() {
            Ok(link) => {
                *slot = Some(link);
                if let Err(e) = self.inner.session.apply(SessionEvent::Connected) {
                    log::warn!("Ignoring state change: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                drop(slot);
                log::error!("Connect failed: {}", e);
                if let Err(e) = self.inner.session.apply(SessionEvent::Disconnected) {
                    log::warn!("Ignoring state change: {}", e);
                }
                Err(e)
            }
        }
    }

    fn open_link(&self) -> Result<Link, ClientError> {
        let transport = Arc::new(Transport::connect(&self.inner.config)?);
        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let mut threads = Vec::with_capacity(3);

        if let Err(e) = self.spawn_threads(&transport, shutdown_rx, &mut threads) {
            transport.close();
            return Err(TransportError::Io(e).into());
        }

        Ok(Link {
            transport,
            shutdown,
            threads,
        })
    }

    fn spawn_threads(
        &self,
        transport: &Arc<Transport>,
        shutdown: Receiver<()>,
        threads: &mut Vec<JoinHandle<()>>,
    ) -> std::io::Result<()> {
        let inner = &self.inner;

        let dispatcher = Dispatcher::new(
            Arc::clone(&inner.correlator),
            Arc::clone(&inner.session),
            Arc::clone(&inner.rooms),
        );
        let weak = Arc::downgrade(inner);
        threads.push(transport.spawn_receiver(
            move |message| dispatcher.dispatch(message),
            move |result| {
                if let Err(e) = result {
                    log::error!("Control channel failed: {}", e);
                }
                teardown_weak(&weak);
            },
        )?);

        let weak = Arc::downgrade(inner);
        threads.push(heartbeat::spawn(
            Arc::clone(transport),
            Arc::clone(&inner.correlator),
            Arc::clone(&inner.session),
            inner.config.heartbeat_interval(),
            shutdown.clone(),
            move |_| teardown_weak(&weak),
        )?);

        threads.push(telemetry::spawn_receiver(
            Arc::clone(transport),
            Arc::clone(&inner.world),
            inner.config.telemetry_poll(),
            shutdown,
        )?);
        Ok(())
    }

    /// Closes the session. A no-op when already disconnected.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    fn request(
        &self,
        op: &'static str,
        allowed: &[ConnectionState],
        kind: MessageType,
        body: Bytes,
    ) -> Result<ControlMessage, ClientError> {
        self.require(op, allowed)?;
        let transport = self.inner.transport()?;

        let response = match self.inner.correlator.send_and_wait(
            transport.as_ref(),
            kind,
            body,
            self.inner.config.request_timeout(),
        ) {
            Ok(response) => response,
            Err(CorrelatorError::Send(e)) => {
                log::error!("Failed to send {:?}: {}", kind, e);
                self.inner.teardown();
                return Err(ClientError::Transport(e));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(response) = response else {
            log::warn!("{} timed out", op);
            return Err(ClientError::Timeout(kind));
        };

        match response.message_type() {
            Some(MessageType::ErrorResponse) => {
                let message = payload::parse_error(&response.payload)
                    .unwrap_or_else(|e| format!("unreadable error reply ({e})"));
                Err(ClientError::Server(message))
            }
            reply if reply.is_some() && reply == kind.response() => Ok(response),
            _ => Err(ClientError::Protocol(format!(
                "{op} expected {:?}, got type {}",
                kind.response(),
                response.kind
            ))),
        }
    }

    fn acknowledged(
        &self,
        op: &'static str,
        allowed: &[ConnectionState],
        kind: MessageType,
    ) -> Result<(), ClientError> {
        let response = self.request(op, allowed, kind, Bytes::new())?;
        if payload::parse_ack(&response.payload)? {
            Ok(())
        } else {
            Err(ClientError::Rejected { op, reason: None })
        }
    }

    fn authenticate(
        &self,
        op: &'static str,
        kind: MessageType,
        username: &str,
        password: &str,
    ) -> Result<PlayerId, ClientError> {
        let response = self.request(
            op,
            &[Connected],
            kind,
            payload::credentials(username, password),
        )?;
        let reply = payload::parse_auth_reply(&response.payload)?;
        if !reply.success {
            return Err(ClientError::Rejected {
                op,
                reason: reply.error,
            });
        }
        self.inner.session.set_username(username);
        Ok(reply.user_id)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<PlayerId, ClientError> {
        self.authenticate("login", MessageType::LoginRequest, username, password)
    }

    pub fn register(&self, username: &str, password: &str) -> Result<PlayerId, ClientError> {
        self.authenticate("register", MessageType::RegisterRequest, username, password)
    }

    pub fn logout(&self) -> Result<(), ClientError> {
        self.acknowledged("logout", &[Authenticated, InRoom], MessageType::LogoutRequest)
    }

    fn enter_room(
        &self,
        op: &'static str,
        kind: MessageType,
        body: Bytes,
    ) -> Result<RoomId, ClientError> {
        let response = self.request(op, &[Authenticated], kind, body)?;
        let reply = payload::parse_room_reply(&response.payload)?;
        if reply.success {
            Ok(reply.room_id)
        } else {
            Err(ClientError::Rejected { op, reason: None })
        }
    }

    pub fn create_room(&self, name: &str, max_players: u32) -> Result<RoomId, ClientError> {
        self.enter_room(
            "create_room",
            MessageType::CreateRoomRequest,
            payload::create_room(name, max_players),
        )
    }

    pub fn join_room(&self, room_id: RoomId) -> Result<RoomId, ClientError> {
        self.enter_room(
            "join_room",
            MessageType::JoinRoomRequest,
            payload::join_room(room_id),
        )
    }

    pub fn leave_room(&self) -> Result<(), ClientError> {
        self.acknowledged("leave_room", &[InRoom], MessageType::LeaveRoomRequest)
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>, ClientError> {
        let response = self.request(
            "list_rooms",
            &[Authenticated],
            MessageType::ListRoomsRequest,
            Bytes::new(),
        )?;
        Ok(payload::parse_room_list(&response.payload)?)
    }

    pub fn start_game(&self) -> Result<(), ClientError> {
        self.acknowledged("start_game", &[InRoom], MessageType::StartGameRequest)
    }

    pub fn mark_ready(&self) -> Result<(), ClientError> {
        self.acknowledged("mark_ready", &[InRoom], MessageType::GameReadyRequest)
    }

    pub fn end_game(&self) -> Result<(), ClientError> {
        self.acknowledged("end_game", &[InGame], MessageType::EndGameRequest)
    }

    /// A telemetry frame stamped with the configured player and match ids.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::new(self.inner.config.player_id, self.inner.config.match_id)
    }

    /// Fire-and-forget. A failed send is logged and the frame dropped.
    pub fn send_telemetry(&self, snapshot: &TelemetrySnapshot) -> Result<(), ClientError> {
        self.require("send_telemetry", &[InRoom, InGame])?;
        let transport = self.inner.transport()?;
        if let Err(e) = transport.send_datagram(&snapshot.encode()) {
            log::warn!("Dropped telemetry datagram: {}", e);
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    pub fn user_id(&self) -> PlayerId {
        self.inner.session.snapshot().user_id
    }

    pub fn username(&self) -> String {
        self.inner.session.snapshot().username
    }

    pub fn current_room_id(&self) -> RoomId {
        self.inner.session.snapshot().room_id
    }

    pub fn current_room(&self) -> Option<Room> {
        self.inner.rooms.current()
    }

    /// Rooms from the most recent listing.
    pub fn rooms(&self) -> Vec<Room> {
        self.inner.rooms.listing()
    }

    pub fn latest_world(&self) -> Arc<WorldSnapshot> {
        self.inner.world.latest()
    }

    pub fn take_fresh_players(&self) -> Vec<PlayerState> {
        self.inner.world.take_fresh()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn stats(&self) -> Option<NetworkStats> {
        self.inner.transport().ok().map(|t| t.stats())
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

fn teardown_weak(inner: &Weak<Inner>) {
    if let Some(inner) = inner.upgrade() {
        inner.teardown();
    }
}
