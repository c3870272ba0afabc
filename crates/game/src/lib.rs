pub mod client;
pub mod config;
pub mod error;
pub mod lobby;
pub mod net;

pub use client::GameClient;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use lobby::{PlayerId, Room, RoomCache, RoomId, RoomMember};
pub use net::{
    Action, ConnectionState, ControlMessage, MessageType, MoveFlags, NetworkStats, PlayerState,
    TelemetrySnapshot, WorldSnapshot,
};
