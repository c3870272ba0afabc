mod connection;
mod correlator;
mod dispatcher;
pub mod heartbeat;
pub mod payload;
mod protocol;
mod stats;
pub mod telemetry;
mod transport;

pub use connection::{ConnectionState, Session, SessionEvent, SessionState, TransitionError};
pub use correlator::{Correlator, CorrelatorError};
pub use dispatcher::Dispatcher;
pub use payload::PayloadError;
pub use protocol::{
    ControlMessage, DEFAULT_MAX_FRAME_LEN, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, Decoded,
    FrameError, FrameReader, HEADER_LEN, MessageType, decode, decode_with_limit, encode,
};
pub use stats::NetworkStats;
pub use telemetry::{
    Action, MoveFlags, PlayerState, SnapshotCache, TelemetrySnapshot, WorldSnapshot,
};
pub use transport::{FrameSender, Transport, TransportError};
