use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 8;
pub const DEFAULT_MAX_FRAME_LEN: usize = 1_048_576;
pub const DEFAULT_TCP_PORT: u16 = 8112;
pub const DEFAULT_UDP_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    LoginRequest = 1001,
    LoginResponse = 1002,
    RegisterRequest = 1003,
    RegisterResponse = 1004,
    LogoutRequest = 1005,
    LogoutResponse = 1006,

    CreateRoomRequest = 2001,
    CreateRoomResponse = 2002,
    JoinRoomRequest = 2003,
    JoinRoomResponse = 2004,
    LeaveRoomRequest = 2005,
    LeaveRoomResponse = 2006,
    ListRoomsRequest = 2007,
    ListRoomsResponse = 2008,
    RoomStateUpdate = 2009,

    StartGameRequest = 3001,
    StartGameResponse = 3002,
    EndGameRequest = 3003,
    EndGameResponse = 3004,
    GameReadyRequest = 3005,
    GameReadyResponse = 3006,

    Heartbeat = 9001,
    ErrorResponse = 9999,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use MessageType::*;

        let kind = match value {
            1001 => LoginRequest,
            1002 => LoginResponse,
            1003 => RegisterRequest,
            1004 => RegisterResponse,
            1005 => LogoutRequest,
            1006 => LogoutResponse,
            2001 => CreateRoomRequest,
            2002 => CreateRoomResponse,
            2003 => JoinRoomRequest,
            2004 => JoinRoomResponse,
            2005 => LeaveRoomRequest,
            2006 => LeaveRoomResponse,
            2007 => ListRoomsRequest,
            2008 => ListRoomsResponse,
            2009 => RoomStateUpdate,
            3001 => StartGameRequest,
            3002 => StartGameResponse,
            3003 => EndGameRequest,
            3004 => EndGameResponse,
            3005 => GameReadyRequest,
            3006 => GameReadyResponse,
            9001 => Heartbeat,
            9999 => ErrorResponse,
            _ => return None,
        };
        Some(kind)
    }

    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// The reply type the server answers this request with.
    pub fn response(self) -> Option<Self> {
        use MessageType::*;

        match self {
            LoginRequest | RegisterRequest | LogoutRequest | CreateRoomRequest
            | JoinRoomRequest | LeaveRoomRequest | ListRoomsRequest | StartGameRequest
            | EndGameRequest | GameReadyRequest => Self::from_u16(self.as_u16() + 1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub kind: u16,
    pub sequence: u16,
    pub payload: Bytes,
}

impl ControlMessage {
    pub fn new(kind: MessageType, sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.as_u16(),
            sequence,
            payload: payload.into(),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.kind)
    }

    pub fn total_length(&self) -> u32 {
        (HEADER_LEN + self.payload.len()) as u32
    }

    pub fn encode(&self) -> Bytes {
        encode(self.kind, self.sequence, &self.payload)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared frame length {0} is shorter than the 8-byte header")]
    Malformed(u32),
    #[error("declared frame length {size} exceeds maximum {max}")]
    TooLarge { size: u32, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame {
        message: ControlMessage,
        consumed: usize,
    },
    NeedMoreData,
}

pub fn encode(kind: u16, sequence: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32((HEADER_LEN + payload.len()) as u32);
    buf.put_u16(kind);
    buf.put_u16(sequence);
    buf.put_slice(payload);
    buf.freeze()
}

/// Reads the declared length of the frame at the front of `buf`, if enough
/// bytes are present to know it.
fn declared_length(buf: &[u8], max_frame_len: usize) -> Result<Option<usize>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (declared as usize) < HEADER_LEN {
        return Err(FrameError::Malformed(declared));
    }
    if declared as usize > max_frame_len {
        return Err(FrameError::TooLarge {
            size: declared,
            max: max_frame_len,
        });
    }
    Ok(Some(declared as usize))
}

pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    decode_with_limit(buf, usize::MAX)
}

pub fn decode_with_limit(buf: &[u8], max_frame_len: usize) -> Result<Decoded, FrameError> {
    let Some(total) = declared_length(buf, max_frame_len)? else {
        return Ok(Decoded::NeedMoreData);
    };
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    let mut header = &buf[4..HEADER_LEN];
    let kind = header.get_u16();
    let sequence = header.get_u16();
    let message = ControlMessage {
        kind,
        sequence,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..total]),
    };

    Ok(Decoded::Frame {
        message,
        consumed: total,
    })
}

/// Accumulates raw stream bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameReader {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_len,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<ControlMessage>, FrameError> {
        let Some(total) = declared_length(&self.buffer, self.max_frame_len)? else {
            return Ok(None);
        };
        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total).freeze();
        frame.advance(4);
        let kind = frame.get_u16();
        let sequence = frame.get_u16();

        Ok(Some(ControlMessage {
            kind,
            sequence,
            payload: frame,
        }))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
