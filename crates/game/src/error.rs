use crate::net::{ConnectionState, CorrelatorError, MessageType, PayloadError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{op} is not allowed while {state}")]
    Precondition {
        op: &'static str,
        state: ConnectionState,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("{0:?} timed out waiting for a response")]
    Timeout(MessageType),

    #[error("{op} rejected by server{}", reason_suffix(.reason))]
    Rejected {
        op: &'static str,
        reason: Option<String>,
    },

    #[error("server error: {0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session closed")]
    SessionClosed,

    #[error("no free sequence numbers")]
    SequenceExhausted,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl From<PayloadError> for ClientError {
    fn from(err: PayloadError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<CorrelatorError> for ClientError {
    fn from(err: CorrelatorError) -> Self {
        match err {
            CorrelatorError::SequenceExhausted => ClientError::SequenceExhausted,
            CorrelatorError::Send(e) => ClientError::Transport(e),
            CorrelatorError::SessionClosed => ClientError::SessionClosed,
        }
    }
}

impl ClientError {
    /// True when the session is gone and the caller must reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ClientError::Precondition {
            op: "join_room",
            state: ConnectionState::Connected,
        };
        assert_eq!(err.to_string(), "join_room is not allowed while CONNECTED");

        let err = ClientError::Rejected {
            op: "login",
            reason: Some("bad password".to_string()),
        };
        assert_eq!(err.to_string(), "login rejected by server: bad password");

        let err = ClientError::Rejected {
            op: "leave_room",
            reason: None,
        };
        assert_eq!(err.to_string(), "leave_room rejected by server");
    }

    #[test]
    fn test_correlator_errors_map() {
        assert!(matches!(
            ClientError::from(CorrelatorError::SessionClosed),
            ClientError::SessionClosed
        ));
        assert!(ClientError::from(CorrelatorError::Send(TransportError::Closed)).is_fatal());
        assert!(!ClientError::Timeout(MessageType::LoginRequest).is_fatal());
    }
}
