use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use super::protocol::{ControlMessage, MessageType};
use super::transport::{FrameSender, TransportError};

const SEQUENCE_SPACE: usize = u16::MAX as usize + 1;

#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("all 65536 sequence numbers are awaiting a response")]
    SequenceExhausted,
    #[error("send failed: {0}")]
    Send(#[from] TransportError),
    #[error("session closed before a response arrived")]
    SessionClosed,
}

/// Matches responses to outstanding requests by sequence number.
///
/// Each request owns a one-shot channel; whichever of the response,
/// the timeout or [`Correlator::fail_all`] removes the table entry first
/// decides the outcome, so a waiter is resolved exactly once.
#[derive(Debug)]
pub struct Correlator {
    next_sequence: AtomicU16,
    pending: Mutex<HashMap<u16, Sender<ControlMessage>>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicU16::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Hands out the next sequence number, wrapping at 65535.
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `payload` as a `kind` request and blocks until its response
    /// arrives. `Ok(None)` means the timeout elapsed first.
    pub fn send_and_wait(
        &self,
        sender: &dyn FrameSender,
        kind: MessageType,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Option<ControlMessage>, CorrelatorError> {
        let (tx, rx) = bounded(1);
        let sequence = self.register(tx)?;

        let request = ControlMessage::new(kind, sequence, payload);
        if let Err(err) = sender.send_frame(&request.encode()) {
            self.forget(sequence);
            return Err(err.into());
        }
        log::trace!("Sent {:?} seq={} ({} bytes)", kind, sequence, request.total_length());

        match rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(sequence);
                // A response may have landed between the timeout and the removal.
                Ok(rx.try_recv().ok())
            }
            Err(RecvTimeoutError::Disconnected) => Err(CorrelatorError::SessionClosed),
        }
    }

    fn register(&self, tx: Sender<ControlMessage>) -> Result<u16, CorrelatorError> {
        let mut pending = self.pending.lock();
        if pending.len() >= SEQUENCE_SPACE {
            return Err(CorrelatorError::SequenceExhausted);
        }
        loop {
            let sequence = self.next_sequence();
            if let Entry::Vacant(slot) = pending.entry(sequence) {
                slot.insert(tx);
                return Ok(sequence);
            }
        }
    }

    fn forget(&self, sequence: u16) {
        self.pending.lock().remove(&sequence);
    }

    /// Delivers `message` to the waiter registered under its sequence.
    /// Returns false when nobody is waiting, e.g. after a timeout.
    pub fn complete_if_pending(&self, message: ControlMessage) -> bool {
        let Some(tx) = self.pending.lock().remove(&message.sequence) else {
            return false;
        };
        tx.send(message).is_ok()
    }

    /// Wakes every waiter with [`CorrelatorError::SessionClosed`].
    pub fn fail_all(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            log::debug!("Failing {} pending requests", dropped.len());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
