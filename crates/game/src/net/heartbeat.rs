use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, select, tick};

use super::connection::SessionState;
use super::correlator::Correlator;
use super::protocol::{ControlMessage, MessageType};
use super::transport::{FrameSender, TransportError};

/// Sends an empty HEARTBEAT every `interval` while the session is online.
///
/// Heartbeats take a sequence number but register no waiter. A failed send
/// is handed to `on_failure` and stops the thread; `shutdown` firing or being
/// dropped stops it as well.
pub fn spawn<S, F>(
    sender: Arc<S>,
    correlator: Arc<Correlator>,
    session: Arc<SessionState>,
    interval: Duration,
    shutdown: Receiver<()>,
    on_failure: F,
) -> std::io::Result<JoinHandle<()>>
where
    S: FrameSender + ?Sized + 'static,
    F: FnOnce(TransportError) + Send + 'static,
{
    thread::Builder::new()
        .name("heartbeat".to_string())
        .spawn(move || {
            let ticker = tick(interval);
            let failure = loop {
                select! {
                    recv(ticker) -> _ => {
                        if !session.state().is_online() {
                            continue;
                        }
                        let sequence = correlator.next_sequence();
                        let heartbeat =
                            ControlMessage::new(MessageType::Heartbeat, sequence, Bytes::new());
                        if let Err(e) = sender.send_frame(&heartbeat.encode()) {
                            break Some(e);
                        }
                        log::debug!("Heartbeat seq={}", sequence);
                    }
                    recv(shutdown) -> _ => break None,
                }
            };

            if let Some(e) = failure {
                log::error!("Heartbeat send failed: {}", e);
                on_failure(e);
            }
        })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crossbeam_channel::{bounded, unbounded};
    use parking_lot::Mutex;

    use super::*;
    use crate::net::connection::SessionEvent;
    use crate::net::protocol::{Decoded, decode};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(u16, usize)>>,
        fail: bool,
    }

    impl FrameSender for Recorder {
        fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Closed);
            }
            let Ok(Decoded::Frame { message, .. }) = decode(frame) else {
                panic!("heartbeat must be a full frame");
            };
            self.frames.lock().push((message.kind, message.payload.len()));
            Ok(())
        }
    }

    fn connected_session() -> Arc<SessionState> {
        let session = SessionState::new();
        session.apply(SessionEvent::ConnectStarted).unwrap();
        session.apply(SessionEvent::Connected).unwrap();
        session
    }

    #[test]
    fn test_sends_empty_heartbeats_while_online() {
        let recorder = Arc::new(Recorder::default());
        let (stop_tx, stop_rx) = bounded(1);
        let handle = spawn(
            Arc::clone(&recorder),
            Arc::new(Correlator::new()),
            connected_session(),
            Duration::from_millis(20),
            stop_rx,
            |_| {},
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.frames.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop_tx.send(()).unwrap();
        handle.join().unwrap();

        let frames = recorder.frames.lock();
        assert!(frames.len() >= 3);
        assert!(frames.iter().all(|&(kind, len)| kind == 9001 && len == 0));
    }

    #[test]
    fn test_silent_while_disconnected() {
        let recorder = Arc::new(Recorder::default());
        let (stop_tx, stop_rx) = bounded(1);
        let handle = spawn(
            Arc::clone(&recorder),
            Arc::new(Correlator::new()),
            SessionState::new(),
            Duration::from_millis(10),
            stop_rx,
            |_| {},
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        drop(stop_tx);
        handle.join().unwrap();
        assert!(recorder.frames.lock().is_empty());
    }

    #[test]
    fn test_send_failure_reports_and_stops() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        let (failed_tx, failed_rx) = unbounded();
        let handle = spawn(
            recorder,
            Arc::new(Correlator::new()),
            connected_session(),
            Duration::from_millis(10),
            stop_rx,
            move |e| {
                let _ = failed_tx.send(e.to_string());
            },
        )
        .unwrap();

        let reason = failed_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reason, "transport closed");
        handle.join().unwrap();
    }
}
