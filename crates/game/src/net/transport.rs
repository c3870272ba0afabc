use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::protocol::{ControlMessage, FrameError, FrameReader};
use super::stats::{NetworkStats, TransportStats};
use crate::config::ClientConfig;

const READ_CHUNK: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("transport closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("control stream lost sync: {0}")]
    Frame(#[from] FrameError),
}

/// Anything that can put an encoded frame on the control channel.
pub trait FrameSender: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError>;
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::Resolve(format!("{host}:{port}")))?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolve(format!("{host}:{port}")));
    }
    Ok(addrs)
}

/// The pair of sockets behind a session: a TCP control stream and a UDP
/// socket for telemetry. Carries bytes only; framing above the byte level
/// and all message semantics live elsewhere.
pub struct Transport {
    stream: TcpStream,
    writer: Mutex<TcpStream>,
    udp: Mutex<Option<UdpSocket>>,
    telemetry_addr: SocketAddr,
    closed: AtomicBool,
    stats: TransportStats,
    max_frame_len: usize,
}

impl Transport {
    pub fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut last_err = None;
        let mut stream = None;
        for addr in resolve(&config.host, config.tcp_port)? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some((addr, e)),
            }
        }
        let stream = match (stream, last_err) {
            (Some(stream), _) => stream,
            (None, Some((addr, source))) => {
                return Err(TransportError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
            (None, None) => {
                return Err(TransportError::Resolve(format!(
                    "{}:{}",
                    config.host, config.tcp_port
                )));
            }
        };
        stream.set_nodelay(true)?;

        let telemetry_addr = resolve(&config.host, config.udp_port)?[0];
        let unspecified = match telemetry_addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let udp = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        udp.set_nonblocking(true)?;

        let writer = stream.try_clone()?;

        log::info!(
            "Connected to {} (telemetry {} from {})",
            stream.peer_addr()?,
            telemetry_addr,
            udp.local_addr()?
        );

        Ok(Self {
            stream,
            writer: Mutex::new(writer),
            udp: Mutex::new(Some(udp)),
            telemetry_addr,
            closed: AtomicBool::new(false),
            stats: TransportStats::default(),
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.snapshot()
    }

    pub fn send_datagram(&self, data: &[u8]) -> Result<(), TransportError> {
        let udp = self.udp.lock();
        let udp = udp.as_ref().ok_or(TransportError::Closed)?;
        let sent = udp.send_to(data, self.telemetry_addr)?;
        self.stats.record_datagram_sent(sent);
        Ok(())
    }

    /// Non-blocking receive; `Ok(None)` when nothing is queued.
    pub fn recv_datagram(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let udp = self.udp.lock();
        let udp = udp.as_ref().ok_or(TransportError::Closed)?;
        match udp.recv_from(buf) {
            Ok((size, _)) => {
                self.stats.record_datagram_received(size);
                Ok(Some(size))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record_datagram_dropped(&self) {
        self.stats.record_datagram_dropped();
    }

    /// Shuts both directions of the control stream, which also unblocks the
    /// receive loop, and releases the telemetry socket. Safe to call more
    /// than once and from any thread.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                log::debug!("Control stream shutdown: {}", e);
            }
        }
        drop(self.udp.lock().take());
    }

    /// Starts the control receive loop on its own thread. `on_frame` sees
    /// every complete frame in arrival order; `on_exit` runs once when the
    /// loop stops, with `Ok` for an orderly close by either side.
    pub fn spawn_receiver<F, E>(
        self: &Arc<Self>,
        on_frame: F,
        on_exit: E,
    ) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(ControlMessage) + Send + 'static,
        E: FnOnce(Result<(), TransportError>) + Send + 'static,
    {
        let stream = self.stream.try_clone()?;
        let transport = Arc::clone(self);
        thread::Builder::new()
            .name("control-rx".to_string())
            .spawn(move || {
                let result = transport.receive_loop(stream, on_frame);
                on_exit(result);
            })
    }

    fn receive_loop<F>(&self, mut stream: TcpStream, mut on_frame: F) -> Result<(), TransportError>
    where
        F: FnMut(ControlMessage),
    {
        let mut reader = FrameReader::new(self.max_frame_len);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.is_closed() {
                        log::info!("Server closed the control connection");
                    }
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) if self.is_closed() => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            self.stats.record_bytes_received(read);
            reader.push(&chunk[..read]);
            while let Some(message) = reader.next_frame()? {
                self.stats.record_frame_received();
                on_frame(message);
            }
        }
    }
}

impl FrameSender for Transport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.writer.lock().write_all(frame)?;
        self.stats.record_frame_sent(frame.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::net::protocol::{MessageType, encode};

    fn local_config(tcp_port: u16, udp_port: u16) -> ClientConfig {
        ClientConfig {
            tcp_port,
            udp_port,
            connect_timeout_ms: 1_000,
            ..ClientConfig::default()
        }
    }

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_connect_refused() {
        let (listener, port) = listener();
        drop(listener);

        let result = Transport::connect(&local_config(port, 9));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_send_frame_reaches_peer() {
        let (listener, port) = listener();
        let transport = Transport::connect(&local_config(port, 9)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let frame = encode(MessageType::Heartbeat.as_u16(), 4, &[]);
        transport.send_frame(&frame).unwrap();

        let mut received = [0u8; 8];
        server.read_exact(&mut received).unwrap();
        assert_eq!(&received[..], &frame[..]);
        assert_eq!(transport.stats().frames_sent, 1);
        assert_eq!(transport.stats().bytes_sent, 8);
    }

    #[test]
    fn test_receiver_reassembles_split_writes() {
        let (listener, port) = listener();
        let transport = Arc::new(Transport::connect(&local_config(port, 9)).unwrap());
        let (mut server, _) = listener.accept().unwrap();

        let (frames_tx, frames_rx) = unbounded();
        let (exit_tx, exit_rx) = unbounded();
        let handle = transport
            .spawn_receiver(
                move |message| {
                    let _ = frames_tx.send(message);
                },
                move |result| {
                    let _ = exit_tx.send(result.is_ok());
                },
            )
            .unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(2009, 0, b"first"));
        stream.extend_from_slice(&encode(9001, 0, b""));
        for piece in stream.chunks(3) {
            server.write_all(piece).unwrap();
            server.flush().unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        let first = frames_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = frames_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(&first.payload[..], b"first");
        assert_eq!(second.message_type(), Some(MessageType::Heartbeat));

        drop(server);
        assert!(exit_rx.recv_timeout(Duration::from_secs(2)).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn test_malformed_header_ends_loop_with_error() {
        let (listener, port) = listener();
        let transport = Arc::new(Transport::connect(&local_config(port, 9)).unwrap());
        let (mut server, _) = listener.accept().unwrap();

        let (exit_tx, exit_rx) = unbounded();
        transport
            .spawn_receiver(
                |_| {},
                move |result| {
                    let _ = exit_tx.send(result);
                },
            )
            .unwrap();

        server.write_all(&[0, 0, 0, 3, 0, 0, 0, 0]).unwrap();
        let result = exit_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::Malformed(3)))
        ));
    }

    #[test]
    fn test_close_unblocks_receiver_and_is_idempotent() {
        let (listener, port) = listener();
        let transport = Arc::new(Transport::connect(&local_config(port, 9)).unwrap());
        let (_server, _) = listener.accept().unwrap();

        let (exit_tx, exit_rx) = unbounded();
        let handle = transport
            .spawn_receiver(
                |_| {},
                move |result| {
                    let _ = exit_tx.send(result.is_ok());
                },
            )
            .unwrap();

        transport.close();
        transport.close();

        assert!(exit_rx.recv_timeout(Duration::from_secs(2)).unwrap());
        handle.join().unwrap();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send_frame(&[0; 8]),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_datagrams_both_ways() {
        let (listener, port) = listener();
        let server_udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        server_udp
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let udp_port = server_udp.local_addr().unwrap().port();

        let transport = Transport::connect(&local_config(port, udp_port)).unwrap();
        let _accepted = listener.accept().unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(transport.recv_datagram(&mut buf).unwrap(), None);

        transport.send_datagram(b"ping").unwrap();
        let (size, from) = server_udp.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..size], b"ping");

        server_udp.send_to(b"pong", from).unwrap();
        let mut received = None;
        for _ in 0..200 {
            if let Some(size) = transport.recv_datagram(&mut buf).unwrap() {
                received = Some(buf[..size].to_vec());
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(received.as_deref(), Some(&b"pong"[..]));
        assert_eq!(transport.stats().datagrams_received, 1);
    }

    #[test]
    fn test_close_releases_udp_socket() {
        let (listener, port) = listener();
        let transport = Transport::connect(&local_config(port, 9)).unwrap();
        let _accepted = listener.accept().unwrap();
        let udp_addr = transport.udp.lock().as_ref().unwrap().local_addr().unwrap();

        transport.close();

        assert!(transport.udp.lock().is_none());
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.recv_datagram(&mut buf),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.send_datagram(b"late"),
            Err(TransportError::Closed)
        ));
        UdpSocket::bind(udp_addr).expect("port released on close");
    }
}
