//! Transport abstraction: newline-delimited documents over a duplex link.

use crate::error::{NodeError, NodeResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A persistent duplex link carrying one JSON document per line.
///
/// Send and receive are independently locked, so one worker can block in
/// `recv_line` while another sends.
pub trait Transport: Send + Sync {
    /// Sends one document line (the newline is appended here).
    fn send_line(&self, line: &str) -> NodeResult<()>;

    /// Receives the next document line.
    ///
    /// `Ok(None)` means the timeout elapsed with the link still healthy;
    /// a closed link is an error.
    fn recv_line(&self, timeout: Duration) -> NodeResult<Option<String>>;

    /// Tears the link down. Idempotent.
    fn close(&self);

    /// Returns true while the link is usable.
    fn is_open(&self) -> bool;

    /// Address label of the remote end, for logs and directory keys.
    fn peer_label(&self) -> String;
}

/// Accepts inbound transports.
pub trait TransportListener: Send + Sync {
    /// Waits up to `timeout` for one inbound connection.
    fn accept(&self, timeout: Duration) -> NodeResult<Option<Box<dyn Transport>>>;

    /// The address this listener is bound to.
    fn local_addr(&self) -> NodeResult<SocketAddr>;
}

/// `Transport` over a TCP stream.
pub struct TcpTransport {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
    open: AtomicBool,
    peer: String,
}

impl TcpTransport {
    /// Connects to `addr` ("host:port") within `timeout`.
    pub fn connect(addr: &str, timeout: Duration) -> NodeResult<Self> {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| NodeError::transport_fatal(format!("cannot resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| NodeError::transport_fatal(format!("no address for {addr}")))?;
        let stream = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|e| NodeError::transport_retryable(format!("connect to {addr}: {e}")))?;
        Self::from_stream(stream)
    }

    /// Wraps an accepted or connected stream.
    pub fn from_stream(stream: TcpStream) -> NodeResult<Self> {
        stream
            .set_nodelay(true)
            .map_err(|e| NodeError::transport_fatal(e.to_string()))?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let reader = stream
            .try_clone()
            .map_err(|e| NodeError::transport_fatal(e.to_string()))?;

        Ok(Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(stream),
            open: AtomicBool::new(true),
            peer,
        })
    }
}

impl Transport for TcpTransport {
    fn send_line(&self, line: &str) -> NodeResult<()> {
        if !self.is_open() {
            return Err(NodeError::ConnectionClosed);
        }
        let mut writer = self.writer.lock();
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        result.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            NodeError::transport_retryable(format!("send to {}: {}", self.peer, e))
        })
    }

    fn recv_line(&self, timeout: Duration) -> NodeResult<Option<String>> {
        if !self.is_open() {
            return Err(NodeError::ConnectionClosed);
        }
        let mut reader = self.reader.lock();
        reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| NodeError::transport_fatal(e.to_string()))?;

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                self.open.store(false, Ordering::SeqCst);
                Err(NodeError::ConnectionClosed)
            }
            Ok(_) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => {
                self.open.store(false, Ordering::SeqCst);
                Err(NodeError::transport_retryable(format!(
                    "recv from {}: {}",
                    self.peer, e
                )))
            }
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().shutdown(std::net::Shutdown::Both);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn peer_label(&self) -> String {
        self.peer.clone()
    }
}

/// `TransportListener` over a TCP socket.
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Binds to `addr` ("host:port").
    pub fn bind(addr: &str) -> NodeResult<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| NodeError::transport_fatal(format!("bind {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| NodeError::transport_fatal(e.to_string()))?;
        Ok(Self { listener })
    }
}

impl TransportListener for TcpTransportListener {
    fn accept(&self, timeout: Duration) -> NodeResult<Option<Box<dyn Transport>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| NodeError::transport_fatal(e.to_string()))?;
                    return Ok(Some(Box::new(TcpTransport::from_stream(stream)?)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(NodeError::transport_retryable(e.to_string())),
            }
        }
    }

    fn local_addr(&self) -> NodeResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| NodeError::transport_fatal(e.to_string()))
    }
}

struct Channel {
    queue: Mutex<VecDeque<String>>,
    signal: Condvar,
    open: AtomicBool,
}

impl Channel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            open: AtomicBool::new(true),
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _guard = self.queue.lock();
        self.signal.notify_all();
    }
}

/// In-process duplex transport for tests.
pub struct MemoryTransport {
    inbox: Arc<Channel>,
    outbox: Arc<Channel>,
    label: String,
}

/// Creates a connected pair of in-process transports.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let a_to_b = Channel::new();
    let b_to_a = Channel::new();
    (
        MemoryTransport {
            inbox: Arc::clone(&b_to_a),
            outbox: Arc::clone(&a_to_b),
            label: "memory:a".into(),
        },
        MemoryTransport {
            inbox: a_to_b,
            outbox: b_to_a,
            label: "memory:b".into(),
        },
    )
}

impl Transport for MemoryTransport {
    fn send_line(&self, line: &str) -> NodeResult<()> {
        if !self.outbox.open.load(Ordering::SeqCst) {
            return Err(NodeError::ConnectionClosed);
        }
        self.outbox.queue.lock().push_back(line.to_string());
        self.outbox.signal.notify_one();
        Ok(())
    }

    fn recv_line(&self, timeout: Duration) -> NodeResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inbox.queue.lock();
        loop {
            if let Some(line) = queue.pop_front() {
                return Ok(Some(line));
            }
            if !self.inbox.open.load(Ordering::SeqCst) {
                return Err(NodeError::ConnectionClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.inbox.signal.wait_for(&mut queue, deadline - now);
        }
    }

    fn close(&self) {
        self.inbox.close();
        self.outbox.close();
    }

    fn is_open(&self) -> bool {
        self.inbox.open.load(Ordering::SeqCst) && self.outbox.open.load(Ordering::SeqCst)
    }

    fn peer_label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn memory_pair_exchanges_lines() {
        let (a, b) = memory_pair();

        a.send_line("hello").unwrap();
        assert_eq!(
            b.recv_line(Duration::from_millis(100)).unwrap(),
            Some("hello".to_string())
        );

        b.send_line("back").unwrap();
        assert_eq!(
            a.recv_line(Duration::from_millis(100)).unwrap(),
            Some("back".to_string())
        );
    }

    #[test]
    fn memory_recv_times_out_when_idle() {
        let (a, _b) = memory_pair();
        assert_eq!(a.recv_line(Duration::from_millis(20)).unwrap(), None);
    }

    #[test]
    fn closed_memory_transport_errors() {
        let (a, b) = memory_pair();
        a.close();

        assert!(!b.is_open());
        assert!(matches!(
            b.recv_line(Duration::from_millis(20)),
            Err(NodeError::ConnectionClosed)
        ));
        assert!(matches!(
            b.send_line("x"),
            Err(NodeError::ConnectionClosed)
        ));
    }

    #[test]
    fn memory_recv_wakes_on_late_send() {
        let (a, b) = memory_pair();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            a.send_line("late").unwrap();
            a // keep the end alive until the line is delivered
        });

        assert_eq!(
            b.recv_line(Duration::from_millis(500)).unwrap(),
            Some("late".to_string())
        );
        sender.join().unwrap();
    }

    #[test]
    fn tcp_roundtrip() {
        let listener = TcpTransportListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let transport =
                TcpTransport::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
            transport.send_line(r#"{"command":"ping"}"#).unwrap();
            transport.recv_line(Duration::from_secs(2)).unwrap()
        });

        let server = listener
            .accept(Duration::from_secs(2))
            .unwrap()
            .expect("no inbound connection");
        let line = server.recv_line(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(line, r#"{"command":"ping"}"#);
        server.send_line(r#"{"command":"pong"}"#).unwrap();

        assert_eq!(
            client.join().unwrap(),
            Some(r#"{"command":"pong"}"#.to_string())
        );
    }

    #[test]
    fn tcp_accept_times_out() {
        let listener = TcpTransportListener::bind("127.0.0.1:0").unwrap();
        let accepted = listener.accept(Duration::from_millis(30)).unwrap();
        assert!(accepted.is_none());
    }
}
