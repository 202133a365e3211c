//! Boundary to the message transport.
//!
//! A [`Transport`] carries whole text frames to and from the server and
//! reports connection changes as [`TransportEvent`]s, which the channel
//! drains once per tick. [`TcpTransport`] frames messages as
//! newline-delimited JSON over TCP; [`LoopbackTransport`] keeps everything
//! in memory.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Transport errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No connection is established
    NotConnected,
    /// Socket-level failure
    Io(String),
    /// Background runtime could not be created
    Runtime(String),
    /// The frame could not be produced
    Encode(String),
}

impl TransportError {
    /// Whether the same frame may succeed on a later connection.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Encode(_))
    }
}

impl From<crate::channel::protocol::ProtocolError> for TransportError {
    fn from(e: crate::channel::protocol::ProtocolError) -> Self {
        TransportError::Encode(e.to_string())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "Transport not connected"),
            TransportError::Io(e) => write!(f, "Transport IO error: {e}"),
            TransportError::Runtime(e) => write!(f, "Transport runtime error: {e}"),
            TransportError::Encode(e) => write!(f, "Transport encode error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Text(String),
    Error(String),
}

/// Server address.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}{}", self.host, self.port, self.path)
    }
}

/// A message transport.
pub trait Transport: Send {
    /// Start a connection attempt. The outcome arrives as a
    /// [`TransportEvent::Connected`] or [`TransportEvent::Disconnected`].
    fn connect(&mut self) -> Result<(), TransportError>;

    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Send a keep-alive that carries no message.
    fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Take the events that arrived since the last call.
    fn poll(&mut self) -> Vec<TransportEvent>;

    fn describe(&self) -> String;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Newline-delimited JSON frames over TCP.
///
/// Socket work runs on a small background tokio runtime owned by the
/// transport; frames cross to and from the tick thread over channels. A
/// blank line is a keep-alive in both directions.
pub struct TcpTransport {
    endpoint: Endpoint,
    runtime: tokio::runtime::Runtime,
    events_tx: crossbeam_channel::Sender<TransportEvent>,
    events_rx: crossbeam_channel::Receiver<TransportEvent>,
    outgoing: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    session: Option<tokio::task::JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("bio-sentinel-net")
            .enable_all()
            .build()
            .map_err(|e| TransportError::Runtime(format!("Failed to create runtime: {e}")))?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            endpoint,
            runtime,
            events_tx,
            events_rx,
            outgoing: None,
            session: None,
        })
    }

    fn close_session(&mut self) {
        self.outgoing = None;
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close_session();
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.close_session();

        let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
        let events = self.events_tx.clone();
        let endpoint = self.endpoint.clone();
        self.session = Some(self.runtime.spawn(run_session(endpoint, out_rx, events)));
        self.outgoing = Some(out_tx);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        outgoing
            .send(text.to_string())
            .map_err(|_| TransportError::NotConnected)
    }

    fn send_ping(&mut self) -> Result<(), TransportError> {
        self.send_text("")
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.events_rx.try_iter().collect()
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

async fn run_session(
    endpoint: Endpoint,
    mut outgoing: tokio::sync::mpsc::UnboundedReceiver<String>,
    events: crossbeam_channel::Sender<TransportEvent>,
) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let address = (endpoint.host.as_str(), endpoint.port);
    let connect = tokio::net::TcpStream::connect(address);
    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
        Err(_) => {
            let _ = events.send(TransportEvent::Error("connect timed out".to_string()));
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };

    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let _ = events.send(TransportEvent::Connected);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        debug!("Ping received");
                    } else {
                        let _ = events.send(TransportEvent::Text(line));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            },
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    let mut bytes = frame.into_bytes();
                    bytes.push(b'\n');
                    if let Err(e) = write_half.write_all(&bytes).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = events.send(TransportEvent::Disconnected);
}

#[derive(Debug, Default)]
struct LoopbackState {
    accepting: bool,
    connected: bool,
    attempts: u32,
    pings: u32,
    pending: VecDeque<TransportEvent>,
    sent: Vec<String>,
}

/// In-memory transport. The paired [`LoopbackHandle`] plays the server.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

/// Server side of a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoopbackTransport {
    /// A transport whose connection attempts succeed.
    pub fn new() -> Self {
        let transport = Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
        };
        transport.handle().set_accepting(true);
        transport
    }

    /// A transport whose connection attempts fail until accepted.
    pub fn refusing() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
        }
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHandle {
    pub fn set_accepting(&self, accepting: bool) {
        lock(&self.state).accepting = accepting;
    }

    /// Deliver a text frame to the device.
    pub fn inject(&self, text: &str) {
        let mut state = lock(&self.state);
        if state.connected {
            state.pending.push_back(TransportEvent::Text(text.to_string()));
        } else {
            warn!("Loopback frame dropped, not connected");
        }
    }

    /// Drop the connection from the server side.
    pub fn disconnect(&self) {
        let mut state = lock(&self.state);
        if state.connected {
            state.connected = false;
            state.pending.push_back(TransportEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    pub fn pings(&self) -> u32 {
        lock(&self.state).pings
    }

    /// Frames sent by the device so far.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// Take and clear the frames sent by the device.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.state).sent)
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if state.accepting {
            state.connected = true;
            state.pending.push_back(TransportEvent::Connected);
        } else {
            state.connected = false;
            state.pending.push_back(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    fn send_ping(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.pings += 1;
        Ok(())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        lock(&self.state).pending.drain(..).collect()
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_connect_and_exchange() {
        let mut transport = LoopbackTransport::new();
        let server = transport.handle();

        assert_eq!(transport.send_text("early"), Err(TransportError::NotConnected));
        transport.connect().unwrap();
        assert_eq!(transport.poll(), vec![TransportEvent::Connected]);

        transport.send_text("hello").unwrap();
        transport.send_ping().unwrap();
        server.inject(r#"{"type":"stop"}"#);

        assert_eq!(server.sent(), vec!["hello".to_string()]);
        assert_eq!(server.pings(), 1);
        assert_eq!(
            transport.poll(),
            vec![TransportEvent::Text(r#"{"type":"stop"}"#.to_string())]
        );

        server.disconnect();
        assert_eq!(transport.poll(), vec![TransportEvent::Disconnected]);
        assert!(transport.send_text("late").is_err());
    }

    #[test]
    fn test_loopback_refusing_reports_disconnect() {
        let mut transport = LoopbackTransport::refusing();
        let server = transport.handle();

        transport.connect().unwrap();
        assert_eq!(transport.poll(), vec![TransportEvent::Disconnected]);
        assert_eq!(server.connect_attempts(), 1);

        server.set_accepting(true);
        transport.connect().unwrap();
        assert_eq!(transport.poll(), vec![TransportEvent::Connected]);
        assert!(server.is_connected());
    }

    #[test]
    fn test_tcp_transport_exchanges_lines() {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;
        use std::time::Instant;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpTransport::new(Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            path: "/ws/bio-sentinel".to_string(),
        })
        .unwrap();
        assert_eq!(transport.describe(), format!("tcp://127.0.0.1:{port}/ws/bio-sentinel"));
        transport.connect().unwrap();

        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"\n{\"type\":\"request_status\"}\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < 2 && Instant::now() < deadline {
            events.extend(transport.poll());
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(events[0], TransportEvent::Connected);
        assert_eq!(
            events[1],
            TransportEvent::Text("{\"type\":\"request_status\"}".to_string())
        );

        transport.send_text("{\"type\":\"device_status\"}").unwrap();
        transport.send_ping().unwrap();
        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "{\"type\":\"device_status\"}\n");
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "\n");
    }
}
