//! Telemetry channel to the server.
//!
//! This module contains:
//! - Reconnection backoff
//! - The JSON command/event protocol
//! - The transport boundary and its TCP and in-memory implementations
//!
//! [`TelemetryChannel`] keeps one long-lived connection alive. Inbound
//! frames are parsed into [`Command`]s and queued; the mode controller drains
//! the queue once per tick.

pub mod backoff;
pub mod protocol;
pub mod transport;

pub use backoff::Backoff;
pub use protocol::{parse_command, Command, Event, EventBody, ProtocolError, Severity};
pub use transport::{
    Endpoint, LoopbackHandle, LoopbackTransport, TcpTransport, Transport, TransportError,
    TransportEvent,
};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Completion events held while disconnected.
pub const OUTBOX_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the connection for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnect_attempt: u32,
    pub next_reconnect_delay_ms: u64,
}

/// Channel timing.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub heartbeat_interval_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

/// Long-lived, self-reconnecting message channel.
pub struct TelemetryChannel {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    backoff: Backoff,
    heartbeat_interval_ms: u64,
    last_ping_ms: u64,
    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,
    outbox: VecDeque<Event>,
    connected_edge: bool,
}

impl TelemetryChannel {
    pub fn new(transport: Box<dyn Transport>, settings: ChannelSettings) -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        Self {
            transport,
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(
                settings.reconnect_initial_delay_ms,
                settings.reconnect_max_delay_ms,
            ),
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            last_ping_ms: 0,
            commands_tx,
            commands_rx,
            outbox: VecDeque::with_capacity(OUTBOX_CAPACITY),
            connected_edge: false,
        }
    }

    /// Make the first connection attempt.
    pub fn begin(&mut self, now_ms: u64) {
        info!("Connecting to {}", self.transport.describe());
        self.backoff.start(now_ms);
        self.open();
    }

    /// One maintenance pass: apply transport events, then keep the
    /// connection alive or retry it.
    pub fn maintain(&mut self, now_ms: u64) {
        for event in self.transport.poll() {
            self.handle_transport_event(event, now_ms);
        }

        match self.state {
            ConnectionState::Connected => {
                if now_ms.saturating_sub(self.last_ping_ms) >= self.heartbeat_interval_ms {
                    if let Err(e) = self.transport.send_ping() {
                        warn!("Keep-alive failed: {e}");
                    }
                    self.last_ping_ms = now_ms;
                }
            }
            ConnectionState::Disconnected => self.attempt_reconnect(now_ms),
            ConnectionState::Connecting => {}
        }
    }

    fn attempt_reconnect(&mut self, now_ms: u64) {
        if !self.backoff.ready(now_ms) {
            return;
        }

        self.backoff.record_attempt(now_ms);
        info!(
            "Reconnecting (attempt {}, next in {}ms)",
            self.backoff.attempts(),
            self.backoff.delay_ms()
        );
        self.open();
    }

    fn open(&mut self) {
        match self.transport.connect() {
            Ok(()) => self.state = ConnectionState::Connecting,
            Err(e) => {
                warn!("Connection attempt failed: {e}");
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now_ms: u64) {
        match event {
            TransportEvent::Connected => {
                info!("Connected to {}", self.transport.describe());
                self.state = ConnectionState::Connected;
                self.backoff.reset();
                self.last_ping_ms = now_ms;
                self.connected_edge = true;
                self.flush_outbox();
            }
            TransportEvent::Disconnected => {
                if self.state == ConnectionState::Connected {
                    info!("Disconnected");
                } else {
                    debug!("Connection attempt did not succeed");
                }
                self.state = ConnectionState::Disconnected;
            }
            TransportEvent::Text(text) => self.handle_message(&text),
            TransportEvent::Error(e) => warn!("Transport error: {e}"),
        }
    }

    fn handle_message(&mut self, text: &str) {
        match parse_command(text) {
            Ok(command) => {
                info!("Received command: {}", command.name());
                // The receiver lives in self, so the queue cannot be closed
                let _ = self.commands_tx.send(command);
            }
            Err(e) => warn!("Dropped inbound message: {e}"),
        }
    }

    /// Next queued command, if any.
    pub fn next_command(&self) -> Option<Command> {
        self.commands_rx.try_recv().ok()
    }

    /// A sender feeding the same command queue, for local control.
    pub fn command_sender(&self) -> Sender<Command> {
        self.commands_tx.clone()
    }

    /// Send an event now. Fails when not connected.
    pub fn send(&mut self, event: &Event) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let text = event.to_json()?;
        self.transport.send_text(&text)
    }

    /// Send an event, holding completion events for the next connection if
    /// it cannot go out now. Other events are dropped when disconnected.
    pub fn publish(&mut self, event: Event) {
        match self.send(&event) {
            Ok(()) => debug!("Sent {}", event.kind()),
            Err(e) if !e.is_retryable() => error!("Dropped {}: {e}", event.kind()),
            Err(e) if event.is_completion() => {
                warn!("Holding {} until reconnected: {e}", event.kind());
                if self.outbox.len() == OUTBOX_CAPACITY {
                    if let Some(dropped) = self.outbox.pop_front() {
                        warn!("Outbox full, dropped {}", dropped.kind());
                    }
                }
                self.outbox.push_back(event);
            }
            Err(e) => debug!("Dropped {}: {e}", event.kind()),
        }
    }

    fn flush_outbox(&mut self) {
        while let Some(event) = self.outbox.pop_front() {
            match self.send(&event) {
                Ok(()) => info!("Delivered held {}", event.kind()),
                Err(e) if !e.is_retryable() => error!("Dropped held {}: {e}", event.kind()),
                Err(e) => {
                    error!("Failed to flush {}: {e}", event.kind());
                    self.outbox.push_front(event);
                    break;
                }
            }
        }
    }

    /// True once after each transition to connected.
    pub fn take_connected_edge(&mut self) -> bool {
        std::mem::take(&mut self.connected_edge)
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.is_connected(),
            reconnect_attempt: self.backoff.attempts(),
            next_reconnect_delay_ms: self.backoff.delay_ms(),
        }
    }
}
