//! Structured observability events emitted by the engine.
//!
//! Every component (client state machine, server, bridge) reports what it
//! does through `EngineEvent` values instead of raising errors at the
//! caller. Hosts subscribe to the live stream and can additionally keep a
//! bounded `EventLog` of recent records for display or diagnostics.

use crate::constants::EVENT_LOG_CAPACITY;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Everything the engine reports to its host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    // Connection lifecycle
    Connecting,
    Connected,
    LoggingIn,
    Online,
    Disconnected,
    Error { message: String },

    // Wire traffic
    PacketSent { proto: u8, len: usize, hex: String },
    PacketReceived { proto: u8, len: usize, hex: String },

    // Protocol acknowledgements
    HeartbeatAck,
    LocationAck,

    // Server-issued commands
    CommandReceived { text: String },
    OutputCommand { output: u8, state: u8 },
    CommandAck { text: String },

    Warning { message: String },

    // Bridge lifecycle and traffic
    BridgeConnected,
    BridgeDisconnected,
    BridgeTx { line: String },
    BridgeRx { line: String },
}

impl EngineEvent {
    /// Short label for log lines and UIs.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::EngineEvent;
    ///
    /// assert_eq!(EngineEvent::Online.label(), "online");
    /// assert_eq!(
    ///     EngineEvent::Warning { message: "late ack".to_string() }.label(),
    ///     "warning"
    /// );
    /// ```
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            EngineEvent::Connecting => "connecting",
            EngineEvent::Connected => "connected",
            EngineEvent::LoggingIn => "logging_in",
            EngineEvent::Online => "online",
            EngineEvent::Disconnected => "disconnected",
            EngineEvent::Error { .. } => "error",
            EngineEvent::PacketSent { .. } => "packet_sent",
            EngineEvent::PacketReceived { .. } => "packet_received",
            EngineEvent::HeartbeatAck => "heartbeat_ack",
            EngineEvent::LocationAck => "location_ack",
            EngineEvent::CommandReceived { .. } => "command_received",
            EngineEvent::OutputCommand { .. } => "output_command",
            EngineEvent::CommandAck { .. } => "command_ack",
            EngineEvent::Warning { .. } => "warning",
            EngineEvent::BridgeConnected => "bridge_connected",
            EngineEvent::BridgeDisconnected => "bridge_disconnected",
            EngineEvent::BridgeTx { .. } => "bridge_tx",
            EngineEvent::BridgeRx { .. } => "bridge_rx",
        }
    }
}

/// A logged event with its arrival timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

impl EventRecord {
    #[must_use]
    pub fn new(event: EngineEvent) -> Self {
        EventRecord {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Bounded ring of recent events; the oldest record is evicted once the
/// capacity is reached.
#[derive(Debug)]
pub struct EventLog {
    records: VecDeque<EventRecord>,
    capacity: usize,
}

impl EventLog {
    /// Create a log with the standard capacity (500 records).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        EventLog {
            records: VecDeque::with_capacity(capacity.min(EVENT_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest record when full.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::{EngineEvent, EventLog};
    ///
    /// let mut log = EventLog::with_capacity(2);
    /// log.push(EngineEvent::Connecting);
    /// log.push(EngineEvent::Connected);
    /// log.push(EngineEvent::Online);
    ///
    /// // Capacity 2: the oldest record was evicted.
    /// assert_eq!(log.len(), 2);
    /// assert_eq!(log.snapshot()[0].event, EngineEvent::Connected);
    /// ```
    pub fn push(&mut self, event: EngineEvent) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventRecord::new(event));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Clone the current contents, oldest-first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
