//! The tracker gateway: a GT06 client wired to the serial command
//! bridge.
//!
//! The gateway subscribes to the client's events, forwards decoded
//! server commands into the bridge (the client has already sent the
//! wire acknowledgement by the time the event is published, so the
//! ACK-before-serial-write ordering holds), republishes everything on
//! one unified stream and keeps a bounded [`EventLog`] of recent
//! records.
//!
//! Commands from out-of-band sources (push notifications, a local
//! console) enter through [`Gateway::inject_command`] and flow through
//! the identical dispatch path as TCP 0x80 frames.
//!
//! ```no_run
//! use rastro_bridge::{AnyLink, SerialLink};
//! use rastro_core::ClientConfig;
//! use rastro_gateway::Gateway;
//!
//! # async fn example() -> rastro_core::Result<()> {
//! let config = ClientConfig::new("tracking.example.com", "356932080000000")?;
//! let link = AnyLink::from(SerialLink::new("/dev/ttyUSB0", SerialLink::DEFAULT_BAUD));
//!
//! let gateway = Gateway::new(config, link)?;
//! gateway.client().connect();
//!
//! let mut events = gateway.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use rastro_bridge::{AnyLink, Bridge, BridgeHandle, BridgeStats};
use rastro_core::{ClientConfig, EngineEvent, EventLog, EventRecord, Result};
use rastro_network::Gt06Client;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A running gateway: one tracker client, one bridge, one event log.
pub struct Gateway {
    client: Gt06Client,
    bridge: BridgeHandle,
    events: broadcast::Sender<EngineEvent>,
    log: Arc<Mutex<EventLog>>,
    pump: JoinHandle<()>,
    bridge_task: JoinHandle<()>,
}

impl Gateway {
    /// Build the gateway from a validated client configuration and a
    /// command link.
    ///
    /// # Errors
    /// Returns the client's `Error::Config`/`Error::InvalidImei` for
    /// unusable configuration.
    pub fn new(config: ClientConfig, link: AnyLink) -> Result<Self> {
        let client = Gt06Client::new(config)?;
        let (bridge, bridge_handle, directives) = Bridge::new(link);
        let bridge_task = tokio::spawn(bridge.run(directives));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let log = Arc::new(Mutex::new(EventLog::new()));

        let pump = tokio::spawn(pump_events(
            client.subscribe(),
            bridge_handle.subscribe(),
            bridge_handle.clone(),
            events.clone(),
            log.clone(),
        ));

        Ok(Gateway {
            client,
            bridge: bridge_handle,
            events,
            log,
            pump,
            bridge_task,
        })
    }

    /// The tracker client (connect/disconnect/positions/alarms).
    #[must_use]
    pub fn client(&self) -> &Gt06Client {
        &self.client
    }

    /// The bridge handle (manual link control, stats).
    #[must_use]
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    /// Feed a textual command from an out-of-band source into the same
    /// dispatch pipeline used for TCP 0x80 frames.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_gateway::Gateway;
    ///
    /// # fn example(gateway: &Gateway) {
    /// // A push notification carrying "BLOQUEAR" takes the same path
    /// // as a TCP 0x80 frame.
    /// gateway.inject_command("BLOQUEAR");
    /// # }
    /// ```
    pub fn inject_command(&self, text: impl Into<String>) {
        self.client.inject_command(text);
    }

    /// Unified event stream: client lifecycle, wire traffic and bridge
    /// traffic interleaved in arrival order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the bounded event log, oldest first.
    #[must_use]
    pub fn log_snapshot(&self) -> Vec<EventRecord> {
        self.log.lock().expect("event log lock").snapshot()
    }

    /// Current bridge counters.
    #[must_use]
    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    /// Stop the client session; the bridge link closes when the
    /// gateway is dropped.
    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.pump.abort();
        self.bridge_task.abort();
    }
}

/// Fan client events into the bridge and merge both streams into the
/// unified log.
async fn pump_events(
    mut client_events: broadcast::Receiver<EngineEvent>,
    mut bridge_events: broadcast::Receiver<EngineEvent>,
    bridge: BridgeHandle,
    events: broadcast::Sender<EngineEvent>,
    log: Arc<Mutex<EventLog>>,
) {
    use broadcast::error::RecvError;

    loop {
        tokio::select! {
            event = client_events.recv() => match event {
                Ok(event) => {
                    publish(&events, &log, event.clone());
                    match event {
                        EngineEvent::CommandReceived { text } => bridge.command(text).await,
                        EngineEvent::OutputCommand { output, state } => {
                            bridge.output(output, state).await;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "client event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            event = bridge_events.recv() => match event {
                Ok(event) => publish(&events, &log, event),
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "bridge event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn publish(
    events: &broadcast::Sender<EngineEvent>,
    log: &Arc<Mutex<EventLog>>,
    event: EngineEvent,
) {
    log.lock().expect("event log lock").push(event.clone());
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rastro_bridge::MockLink;

    fn test_gateway() -> (Gateway, rastro_bridge::MockLinkHandle) {
        let config = ClientConfig::new("127.0.0.1", "123456789012345").unwrap();
        let (link, link_handle) = MockLink::pair();
        let gateway = Gateway::new(config, AnyLink::from(link)).unwrap();
        (gateway, link_handle)
    }

    #[tokio::test]
    async fn injected_command_reaches_the_bridge() {
        let (gateway, mut link) = test_gateway();

        gateway.inject_command("LOCATE");

        assert_eq!(link.written().await.unwrap(), "CMD:POSICAO");

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while gateway.bridge_stats().commands_forwarded == 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "forwarded counter never incremented"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn events_accumulate_in_the_log() {
        let (gateway, mut link) = test_gateway();

        gateway.inject_command("STOP");
        assert_eq!(link.written().await.unwrap(), "CMD:BLOQUEAR");

        // CommandReceived, BridgeConnected and BridgeTx all make it
        // into the log.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let labels: Vec<&'static str> = gateway
                .log_snapshot()
                .iter()
                .map(|record| record.event.label())
                .collect();
            if labels.contains(&"command_received") && labels.contains(&"bridge_tx") {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "log never filled: {labels:?}"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_synchronously() {
        let mut config = ClientConfig::new("127.0.0.1", "123456789012345").unwrap();
        config.port = 0;
        let (link, _handle) = MockLink::pair();
        assert!(Gateway::new(config, AnyLink::from(link)).is_err());
    }
}
