//! GT06 server endpoint.
//!
//! Accepts inbound tracker connections (default TCP/5023), gives every
//! connection its own reassembler, serial counter and dispatch loop, and
//! surfaces decoded traffic on an event channel:
//!
//! ```text
//! tracker 1 ┐
//! tracker 2 ├──> accept loop ──> per-peer task ──> ServerEvent channel
//! tracker N ┘                        │
//!                                    └──> protocol ACKs (serial echoed)
//! ```
//!
//! # Acknowledgement rules
//!
//! - LOGIN (0x01): LOGIN-ACK with status `0x00`, serial echoed; the
//!   connection is marked logged in.
//! - HEARTBEAT (0x13): HEARTBEAT-ACK, serial echoed.
//! - LOCATION (0x12) / ALARM (0x16): STATUS-style ACK; the decoded
//!   position or alarm is published as an event.
//! - COMMAND (0x80, from an operator tool): a 0x21 response echoing the
//!   text; the text is published as an event.
//! - Unknown protocols: STATUS-style ACK plus a warning event, so an
//!   unrecognized tracker firmware does not drop the link.
//!
//! A peer that never logs in may still send frames; they are
//! acknowledged and surfaced all the same.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use rastro_core::constants::{
    DEFAULT_PORT, PROTO_ALARM, PROTO_COMMAND_RESPONSE, PROTO_HEARTBEAT, PROTO_LOCATION,
    PROTO_LOGIN, PROTO_SERVER_COMMAND,
};
use rastro_core::{AlarmKind, Error, Imei, Position, Result};
use rastro_protocol::{
    AlarmPayload, Frame, Gt06Codec, LocationPayload, LoginPayload, Packet, SerialCounter,
    ServerCommand,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const PEER_COMMAND_CAPACITY: usize = 16;

/// Identifies one accepted connection for the lifetime of the server.
pub type PeerId = u64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Gt06ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Maximum simultaneous connections; excess peers are rejected and
    /// the listener keeps accepting.
    pub max_connections: usize,
}

impl Default for Gt06ServerConfig {
    fn default() -> Self {
        Gt06ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 64,
        }
    }
}

/// Snapshot of one connection's metadata.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub imei: Option<Imei>,
    pub logged_in: bool,
    pub connected_at: DateTime<Utc>,
}

/// Decoded traffic surfaced to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PeerConnected { peer: PeerId, addr: SocketAddr },
    PeerDisconnected { peer: PeerId },
    LoginReceived { peer: PeerId, imei: Imei },
    HeartbeatReceived { peer: PeerId },
    PositionReceived { peer: PeerId, position: Position },
    AlarmReceived { peer: PeerId, kind: AlarmKind, position: Position },
    /// Text carried by an inbound 0x80 frame.
    CommandReceived { peer: PeerId, text: String },
    /// Text carried by an inbound 0x21 frame (a tracker's command ack).
    CommandResponse { peer: PeerId, text: String },
    FrameReceived { peer: PeerId, proto: u8, len: usize, hex: String },
    Warning { peer: PeerId, message: String },
}

struct PeerEntry {
    info: PeerInfo,
    commands: mpsc::Sender<String>,
}

type PeerRegistry = Arc<Mutex<HashMap<PeerId, PeerEntry>>>;

/// Cloneable handle for interacting with a running server.
#[derive(Clone)]
pub struct ServerHandle {
    peers: PeerRegistry,
}

impl ServerHandle {
    /// Metadata for all live connections.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .lock()
            .expect("peer registry lock")
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    #[must_use]
    pub fn peer_info(&self, peer: PeerId) -> Option<PeerInfo> {
        self.peers
            .lock()
            .expect("peer registry lock")
            .get(&peer)
            .map(|entry| entry.info.clone())
    }

    /// Push a textual 0x80 command to a connected tracker. The peer
    /// task assigns the serial from its own counter.
    ///
    /// # Errors
    /// Returns `Error::NotConnected` when the peer is gone.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_network::ServerHandle;
    ///
    /// # async fn example(handle: &ServerHandle) -> rastro_core::Result<()> {
    /// for peer in handle.connected_peers() {
    ///     handle.send_command(peer.id, "STATUS").await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send_command(&self, peer: PeerId, text: impl Into<String>) -> Result<()> {
        let sender = {
            let peers = self.peers.lock().expect("peer registry lock");
            peers
                .get(&peer)
                .map(|entry| entry.commands.clone())
                .ok_or(Error::NotConnected)?
        };
        sender
            .send(text.into())
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Drop a peer; its task notices the closed command channel and
    /// shuts the socket down.
    pub fn disconnect(&self, peer: PeerId) {
        self.peers.lock().expect("peer registry lock").remove(&peer);
    }
}

/// The GT06 server: bind once, then [`run`](Gt06Server::run) the accept
/// loop.
///
/// # Example
///
/// ```no_run
/// use rastro_network::{Gt06Server, Gt06ServerConfig, ServerEvent};
///
/// # async fn example() -> rastro_core::Result<()> {
/// let mut server = Gt06Server::bind(Gt06ServerConfig::default()).await?;
/// let mut events = server.take_events().expect("first take");
/// let handle = server.handle();
///
/// tokio::spawn(server.run());
///
/// while let Some(event) = events.recv().await {
///     if let ServerEvent::PositionReceived { peer, position } = event {
///         println!("peer {peer}: {:.5},{:.5}", position.latitude, position.longitude);
///         handle.send_command(peer, "STATUS").await.ok();
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Gt06Server {
    listener: TcpListener,
    config: Gt06ServerConfig,
    peers: PeerRegistry,
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: Option<mpsc::Receiver<ServerEvent>>,
    next_peer: PeerId,
}

impl Gt06Server {
    /// Bind the listener.
    ///
    /// # Errors
    /// Returns an IO error when the address cannot be bound.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_network::{Gt06Server, Gt06ServerConfig};
    ///
    /// # async fn example() -> rastro_core::Result<()> {
    /// let config = Gt06ServerConfig {
    ///     bind_addr: "127.0.0.1:5023".parse().unwrap(),
    ///     max_connections: 16,
    /// };
    /// let server = Gt06Server::bind(config).await?;
    /// println!("listening on {}", server.local_addr()?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(config: Gt06ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            addr = %config.bind_addr,
            max_connections = config.max_connections,
            "GT06 server listening"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Gt06Server {
            listener,
            config,
            peers: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Some(events_rx),
            next_peer: 1,
        })
    }

    /// The bound address; useful after binding port 0 in tests.
    ///
    /// # Errors
    /// Returns an IO error if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events_rx.take()
    }

    /// A cloneable handle for peer queries and command pushes.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            peers: self.peers.clone(),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn run(mut self) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            };

            let live = self.peers.lock().expect("peer registry lock").len();
            if live >= self.config.max_connections {
                warn!(%addr, live, "connection rejected: at capacity");
                drop(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                warn!(%addr, "failed to set TCP_NODELAY: {e}");
            }

            let peer = self.next_peer;
            self.next_peer += 1;

            let (commands_tx, commands_rx) = mpsc::channel(PEER_COMMAND_CAPACITY);
            let info = PeerInfo {
                id: peer,
                addr,
                imei: None,
                logged_in: false,
                connected_at: Utc::now(),
            };
            self.peers.lock().expect("peer registry lock").insert(
                peer,
                PeerEntry {
                    info,
                    commands: commands_tx,
                },
            );

            debug!(peer, %addr, "tracker connected");
            let session = PeerSession {
                peer,
                addr,
                framed: Framed::new(stream, Gt06Codec::new()),
                serials: SerialCounter::new(),
                logged_in: false,
                peers: self.peers.clone(),
                events: self.events_tx.clone(),
            };
            tokio::spawn(session.run(commands_rx));
        }
    }
}

/// One accepted connection: own reassembler, serial counter and
/// dispatch loop.
struct PeerSession {
    peer: PeerId,
    addr: SocketAddr,
    framed: Framed<TcpStream, Gt06Codec>,
    serials: SerialCounter,
    logged_in: bool,
    peers: PeerRegistry,
    events: mpsc::Sender<ServerEvent>,
}

impl PeerSession {
    async fn run(mut self, mut commands: mpsc::Receiver<String>) {
        self.publish(ServerEvent::PeerConnected {
            peer: self.peer,
            addr: self.addr,
        })
        .await;

        loop {
            tokio::select! {
                inbound = self.framed.next() => match inbound {
                    Some(Ok(frame)) => {
                        if !self.handle_frame(frame).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.warn(format!("decode error: {e}")).await;
                    }
                    None => {
                        debug!(peer = self.peer, "tracker closed the connection");
                        break;
                    }
                },

                command = commands.recv() => match command {
                    Some(text) => {
                        let packet = Packet::server_command(text, self.serials.advance());
                        if self.framed.send(packet).await.is_err() {
                            break;
                        }
                    }
                    // The handle dropped this peer.
                    None => break,
                },
            }
        }

        self.peers
            .lock()
            .expect("peer registry lock")
            .remove(&self.peer);
        self.publish(ServerEvent::PeerDisconnected { peer: self.peer })
            .await;
    }

    /// Dispatch one frame; returns `false` when the connection must
    /// close (a failed reply write).
    async fn handle_frame(&mut self, frame: Frame) -> bool {
        trace!(peer = self.peer, proto = frame.protocol, serial = frame.serial, "frame");
        self.publish(ServerEvent::FrameReceived {
            peer: self.peer,
            proto: frame.protocol,
            len: frame.wire_len(),
            hex: frame.hex(),
        })
        .await;

        if !frame.checksum_ok {
            self.warn(format!("checksum mismatch on proto {:#04X}", frame.protocol))
                .await;
        }

        match frame.protocol {
            PROTO_LOGIN => match LoginPayload::decode(&frame.content) {
                Ok(login) => {
                    if !self.ack(PROTO_LOGIN, frame.serial).await {
                        return false;
                    }
                    self.logged_in = true;
                    self.register_login(&login.imei);
                    self.publish(ServerEvent::LoginReceived {
                        peer: self.peer,
                        imei: login.imei,
                    })
                    .await;
                    true
                }
                Err(e) => {
                    self.warn(format!("login frame discarded: {e}")).await;
                    true
                }
            },
            PROTO_HEARTBEAT => {
                if !self.ack(PROTO_HEARTBEAT, frame.serial).await {
                    return false;
                }
                self.publish(ServerEvent::HeartbeatReceived { peer: self.peer })
                    .await;
                true
            }
            PROTO_LOCATION => match LocationPayload::decode(&frame.content)
                .and_then(|payload| payload.to_position())
            {
                Ok(position) => {
                    if !self.ack(PROTO_LOCATION, frame.serial).await {
                        return false;
                    }
                    self.publish(ServerEvent::PositionReceived {
                        peer: self.peer,
                        position,
                    })
                    .await;
                    true
                }
                Err(e) => {
                    self.warn(format!("location frame discarded: {e}")).await;
                    true
                }
            },
            PROTO_ALARM => match AlarmPayload::decode(&frame.content) {
                Ok(alarm) => match alarm.location.to_position() {
                    Ok(position) => {
                        if !self.ack(PROTO_ALARM, frame.serial).await {
                            return false;
                        }
                        self.publish(ServerEvent::AlarmReceived {
                            peer: self.peer,
                            kind: alarm.kind,
                            position,
                        })
                        .await;
                        true
                    }
                    Err(e) => {
                        self.warn(format!("alarm frame discarded: {e}")).await;
                        true
                    }
                },
                Err(e) => {
                    self.warn(format!("alarm frame discarded: {e}")).await;
                    true
                }
            },
            PROTO_SERVER_COMMAND => match ServerCommand::decode(&frame.content) {
                Ok(command) => {
                    let text = command.text_lossy();
                    // Echo the text back for operator-tool compatibility.
                    let reply = Packet::command_response(text.clone(), frame.serial);
                    if self.framed.send(reply).await.is_err() {
                        return false;
                    }
                    self.publish(ServerEvent::CommandReceived {
                        peer: self.peer,
                        text,
                    })
                    .await;
                    true
                }
                Err(e) => {
                    self.warn(format!("command frame discarded: {e}")).await;
                    true
                }
            },
            PROTO_COMMAND_RESPONSE => {
                let text = ServerCommand::decode(&frame.content)
                    .map(|c| c.text_lossy())
                    .unwrap_or_default();
                if !self.ack(PROTO_COMMAND_RESPONSE, frame.serial).await {
                    return false;
                }
                self.publish(ServerEvent::CommandResponse {
                    peer: self.peer,
                    text,
                })
                .await;
                true
            }
            unknown => {
                // ACK anyway so the remote tracker keeps the session up.
                if !self.ack(unknown, frame.serial).await {
                    return false;
                }
                self.warn(format!("unknown protocol {unknown:#04X} acked"))
                    .await;
                true
            }
        }
    }

    /// Send a status ACK echoing the request serial.
    async fn ack(&mut self, proto: u8, serial: u16) -> bool {
        self.framed.send(Packet::ack(proto, serial)).await.is_ok()
    }

    fn register_login(&self, imei: &Imei) {
        let mut peers = self.peers.lock().expect("peer registry lock");
        if let Some(entry) = peers.get_mut(&self.peer) {
            entry.info.imei = Some(imei.clone());
            entry.info.logged_in = true;
        }
        info!(peer = self.peer, %imei, "tracker logged in");
    }

    async fn warn(&self, message: String) {
        warn!(peer = self.peer, "{message}");
        self.publish(ServerEvent::Warning {
            peer: self.peer,
            message,
        })
        .await;
    }

    async fn publish(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            trace!(peer = self.peer, "event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Gt06ServerConfig {
        Gt06ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_connections: 4,
        }
    }

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let server = Gt06Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn events_can_only_be_taken_once() {
        let mut server = Gt06Server::bind(test_config()).await.unwrap();
        assert!(server.take_events().is_some());
        assert!(server.take_events().is_none());
    }

    #[tokio::test]
    async fn handle_starts_with_no_peers() {
        let server = Gt06Server::bind(test_config()).await.unwrap();
        let handle = server.handle();
        assert!(handle.connected_peers().is_empty());
        assert!(handle.peer_info(1).is_none());
    }

    #[tokio::test]
    async fn send_command_to_unknown_peer_fails() {
        let server = Gt06Server::bind(test_config()).await.unwrap();
        let handle = server.handle();
        assert!(matches!(
            handle.send_command(9, "STOP").await,
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn default_config_uses_wire_port() {
        let config = Gt06ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5023);
    }
}
