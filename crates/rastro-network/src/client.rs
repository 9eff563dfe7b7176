//! GT06 tracker client: the connection-owning state machine.
//!
//! The client impersonates a hardware tracker against a fleet server
//! (Traccar speaks GT06 on TCP/5023). One engine task owns the socket,
//! the serial counter and all timers; callers drive it through a
//! mailbox handle and observe it through a broadcast event stream:
//!
//! ```text
//! host ──ops──> [engine task] ──TCP──> GT06 server
//!                  │   ▲
//!               events │ heartbeat / location timers
//!                  ▼   │
//!             broadcast stream
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!           connect()
//! Disconnected ───────► Connecting ──tcp ok──► Connected ──LOGIN──► LoggingIn
//!                                                                      │ LOGIN-ACK
//!        stream error / disconnect()                                   ▼
//!       ◄──────────────────────────────────────────────────────────  Online
//!         reconnect with capped exponential backoff while wanted
//! ```
//!
//! Heartbeat and location timers fire only while `Online`; the first
//! heartbeat and the first location (if a position has been pushed) go
//! out immediately on entering `Online`. Every recoverable failure is
//! reported as an event and answered with a reconnect, never an error
//! returned to the caller.

use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use rastro_core::constants::{CONNECT_TIMEOUT_SECS, LOGIN_TIMEOUT_SECS, RECONNECT_DELAY_CAP_SECS};
use rastro_core::{
    AlarmKind, ClientConfig, EngineEvent, Position, Result, SessionCounters, TrackerState,
};
use rastro_protocol::{
    CommandKind, Frame, Gt06Codec, HeartbeatPayload, Packet, SerialCounter, ServerCommand,
    encode_frame, hex_dump,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Emitted when the retry budget is spent; hosts can match on this to
/// distinguish a permanent transport failure from transient ones.
pub const RECONNECT_EXHAUSTED: &str = "reconnect attempts exhausted";

type ClientFramed = Framed<TcpStream, Gt06Codec>;

/// Operations routed through the engine mailbox.
#[derive(Debug)]
enum ClientOp {
    Connect,
    Disconnect,
    SendPosition(Position),
    SendAlarm(AlarmKind, Position),
    InjectCommand(String),
    Shutdown,
}

/// Handle to a running tracker client engine.
///
/// Cloning is intentionally not provided; the handle is the single
/// owner the host keeps. All methods are non-blocking — they enqueue an
/// operation for the engine task.
pub struct Gt06Client {
    op_tx: mpsc::UnboundedSender<ClientOp>,
    state_rx: watch::Receiver<TrackerState>,
    events: broadcast::Sender<EngineEvent>,
    counters: Arc<Mutex<SessionCounters>>,
    task: tokio::task::JoinHandle<()>,
}

impl Gt06Client {
    /// Validate the configuration and spawn the engine task.
    ///
    /// # Errors
    /// Returns `Error::Config`/`Error::InvalidImei` for unusable
    /// configuration; this is the only synchronous failure surface.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_core::ClientConfig;
    /// use rastro_network::Gt06Client;
    ///
    /// # async fn example() -> rastro_core::Result<()> {
    /// let config = ClientConfig::new("tracking.example.com", "356932080000000")?;
    /// let client = Gt06Client::new(config)?;
    /// client.connect();
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TrackerState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let counters = Arc::new(Mutex::new(SessionCounters::default()));

        debug!(imei = %config.imei, host = %config.host, port = config.port, "starting tracker client engine");

        let engine = Engine {
            config,
            state_tx,
            events: events.clone(),
            counters: counters.clone(),
            should_be_connected: false,
            last_position: None,
            reconnect_attempts: 0,
        };
        let task = tokio::spawn(engine.run(op_rx));

        Ok(Gt06Client {
            op_tx,
            state_rx,
            events,
            counters,
            task,
        })
    }

    /// Ask the engine to establish (and keep) a session. No-op while a
    /// session is already being established or is established.
    pub fn connect(&self) {
        let _ = self.op_tx.send(ClientOp::Connect);
    }

    /// Drop the session and stop reconnecting.
    pub fn disconnect(&self) {
        let _ = self.op_tx.send(ClientOp::Disconnect);
    }

    /// Push a GPS fix. The most recent fix feeds the periodic location
    /// timer; when the client is not `Online` the immediate send is
    /// dropped with a `Warning` event (no queuing).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_core::Position;
    /// use rastro_network::Gt06Client;
    ///
    /// # fn example(client: &Gt06Client) {
    /// client.send_position(Position {
    ///     speed_kmh: 54.0,
    ///     course_deg: 90.0,
    ///     ..Position::new(-23.55052, -46.63331)
    /// });
    /// # }
    /// ```
    pub fn send_position(&self, position: Position) {
        let _ = self.op_tx.send(ClientOp::SendPosition(position));
    }

    /// Raise an alarm at a position. Same `Online`-only rule as
    /// [`send_position`](Self::send_position).
    pub fn send_alarm(&self, kind: AlarmKind, position: Position) {
        let _ = self.op_tx.send(ClientOp::SendAlarm(kind, position));
    }

    /// Feed a textual command from an out-of-band source (for example a
    /// push notification) into the same dispatch pipeline that serves
    /// TCP 0x80 frames.
    pub fn inject_command(&self, text: impl Into<String>) {
        let _ = self.op_tx.send(ClientOp::InjectCommand(text.into()));
    }

    /// Terminate the engine task after closing any open session.
    pub fn shutdown(&self) {
        let _ = self.op_tx.send(ClientOp::Shutdown);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for awaiting state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<TrackerState> {
        self.state_rx.clone()
    }

    /// Snapshot of the current session counters.
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        self.counters.lock().expect("counters lock").clone()
    }

    /// Subscribe to the live event stream. Slow subscribers lose the
    /// oldest events (broadcast semantics), never block the engine.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rastro_core::EngineEvent;
    /// use rastro_network::Gt06Client;
    ///
    /// # async fn example(client: &Gt06Client) {
    /// let mut events = client.subscribe();
    /// while let Ok(event) = events.recv().await {
    ///     if let EngineEvent::CommandReceived { text } = event {
    ///         println!("server says: {text}");
    ///     }
    /// }
    /// # }
    /// ```
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl Drop for Gt06Client {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Why a session loop returned.
enum SessionEnd {
    /// `disconnect()` was requested; do not reconnect.
    Requested,
    /// The transport failed; reconnect if still wanted.
    Failed,
    /// Unrecoverable configuration; the machine is parked in `Error`
    /// and nothing happens until the host calls `connect()` again.
    Fatal,
    /// The engine must exit.
    Shutdown,
}

enum Dispatch {
    Continue,
    WentOnline,
    Failed,
}

struct Engine {
    config: ClientConfig,
    state_tx: watch::Sender<TrackerState>,
    events: broadcast::Sender<EngineEvent>,
    counters: Arc<Mutex<SessionCounters>>,
    should_be_connected: bool,
    last_position: Option<Position>,
    reconnect_attempts: i32,
}

impl Engine {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<ClientOp>) {
        loop {
            while !self.should_be_connected {
                match ops.recv().await {
                    None => return,
                    Some(ClientOp::Shutdown) => return,
                    Some(op) => self.handle_offline_op(op),
                }
            }

            match self.run_session(&mut ops).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Requested | SessionEnd::Fatal => {}
                SessionEnd::Failed => {
                    if !self.should_be_connected {
                        continue;
                    }
                    self.reconnect_attempts += 1;
                    let max = self.config.max_reconnect_attempts;
                    if max > 0 && self.reconnect_attempts >= max {
                        warn!(attempts = self.reconnect_attempts, "reconnect budget spent");
                        self.emit(EngineEvent::Error {
                            message: RECONNECT_EXHAUSTED.to_string(),
                        });
                        self.should_be_connected = false;
                        continue;
                    }

                    let delay = self.backoff_delay();
                    self.emit(EngineEvent::Warning {
                        message: format!(
                            "reconnecting in {}s (attempt {})",
                            delay.as_secs(),
                            self.reconnect_attempts
                        ),
                    });
                    if !self.wait_before_reconnect(&mut ops, delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Operations arriving while no session is wanted or active.
    fn handle_offline_op(&mut self, op: ClientOp) {
        match op {
            ClientOp::Connect => {
                self.should_be_connected = true;
                self.reconnect_attempts = 0;
            }
            ClientOp::Disconnect => {
                // Clears a parked Error state.
                let current = *self.state_tx.borrow();
                if current == TrackerState::Error {
                    self.set_state(TrackerState::Disconnected);
                }
            }
            ClientOp::SendPosition(position) => {
                self.last_position = Some(position);
                self.emit(EngineEvent::Warning {
                    message: "position dropped: not online".to_string(),
                });
            }
            ClientOp::SendAlarm(kind, position) => {
                self.last_position = Some(position);
                self.emit(EngineEvent::Warning {
                    message: format!("alarm {kind} dropped: not online"),
                });
            }
            ClientOp::InjectCommand(text) => self.dispatch_injected_command(text),
            ClientOp::Shutdown => unreachable!("handled by caller"),
        }
    }

    /// Sleep out the reconnect delay, still serving the mailbox.
    /// Returns `false` when the engine must exit.
    async fn wait_before_reconnect(
        &mut self,
        ops: &mut mpsc::UnboundedReceiver<ClientOp>,
        delay: Duration,
    ) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                op = ops.recv() => match op {
                    None | Some(ClientOp::Shutdown) => return false,
                    Some(ClientOp::Disconnect) => {
                        self.should_be_connected = false;
                        return true;
                    }
                    Some(ClientOp::Connect) => {}
                    Some(op) => self.handle_offline_op(op),
                },
            }
        }
    }

    /// Exponential backoff from the configured base, capped at five
    /// minutes. The first retry waits exactly `reconnect_seconds`.
    fn backoff_delay(&self) -> Duration {
        let exponent = (self.reconnect_attempts - 1).clamp(0, 10) as u32;
        let secs = self
            .config
            .reconnect_seconds
            .saturating_mul(1u64 << exponent)
            .min(RECONNECT_DELAY_CAP_SECS);
        Duration::from_secs(secs)
    }

    /// One full connection attempt: connect, login, serve until the
    /// stream or the caller ends it.
    async fn run_session(&mut self, ops: &mut mpsc::UnboundedReceiver<ClientOp>) -> SessionEnd {
        self.counters.lock().expect("counters lock").reset();
        self.set_state(TrackerState::Connecting);

        // Range checks happen at construction; the host shape can only
        // be judged here, when a session actually needs it resolved.
        if !host_shape_is_valid(&self.config.host) {
            return self.fail_configuration(format!(
                "host '{}' is not a resolvable name or address",
                self.config.host
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let connect = TcpStream::connect(&addr);
        let stream = match timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.emit(EngineEvent::Error {
                    message: format!("connect to {addr} failed: {e}"),
                });
                self.set_state(TrackerState::Disconnected);
                return SessionEnd::Failed;
            }
            Err(_) => {
                self.emit(EngineEvent::Error {
                    message: format!("connect to {addr} timed out after {CONNECT_TIMEOUT_SECS}s"),
                });
                self.set_state(TrackerState::Disconnected);
                return SessionEnd::Failed;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {e}");
        }

        info!(%addr, "connected");
        let mut framed = Framed::new(stream, Gt06Codec::new());
        let mut serials = SerialCounter::new();
        self.set_state(TrackerState::Connected);

        let login = Packet::login(&self.config.imei, serials.advance());
        if self.send_packet(&mut framed, login).await.is_err() {
            self.set_state(TrackerState::Disconnected);
            return SessionEnd::Failed;
        }
        self.set_state(TrackerState::LoggingIn);

        let login_deadline = Instant::now() + Duration::from_secs(LOGIN_TIMEOUT_SECS);
        let mut logging_in = true;
        let mut online = false;

        // Both timers start "due": their pending first tick is what makes
        // the first heartbeat and location go out the moment we go online.
        let mut heartbeat = interval(Duration::from_secs(self.config.heartbeat_seconds));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut location = interval(Duration::from_secs(self.config.location_seconds));
        location.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = framed.next() => match inbound {
                    Some(Ok(frame)) => match self.dispatch_frame(&mut framed, &mut serials, frame).await {
                        Dispatch::Continue => {}
                        Dispatch::WentOnline => {
                            logging_in = false;
                            online = true;
                            self.reconnect_attempts = 0;
                        }
                        Dispatch::Failed => {
                            self.set_state(TrackerState::Disconnected);
                            return SessionEnd::Failed;
                        }
                    },
                    Some(Err(e)) => {
                        self.emit(EngineEvent::Warning {
                            message: format!("decode error: {e}"),
                        });
                    }
                    None => {
                        self.emit(EngineEvent::Warning {
                            message: "connection closed by server".to_string(),
                        });
                        self.set_state(TrackerState::Disconnected);
                        return SessionEnd::Failed;
                    }
                },

                op = ops.recv() => match op {
                    None | Some(ClientOp::Shutdown) => {
                        let _ = framed.close().await;
                        self.set_state(TrackerState::Disconnected);
                        return SessionEnd::Shutdown;
                    }
                    Some(ClientOp::Disconnect) => {
                        self.should_be_connected = false;
                        let _ = framed.close().await;
                        self.set_state(TrackerState::Disconnected);
                        return SessionEnd::Requested;
                    }
                    Some(ClientOp::Connect) => {}
                    Some(ClientOp::SendPosition(position)) => {
                        self.last_position = Some(position.clone());
                        if online {
                            let packet = Packet::location(&position, serials.advance());
                            if self.send_packet(&mut framed, packet).await.is_err() {
                                self.set_state(TrackerState::Disconnected);
                                return SessionEnd::Failed;
                            }
                        } else {
                            self.emit(EngineEvent::Warning {
                                message: "position dropped: not online".to_string(),
                            });
                        }
                    }
                    Some(ClientOp::SendAlarm(kind, position)) => {
                        self.last_position = Some(position.clone());
                        if online {
                            let packet = Packet::alarm(kind, &position, serials.advance());
                            if self.send_packet(&mut framed, packet).await.is_err() {
                                self.set_state(TrackerState::Disconnected);
                                return SessionEnd::Failed;
                            }
                        } else {
                            self.emit(EngineEvent::Warning {
                                message: format!("alarm {kind} dropped: not online"),
                            });
                        }
                    }
                    Some(ClientOp::InjectCommand(text)) => self.dispatch_injected_command(text),
                },

                _ = heartbeat.tick(), if online => {
                    let packet = Packet::heartbeat(&HeartbeatPayload::default(), serials.advance());
                    if self.send_packet(&mut framed, packet).await.is_err() {
                        self.set_state(TrackerState::Disconnected);
                        return SessionEnd::Failed;
                    }
                }

                _ = location.tick(), if online => {
                    if let Some(position) = self.last_position.clone() {
                        let packet = Packet::location(&position, serials.advance());
                        if self.send_packet(&mut framed, packet).await.is_err() {
                            self.set_state(TrackerState::Disconnected);
                            return SessionEnd::Failed;
                        }
                    }
                }

                _ = sleep_until(login_deadline), if logging_in => {
                    self.emit(EngineEvent::Error {
                        message: format!("no login ack within {LOGIN_TIMEOUT_SECS}s"),
                    });
                    let _ = framed.close().await;
                    self.set_state(TrackerState::Disconnected);
                    return SessionEnd::Failed;
                }
            }
        }
    }

    /// Handle one inbound frame per the dispatch rules.
    async fn dispatch_frame(
        &mut self,
        framed: &mut ClientFramed,
        serials: &mut SerialCounter,
        frame: Frame,
    ) -> Dispatch {
        self.counters
            .lock()
            .expect("counters lock")
            .record_received();
        self.emit(EngineEvent::PacketReceived {
            proto: frame.protocol,
            len: frame.wire_len(),
            hex: frame.hex(),
        });
        if !frame.checksum_ok {
            self.emit(EngineEvent::Warning {
                message: format!("checksum mismatch on proto {:#04X}", frame.protocol),
            });
        }

        use rastro_core::constants::{
            PROTO_COMMAND_RESPONSE, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN,
            PROTO_SERVER_COMMAND,
        };

        match frame.protocol {
            PROTO_LOGIN => {
                let current = *self.state_tx.borrow();
                if current == TrackerState::LoggingIn {
                    info!(imei = %self.config.imei, "login acknowledged");
                    self.set_state(TrackerState::Online);
                    return Dispatch::WentOnline;
                }
                Dispatch::Continue
            }
            PROTO_HEARTBEAT => {
                self.counters.lock().expect("counters lock").heartbeats_ok += 1;
                self.emit(EngineEvent::HeartbeatAck);
                Dispatch::Continue
            }
            PROTO_LOCATION => {
                self.counters.lock().expect("counters lock").locations_ok += 1;
                self.emit(EngineEvent::LocationAck);
                Dispatch::Continue
            }
            PROTO_SERVER_COMMAND => {
                let command = match ServerCommand::decode(&frame.content) {
                    Ok(command) => command,
                    Err(e) => {
                        // Malformed command frames are discarded unacked.
                        self.emit(EngineEvent::Warning {
                            message: format!("command frame discarded: {e}"),
                        });
                        return Dispatch::Continue;
                    }
                };
                self.counters.lock().expect("counters lock").commands_received += 1;

                // The wire acknowledgement goes out before any fan-out.
                let ack_text = format!("CMD OK:{}", command.text_lossy());
                let packet = Packet::command_response(ack_text.clone(), serials.advance());
                if self.send_packet(framed, packet).await.is_err() {
                    return Dispatch::Failed;
                }
                self.emit(EngineEvent::CommandAck { text: ack_text });

                if std::str::from_utf8(&command.payload).is_err() {
                    self.emit(EngineEvent::Warning {
                        message: format!(
                            "command payload is not valid UTF-8: {}",
                            command.payload_hex()
                        ),
                    });
                }

                match command.kind() {
                    Ok(CommandKind::Text(text)) => {
                        self.emit(EngineEvent::CommandReceived { text });
                    }
                    Ok(CommandKind::Output { output, state }) => {
                        self.emit(EngineEvent::OutputCommand { output, state });
                    }
                    Err(e) => {
                        self.emit(EngineEvent::Warning {
                            message: format!("command payload unusable: {e}"),
                        });
                    }
                }
                Dispatch::Continue
            }
            PROTO_COMMAND_RESPONSE => {
                let text = ServerCommand::decode(&frame.content)
                    .map(|c| c.text_lossy())
                    .unwrap_or_else(|_| hex_dump(&frame.content));
                self.emit(EngineEvent::CommandAck { text });
                Dispatch::Continue
            }
            other => {
                trace!(proto = other, "unhandled protocol, echoing ack");
                let packet = Packet::ack(other, frame.serial);
                if self.send_packet(framed, packet).await.is_err() {
                    return Dispatch::Failed;
                }
                Dispatch::Continue
            }
        }
    }

    /// Injected commands share the 0x80 fan-out path, minus the wire ack
    /// (there is no requesting server to answer).
    fn dispatch_injected_command(&mut self, text: String) {
        self.counters.lock().expect("counters lock").commands_received += 1;
        self.emit(EngineEvent::CommandReceived { text });
    }

    async fn send_packet(&mut self, framed: &mut ClientFramed, packet: Packet) -> Result<()> {
        let wire = encode_frame(packet.protocol, &packet.content, packet.serial)?;
        let proto = packet.protocol;

        match framed.send(packet).await {
            Ok(()) => {
                self.counters.lock().expect("counters lock").record_sent();
                self.emit(EngineEvent::PacketSent {
                    proto,
                    len: wire.len(),
                    hex: hex_dump(&wire),
                });
                Ok(())
            }
            Err(e) => {
                self.emit(EngineEvent::Error {
                    message: format!("send failed: {e}"),
                });
                Err(e)
            }
        }
    }

    /// Park the machine in `Error` after a configuration failure that
    /// only surfaced at runtime. No reconnect is scheduled; the host
    /// clears the state with `disconnect()` or a fresh `connect()`.
    fn fail_configuration(&mut self, message: String) -> SessionEnd {
        warn!("{message}");
        self.emit(EngineEvent::Error { message });
        self.set_state(TrackerState::Error);
        self.should_be_connected = false;
        SessionEnd::Fatal
    }

    fn set_state(&mut self, next: TrackerState) {
        let current = *self.state_tx.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(&next) {
            warn!(%current, %next, "transition outside the lifecycle table");
        }
        debug!(%current, %next, "state change");
        let _ = self.state_tx.send(next);

        let event = match next {
            TrackerState::Connecting => EngineEvent::Connecting,
            TrackerState::Connected => EngineEvent::Connected,
            TrackerState::LoggingIn => EngineEvent::LoggingIn,
            TrackerState::Online => EngineEvent::Online,
            TrackerState::Disconnected => EngineEvent::Disconnected,
            // The Error event carrying the failure detail is emitted by
            // fail_configuration before the transition.
            TrackerState::Error => return,
        };
        self.emit(event);
    }

    fn emit(&self, event: EngineEvent) {
        trace!(kind = event.label(), "event");
        let _ = self.events.send(event);
    }
}

/// Whether the configured host could ever resolve: a literal IP
/// address, or a hostname restricted to the characters DNS accepts.
fn host_shape_is_valid(host: &str) -> bool {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    !host.is_empty()
        && !host.starts_with('-')
        && !host.starts_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
