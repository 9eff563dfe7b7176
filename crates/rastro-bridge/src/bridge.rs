//! The bridge engine.
//!
//! One task owns the command link; callers steer it through a
//! [`BridgeHandle`] and observe it through a broadcast event stream,
//! the same ownership shape as the tracker client. When a command
//! arrives with the link closed the bridge makes exactly one
//! synchronous reconnect attempt, then drops the command with an
//! `Error` event — nothing is queued across reconnects.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::link::CommandLink;
use crate::mapping::{ReplyKind, classify_reply, translate_output, translate_text};
use rastro_core::{EngineEvent, Result};

const EVENT_CHANNEL_CAPACITY: usize = 128;
const DIRECTIVE_CHANNEL_CAPACITY: usize = 32;

/// Bridge-side counters and link status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub link_open: bool,
    pub commands_received: u64,
    pub commands_forwarded: u64,
    pub responses_received: u64,
    pub last_line_tx: Option<String>,
    pub last_line_rx: Option<String>,
}

impl BridgeStats {
    /// Zero the three traffic counters; link status and last lines are
    /// live state and stay.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_bridge::BridgeStats;
    ///
    /// let mut stats = BridgeStats {
    ///     commands_received: 3,
    ///     commands_forwarded: 2,
    ///     link_open: true,
    ///     ..BridgeStats::default()
    /// };
    ///
    /// stats.clear();
    /// assert_eq!(stats.commands_received, 0);
    /// assert!(stats.link_open);
    /// ```
    pub fn clear(&mut self) {
        self.commands_received = 0;
        self.commands_forwarded = 0;
        self.responses_received = 0;
    }
}

/// Steering messages accepted by the bridge task.
#[derive(Debug)]
pub enum BridgeDirective {
    /// A textual command to translate and forward.
    Command(String),
    /// The structured OUTPUT pair to translate and forward.
    Output { output: u8, state: u8 },
    /// Open the link now (otherwise it opens lazily per command).
    Connect,
    /// Close the link.
    Disconnect,
    /// Zero the traffic counters.
    ClearStats,
}

/// Handle to a running bridge task.
#[derive(Clone)]
pub struct BridgeHandle {
    directives: mpsc::Sender<BridgeDirective>,
    stats: Arc<Mutex<BridgeStats>>,
    events: broadcast::Sender<EngineEvent>,
}

impl BridgeHandle {
    /// Forward a textual command.
    pub async fn command(&self, text: impl Into<String>) {
        let _ = self
            .directives
            .send(BridgeDirective::Command(text.into()))
            .await;
    }

    /// Forward a structured OUTPUT command.
    pub async fn output(&self, output: u8, state: u8) {
        let _ = self
            .directives
            .send(BridgeDirective::Output { output, state })
            .await;
    }

    /// Open the link eagerly.
    pub async fn connect(&self) {
        let _ = self.directives.send(BridgeDirective::Connect).await;
    }

    /// Close the link.
    pub async fn disconnect(&self) {
        let _ = self.directives.send(BridgeDirective::Disconnect).await;
    }

    /// Zero the traffic counters.
    pub async fn clear_stats(&self) {
        let _ = self.directives.send(BridgeDirective::ClearStats).await;
    }

    /// Snapshot of the current stats.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.stats.lock().expect("bridge stats lock").clone()
    }

    /// Subscribe to the bridge's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// The bridge task: owns the link, applies directives, pumps replies.
pub struct Bridge<L: CommandLink> {
    link: L,
    stats: Arc<Mutex<BridgeStats>>,
    events: broadcast::Sender<EngineEvent>,
}

impl<L: CommandLink> Bridge<L> {
    /// Wrap a link; returns the bridge (to be `run`) and its handle.
    #[must_use]
    pub fn new(link: L) -> (Self, BridgeHandle, mpsc::Receiver<BridgeDirective>) {
        let (directives_tx, directives_rx) = mpsc::channel(DIRECTIVE_CHANNEL_CAPACITY);
        let stats = Arc::new(Mutex::new(BridgeStats::default()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handle = BridgeHandle {
            directives: directives_tx,
            stats: stats.clone(),
            events: events.clone(),
        };
        (
            Bridge {
                link,
                stats,
                events,
            },
            handle,
            directives_rx,
        )
    }

    /// Serve directives and link replies until every handle is dropped.
    pub async fn run(mut self, mut directives: mpsc::Receiver<BridgeDirective>) {
        debug!(link = %self.link.description(), "bridge task started");
        loop {
            let link_open = self.link.is_open();
            tokio::select! {
                directive = directives.recv() => match directive {
                    None => break,
                    Some(directive) => self.apply(directive).await,
                },
                line = self.link.read_line(), if link_open => self.on_reply(line),
            }
        }
        self.link.close().await;
        debug!("bridge task stopped");
    }

    async fn apply(&mut self, directive: BridgeDirective) {
        match directive {
            BridgeDirective::Command(text) => {
                self.stats_mut(|s| s.commands_received += 1);
                let line = translate_text(&text);
                trace!(command = %text, %line, "translated");
                self.forward(line).await;
            }
            BridgeDirective::Output { output, state } => {
                self.stats_mut(|s| s.commands_received += 1);
                self.forward(translate_output(output, state)).await;
            }
            BridgeDirective::Connect => {
                self.ensure_open().await;
            }
            BridgeDirective::Disconnect => {
                if self.link.is_open() {
                    self.link.close().await;
                    self.stats_mut(|s| s.link_open = false);
                    self.emit(EngineEvent::BridgeDisconnected);
                }
            }
            BridgeDirective::ClearStats => {
                self.stats_mut(BridgeStats::clear);
            }
        }
    }

    /// Write one translated line, opening the link once if needed.
    async fn forward(&mut self, line: String) {
        if !self.link.is_open() && !self.ensure_open().await {
            self.emit(EngineEvent::Error {
                message: format!("command dropped: link not open ({line})"),
            });
            return;
        }

        match self.link.write_line(&line).await {
            Ok(()) => {
                self.stats_mut(|s| {
                    s.commands_forwarded += 1;
                    s.last_line_tx = Some(line.clone());
                });
                self.emit(EngineEvent::BridgeTx { line });
            }
            Err(e) => {
                warn!("bridge write failed: {e}");
                let open = self.link.is_open();
                self.stats_mut(|s| s.link_open = open);
                self.emit(EngineEvent::Error {
                    message: format!("command dropped: {e}"),
                });
                if !open {
                    self.emit(EngineEvent::BridgeDisconnected);
                }
            }
        }
    }

    /// Single reconnect attempt; true when the link ends up open.
    async fn ensure_open(&mut self) -> bool {
        if self.link.is_open() {
            return true;
        }
        match self.link.open().await {
            Ok(()) => {
                info!(link = %self.link.description(), "bridge link open");
                self.stats_mut(|s| s.link_open = true);
                self.emit(EngineEvent::BridgeConnected);
                true
            }
            Err(e) => {
                warn!("bridge open failed: {e}");
                self.emit(EngineEvent::Error {
                    message: format!("bridge open failed: {e}"),
                });
                false
            }
        }
    }

    fn on_reply(&mut self, line: Result<Option<String>>) {
        match line {
            Ok(Some(line)) => {
                let kind = classify_reply(&line);
                trace!(%line, kind = kind.as_str(), "bridge reply");
                self.stats_mut(|s| {
                    s.responses_received += 1;
                    s.last_line_rx = Some(line.clone());
                });
                if kind == ReplyKind::Error {
                    self.emit(EngineEvent::Warning {
                        message: format!("bridge error reply: {line}"),
                    });
                }
                self.emit(EngineEvent::BridgeRx { line });
            }
            Ok(None) => {
                self.stats_mut(|s| s.link_open = false);
                self.emit(EngineEvent::BridgeDisconnected);
            }
            Err(e) => {
                warn!("bridge read failed: {e}");
                self.stats_mut(|s| s.link_open = false);
                self.emit(EngineEvent::Error {
                    message: format!("bridge read failed: {e}"),
                });
                self.emit(EngineEvent::BridgeDisconnected);
            }
        }
    }

    fn stats_mut(&self, update: impl FnOnce(&mut BridgeStats)) {
        update(&mut self.stats.lock().expect("bridge stats lock"));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
