//! ConnectionManager: lifecycle of the single bridge session.
//!
//! The manager is split into a cheap handle ([`ConnectionManager`]) and a
//! driver task that owns all mutable session state:
//!
//! ```text
//! caller ── connect()/disconnect()/send() ──▶ command channel ──▶ driver task
//!                                                                   │ owns: phase, Link,
//!                                                                   │ connect attempt,
//!                                                                   │ reconnect timer
//! caller ◀── Subscription<T> ◀── EventBus ◀──────────────────────────┘
//! ```
//!
//! The driver is a single `select!` loop, so every transition runs to
//! completion before the next input (command, attempt result, timer fire or
//! link event) is looked at.  None of the handle's operations block; their
//! effects are observed through [`SessionEvent`]s.
//!
//! # Phases
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──open──▶ AuthPending ──handshake sent──▶ Connected
//!  ▲                      │                                                  │
//!  └──── attempt failed ──┘                                remote close │ disconnect()
//!                                                                        ▼      ▼
//!                                                           Disconnected ◀─ Closing
//! ```
//!
//! After a failure or a close the [`ReconnectPolicy`](wb_core::ReconnectPolicy)
//! decides whether a retry is scheduled.  At most one retry timer exists; every
//! scheduling replaces the previous one.
//!
//! `Connected` is optimistic: the bridge sends no acknowledgment of the
//! `"authapp"` request, so it means "socket open and credentials sent".

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, trace, warn};

use wb_core::{
    encode_auth_request, encode_envelope, envelope_from, Envelope, Frame, SessionConfig, TagFilter,
};

use crate::application::events::{EventBus, SessionEvent, Subscription};
use crate::application::route_message::{route_frame, RouteOutcome};
use crate::infrastructure::transport::{BridgeTarget, Link, LinkEvent, Transport, TransportError};

/// Reason carried by `SendError` events when no connection is open.
pub const NOT_CONNECTED: &str = "bridge not connected";

/// Reason carried by the `ConnectionClosed` event after [`ConnectionManager::disconnect`].
pub const CLOSED_BY_CLIENT: &str = "closed by client";

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    AuthPending,
    Connected,
    Closing,
    Disconnected,
}

impl Phase {
    /// `true` while a transport connection is open.
    pub fn is_transport_connected(self) -> bool {
        matches!(self, Phase::AuthPending | Phase::Connected)
    }
}

/// Why [`ConnectionManager::send`] dropped a message.
///
/// Every rejection is also published as a `SendError` event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("bridge not connected")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("connection manager has stopped")]
    Stopped,
}

/// Running counters for one manager.  Observability only; they never feed
/// back into the retry cadence.
#[derive(Debug, Default)]
pub struct SessionStats {
    attempts: AtomicU64,
    failures: AtomicU64,
    handshakes: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    binary_dropped: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub failures: u64,
    pub handshakes: u64,
    pub delivered: u64,
    pub filtered: u64,
    pub binary_dropped: u64,
    pub malformed: u64,
}

impl SessionStats {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            binary_dropped: self.binary_dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
}

/// Handle to one bridge session.
///
/// Dropping the handle stops the driver task and drops any open connection.
pub struct ConnectionManager {
    config: Arc<SessionConfig>,
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
    phase: watch::Receiver<Phase>,
    stats: Arc<SessionStats>,
}

impl ConnectionManager {
    /// Creates the manager in [`Phase::Idle`] and spawns its driver task.
    ///
    /// No connection is attempted until [`connect`](Self::connect) is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let events = EventBus::new();
        let stats = Arc::new(SessionStats::default());

        let driver = SessionDriver {
            filter: config.tag_filter(),
            target: BridgeTarget::from_config(&config),
            config: Arc::clone(&config),
            transport,
            commands: cmd_rx,
            events: events.clone(),
            phase: phase_tx,
            stats: Arc::clone(&stats),
            attempt: None,
            reconnect: None,
            link: None,
        };
        tokio::spawn(driver.run());

        debug!("connection manager started: {config:?}");

        Self {
            config,
            commands: cmd_tx,
            events,
            phase: phase_rx,
            stats,
        }
    }

    /// Starts connecting.  Ignored while already connecting or connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Drops the open connection, if any.
    ///
    /// The drop is reported as `ConnectionClosed` and then handled like any
    /// other close, including a scheduled reconnect when the policy allows it.
    /// With no open connection this only cancels a pending reconnect; an
    /// attempt already in flight still completes and opens the session.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Sends `envelope` if a connection is open.
    ///
    /// At most once, best effort: nothing is queued or retried.
    ///
    /// `Ok(())` means the message was handed to the session driver, not that
    /// it was written.  If the connection closes before the driver gets to
    /// it, the message is dropped and one `SendError` event carrying
    /// [`NOT_CONNECTED`] is published instead.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] when no connection is open,
    /// [`SendError::Encode`] if the envelope cannot be serialized, and
    /// [`SendError::Stopped`] if the driver task is gone.  Each rejection is
    /// also published as exactly one `SendError` event and nothing is written.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if !self.is_ready() {
            return Err(self.reject(SendError::NotConnected));
        }
        let text =
            encode_envelope(envelope).map_err(|e| self.reject(SendError::Encode(e.to_string())))?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| self.reject(SendError::Stopped))
    }

    /// Sends `payload` under `tag`.  The same delivery caveat as
    /// [`send`](Self::send) applies to `Ok(())`.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub fn send_payload<T: Serialize>(&self, tag: &str, payload: &T) -> Result<(), SendError> {
        let envelope =
            envelope_from(tag, payload).map_err(|e| self.reject(SendError::Encode(e.to_string())))?;
        self.send(&envelope)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// A receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// `true` while a transport connection is open and sends are accepted.
    pub fn is_ready(&self) -> bool {
        self.phase().is_transport_connected()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The event bus, for subscribing to a single event kind.
    pub fn bus(&self) -> &EventBus {
        &self.events
    }

    pub fn events(&self) -> Subscription<SessionEvent> {
        self.events.events()
    }

    pub fn messages(&self) -> Subscription<Envelope> {
        self.events.messages()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("connection manager driver has stopped; command ignored");
        }
    }

    fn reject(&self, error: SendError) -> SendError {
        warn!("dropping outbound message: {error}");
        self.events.publish(SessionEvent::SendError {
            reason: error.to_string(),
        });
        error
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

type ConnectAttempt = Pin<Box<dyn Future<Output = Result<Link, TransportError>> + Send>>;

/// Owns the session state; runs as one task per manager.
struct SessionDriver {
    config: Arc<SessionConfig>,
    filter: TagFilter,
    target: BridgeTarget,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventBus,
    phase: watch::Sender<Phase>,
    stats: Arc<SessionStats>,
    /// In-flight connection attempt.
    attempt: Option<ConnectAttempt>,
    /// The one pending reconnect timer.
    reconnect: Option<Pin<Box<Sleep>>>,
    /// The open connection.
    link: Option<Link>,
}

impl SessionDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("connection manager dropped; stopping session driver");
                        break;
                    }
                },
                result = next_attempt_result(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_attempt_finished(result);
                }
                () = next_timer_fire(&mut self.reconnect) => {
                    self.reconnect = None;
                    info!("reconnecting to bridge at {}", self.target.url);
                    self.begin_attempt();
                }
                event = next_link_event(&mut self.link) => self.on_link_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.on_connect(),
            Command::Disconnect => self.on_disconnect(),
            Command::Send(text) => self.on_send(text),
        }
    }

    fn on_connect(&mut self) {
        if self.link.is_some() || self.attempt.is_some() {
            debug!("connect requested while {:?}; ignoring", self.current_phase());
            return;
        }
        self.cancel_reconnect();
        self.begin_attempt();
    }

    fn on_disconnect(&mut self) {
        match self.link.take() {
            Some(link) => {
                info!("disconnecting from bridge at {}", self.target.url);
                self.set_phase(Phase::Closing);
                drop(link);
                self.finish_close(CLOSED_BY_CLIENT.to_string());
            }
            None => {
                self.cancel_reconnect();
                debug!("disconnect requested while not connected");
            }
        }
    }

    fn on_send(&mut self, text: String) {
        let len = text.len();
        let sent = match &self.link {
            Some(link) if link.is_open() => link.send(Frame::Text(text)).is_ok(),
            _ => false,
        };
        if sent {
            trace!("queued {len} byte message for the bridge");
        } else {
            warn!("dropping outbound message: {NOT_CONNECTED}");
            self.events.publish(SessionEvent::SendError {
                reason: NOT_CONNECTED.to_string(),
            });
        }
    }

    fn begin_attempt(&mut self) {
        let attempt = SessionStats::bump(&self.stats.attempts);
        info!(
            "connecting to bridge at {} (attempt {attempt})",
            self.target.url
        );
        self.set_phase(Phase::Connecting);

        let transport = Arc::clone(&self.transport);
        let target = self.target.clone();
        self.attempt = Some(Box::pin(async move { transport.connect(&target).await }));
    }

    fn on_attempt_finished(&mut self, result: Result<Link, TransportError>) {
        match result {
            Ok(link) => self.on_transport_open(link),
            Err(e) => {
                SessionStats::bump(&self.stats.failures);
                warn!("bridge connection failed: {e}");
                self.set_phase(Phase::Idle);
                self.events.publish(SessionEvent::ConnectionFailed {
                    reason: e.to_string(),
                });
                self.schedule_reconnect();
            }
        }
    }

    /// Sends the handshake on a freshly opened link and enters `Connected`.
    fn on_transport_open(&mut self, link: Link) {
        self.set_phase(Phase::AuthPending);

        let handshake = encode_auth_request(&self.config)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                link.send(Frame::Text(text))
                    .map_err(|_| "transport closed before handshake".to_string())
            });
        if let Err(reason) = handshake {
            warn!("bridge handshake failed: {reason}");
            drop(link);
            self.finish_close(reason);
            return;
        }

        SessionStats::bump(&self.stats.handshakes);
        self.link = Some(link);
        info!(
            "connected to bridge at {} as {}",
            self.target.url,
            self.config.applet_id()
        );
        self.set_phase(Phase::Connected);
        self.events.publish(SessionEvent::Connected);
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(frame)) => self.on_frame(frame),
            Some(LinkEvent::Error(reason)) => {
                warn!("bridge connection error: {reason}");
                self.events
                    .publish(SessionEvent::ConnectionError { reason });
            }
            Some(LinkEvent::Closed(reason)) => {
                self.link = None;
                self.finish_close(reason);
            }
            None => {
                self.link = None;
                self.finish_close("transport ended".to_string());
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match route_frame(frame, &self.filter) {
            RouteOutcome::Deliver(envelope) => {
                SessionStats::bump(&self.stats.delivered);
                debug!("delivering message tagged {}", envelope.tag);
                self.events.publish(SessionEvent::Message(envelope));
            }
            RouteOutcome::Filtered { tag } => {
                SessionStats::bump(&self.stats.filtered);
                trace!("ignoring message tagged {tag}");
            }
            RouteOutcome::Binary { len } => {
                let dropped = SessionStats::bump(&self.stats.binary_dropped);
                warn!("binary frames are not supported; dropped {len} bytes ({dropped} so far)");
            }
            RouteOutcome::Malformed(e) => {
                SessionStats::bump(&self.stats.malformed);
                warn!("dropping inbound frame: {e}");
                self.events.publish(SessionEvent::DecodeError {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn finish_close(&mut self, reason: String) {
        info!("bridge connection closed: {reason}");
        self.set_phase(Phase::Disconnected);
        self.events
            .publish(SessionEvent::ConnectionClosed { reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.config.reconnect_policy().next_delay() {
            Some(delay) => {
                info!("retrying bridge connection in {delay:?}");
                // Replacing the option drops (cancels) any earlier timer.
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
            None => debug!("auto-reconnect disabled; waiting for connect()"),
        }
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect.take().is_some() {
            info!("pending bridge reconnect cancelled");
        }
    }

    fn current_phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!("session phase {previous:?} -> {phase:?}");
        }
    }
}

async fn next_attempt_result(
    attempt: &mut Option<ConnectAttempt>,
) -> Result<Link, TransportError> {
    match attempt {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn next_timer_fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => pending().await,
    }
}

async fn next_link_event(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
