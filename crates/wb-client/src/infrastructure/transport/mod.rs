//! Transport capability: open a socket to the bridge and exchange frames.
//!
//! The connection manager never touches WebSocket types directly.  A
//! [`Transport`] turns a [`BridgeTarget`] into a [`Link`]: a pair of channels
//! over which the manager writes outbound [`Frame`]s and receives
//! [`LinkEvent`]s in the order the socket produced them.
//!
//! ```text
//! ConnectionManager                      Transport task(s)
//! ─────────────────                      ─────────────────
//! Link.outbound  ── Frame ──────────────▶ LinkPeer.outbound ─▶ socket
//! Link.inbound   ◀── LinkEvent ───────── LinkPeer.inbound  ◀─ socket
//! ```
//!
//! Dropping the [`Link`] is how the manager force-drops a connection: the
//! transport sees its outbound channel close and shuts the socket.
//!
//! # Testability
//!
//! [`mock::MockTransport`] hands tests the [`LinkPeer`] of every accepted
//! connection so they can inject frames and inspect writes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use wb_core::{Frame, SessionConfig};

pub mod mock;
pub mod websocket;

pub use mock::{MockOutcome, MockTransport};
pub use websocket::WebSocketTransport;

/// Error type for connection attempts.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The upgrade request could not be built from the target.
    #[error("invalid bridge target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    /// The socket could not be opened or the WebSocket handshake failed.
    #[error("failed to connect to bridge at {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// A `wss://` target was requested without TLS support compiled in.
    #[error("secure bridge target {0} requires the `tls` feature")]
    TlsUnavailable(String),
}

/// Where and how to open the bridge socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTarget {
    pub url: String,
    pub sub_protocol: String,
    pub origin: String,
}

impl BridgeTarget {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            url: config.bridge_url(),
            sub_protocol: config.sub_protocol().to_string(),
            origin: config.origin().to_string(),
        }
    }
}

/// Something the transport observed on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A data frame arrived.
    Frame(Frame),
    /// The socket reported an error.  Does not by itself end the link.
    Error(String),
    /// The socket closed.  No further events follow.
    Closed(String),
}

/// Manager side of an open connection.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Transport side of an open connection.
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the manager asked to write.
    pub outbound: mpsc::UnboundedReceiver<Frame>,
    /// Events to report back to the manager.
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
}

impl Link {
    /// Creates a connected manager/transport channel pair.
    pub fn pair() -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// `true` while the transport is still accepting outbound frames.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queues a frame for writing.
    ///
    /// # Errors
    ///
    /// Returns the frame back if the transport side has gone away.
    pub fn send(&self, frame: Frame) -> Result<(), Frame> {
        self.outbound.send(frame).map_err(|e| e.0)
    }

    /// Waits for the next event.  `None` means the transport side is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }
}

impl LinkPeer {
    /// Reports an event to the manager.  Returns `false` if the manager has
    /// dropped the link.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.inbound.send(event).is_ok()
    }
}

/// Capability to open connections to the bridge.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens one connection to `target`.
    ///
    /// Resolves once the socket is open (or the attempt has failed); all later
    /// activity is reported through the returned [`Link`].
    async fn connect(&self, target: &BridgeTarget) -> Result<Link, TransportError>;
}
