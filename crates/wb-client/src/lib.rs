//! wb-client library crate.
//!
//! A client-side session manager for the web bridge: it keeps one WebSocket
//! connection to the bridge open, authenticates as an applet, reconnects
//! after failures, and delivers only the inbound messages addressed to the
//! applet (or broadcast to everyone).
//!
//! # Architecture
//!
//! ```text
//! Applet code
//!     ↕  connect()/disconnect()/send()  +  Subscription<T>
//! [wb-client]
//!   ├── application/
//!   │     ├── connection_manager/  Phase machine, reconnect timer, send guard
//!   │     ├── route_message/       Inbound frame → deliver / filter / drop
//!   │     └── events/              Typed publish/subscribe bus
//!   └── infrastructure/
//!         ├── transport/           Transport trait, WebSocket and mock impls
//!         └── config_file/         TOML session options
//!     ↕  JSON text frames over WebSocket
//! Bridge server
//! ```
//!
//! Configuration, the tag filter and the JSON codec live in `wb-core`.
//!
//! # Layer rules
//!
//! - `application` depends on `wb-core` and on the `Transport` trait only.
//! - `infrastructure` owns every socket and file access.

/// Application layer: session lifecycle, routing and events.
pub mod application;

/// Infrastructure layer: bridge transports and config files.
pub mod infrastructure;

pub use application::{
    ConnectionManager, EventBus, Phase, SendError, SessionEvent, StatsSnapshot, Subscription,
};
pub use infrastructure::{MockTransport, Transport, WebSocketTransport};
