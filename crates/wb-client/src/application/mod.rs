//! Application layer for wb-client.
//!
//! Decides *what* the session does: when to connect, what to send first,
//! which inbound messages to deliver and what to tell subscribers.  Opening
//! sockets is delegated to a [`Transport`](crate::infrastructure::Transport).
//!
//! # What does NOT belong here?
//!
//! - WebSocket framing and headers (infrastructure)
//! - Reading config files or the environment (infrastructure and `main.rs`)

pub mod connection_manager;
pub mod events;
pub mod route_message;

pub use connection_manager::{ConnectionManager, Phase, SendError, StatsSnapshot};
pub use events::{EventBus, SessionEvent, Subscription};
pub use route_message::{route_frame, RouteOutcome};
