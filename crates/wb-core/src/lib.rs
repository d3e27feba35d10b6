//! # wb-core
//!
//! Shared, I/O-free foundation of the web bridge client.
//!
//! A *bridge* is a message-routing endpoint that many small applets share over
//! one WebSocket each.  Every message on the wire is a JSON object carrying a
//! tag (`t`) and a payload (`p`); each applet only reacts to the tags it
//! declared at configuration time, plus the reserved broadcast tag `"all"`.
//!
//! This crate defines:
//!
//! - **`domain`** – the immutable [`SessionConfig`] (identity, accepted tags,
//!   credentials, bridge target, reconnection policy) and the [`TagFilter`]
//!   that decides which inbound messages an applet receives.
//!
//! - **`protocol`** – the wire [`Envelope`], the authentication handshake
//!   payload, the typed [`Frame`] a transport delivers, and the JSON codec.
//!
//! Nothing here touches sockets, timers or async runtimes; the connection
//! lifecycle lives in the `wb-client` crate.

pub mod domain;
pub mod protocol;

pub use domain::config::{
    Accepts, ConfigError, ConfigInput, ReconnectPolicy, SessionConfig, SessionOptions,
};
pub use domain::tags::{TagFilter, BROADCAST_TAG};
pub use protocol::codec::{
    decode_envelope, encode_auth_request, encode_envelope, envelope_from, CodecError,
};
pub use protocol::messages::{AuthPayload, Envelope, Frame, AUTH_TAG};
