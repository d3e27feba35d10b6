//! Infrastructure layer for wb-client.
//!
//! All I/O lives here: opening WebSocket connections to the bridge, pumping
//! frames between the socket and the connection manager, and loading session
//! options from TOML files.

pub mod config_file;
pub mod transport;

pub use config_file::{load_options, parse_options, ConfigFileError};
pub use transport::{
    BridgeTarget, Link, LinkEvent, LinkPeer, MockTransport, Transport, TransportError,
    WebSocketTransport,
};
