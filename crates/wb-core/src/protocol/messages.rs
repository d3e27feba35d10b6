//! Wire message types.
//!
//! Every application message is a JSON object with a tag and a payload:
//!
//! ```json
//! {"t":"lights","p":{"on":true}}
//! ```
//!
//! The authentication handshake is an ordinary envelope tagged `"authapp"`:
//!
//! ```json
//! {"t":"authapp","p":{"user":"applet","pass":"applet","accept":["lights"]}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag of the authentication request sent right after the socket opens.
pub const AUTH_TAG: &str = "authapp";

/// A tagged bridge message.
///
/// Top-level fields other than `t` and `p` are kept in [`Envelope::extra`] so
/// that a republished message is the full record the bridge sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "t")]
    pub tag: String,
    #[serde(rename = "p", default)]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
            extra: Map::new(),
        }
    }
}

/// Payload of the `"authapp"` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: String,
    pub pass: String,
    pub accept: Vec<String>,
}

/// A frame as delivered by the transport.
///
/// Only text frames carry bridge messages; binary frames are accepted by the
/// transport but never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}
