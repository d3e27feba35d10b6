//! JSON codec for bridge envelopes.

use thiserror::Error;

use crate::domain::config::SessionConfig;
use crate::protocol::messages::{AuthPayload, Envelope, AUTH_TAG};

/// Error type for encoding and decoding bridge messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Inbound text was not a JSON object with a string `t` field.
    #[error("malformed bridge message: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outbound value could not be serialized.
    #[error("failed to encode bridge message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serializes an envelope into the text of one WebSocket frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the payload cannot be serialized.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Parses the text of one WebSocket frame into an envelope.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if `text` is not valid JSON, is not an
/// object, or has no string `t` field.
///
/// ```rust
/// use wb_core::decode_envelope;
///
/// let env = decode_envelope(r#"{"t":"lights","p":{"on":true}}"#).unwrap();
/// assert_eq!(env.tag, "lights");
/// assert!(decode_envelope("not json").is_err());
/// ```
pub fn decode_envelope(text: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

/// Builds the `"authapp"` handshake frame for `config`.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_auth_request(config: &SessionConfig) -> Result<String, CodecError> {
    let payload = AuthPayload {
        user: config.auth_user().to_string(),
        pass: config.auth_pass().to_string(),
        accept: config.accepted_tags().iter().cloned().collect(),
    };
    let payload = serde_json::to_value(payload).map_err(CodecError::Encode)?;
    encode_envelope(&Envelope::new(AUTH_TAG, payload))
}

/// Convenience for building an envelope from a tag and any JSON-able payload.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if `payload` cannot be converted to JSON.
pub fn envelope_from<T: serde::Serialize>(tag: &str, payload: &T) -> Result<Envelope, CodecError> {
    let payload = serde_json::to_value(payload).map_err(CodecError::Encode)?;
    Ok(Envelope::new(tag, payload))
}
