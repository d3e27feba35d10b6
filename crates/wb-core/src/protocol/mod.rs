//! JSON-over-text-frame wire protocol spoken with the bridge.

pub mod codec;
pub mod messages;

pub use codec::{decode_envelope, encode_auth_request, encode_envelope, envelope_from, CodecError};
pub use messages::{AuthPayload, Envelope, Frame, AUTH_TAG};
