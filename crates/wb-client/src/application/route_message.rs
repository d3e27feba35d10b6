//! Inbound routing: decide what happens to one frame from the bridge.
//!
//! Pure function, no I/O.  The connection manager calls [`route_frame`] for
//! every frame the transport delivers and acts on the [`RouteOutcome`]:
//!
//! | Frame                                   | Outcome       | Manager action            |
//! |-----------------------------------------|---------------|---------------------------|
//! | text, tag accepted or `"all"`           | `Deliver`     | publish `Message`         |
//! | text, any other tag                     | `Filtered`    | drop silently             |
//! | text, not a valid envelope              | `Malformed`   | warn, publish `DecodeError` |
//! | binary                                  | `Binary`      | count, log, drop          |

use wb_core::{decode_envelope, CodecError, Envelope, Frame, TagFilter};

/// What to do with one inbound frame.
#[derive(Debug)]
pub enum RouteOutcome {
    Deliver(Envelope),
    Filtered { tag: String },
    Binary { len: usize },
    Malformed(CodecError),
}

/// Routes one inbound frame through `filter`.
pub fn route_frame(frame: Frame, filter: &TagFilter) -> RouteOutcome {
    match frame {
        Frame::Binary(bytes) => RouteOutcome::Binary { len: bytes.len() },
        Frame::Text(text) => match decode_envelope(&text) {
            Ok(envelope) if filter.accepts(&envelope.tag) => RouteOutcome::Deliver(envelope),
            Ok(envelope) => RouteOutcome::Filtered { tag: envelope.tag },
            Err(e) => RouteOutcome::Malformed(e),
        },
    }
}
