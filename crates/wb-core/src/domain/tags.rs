//! Inbound tag filtering.
//!
//! Many applets share one bridge.  Each of them sees every message the bridge
//! fans out, and keeps only those addressed to one of its accepted tags or to
//! the reserved broadcast tag [`BROADCAST_TAG`].  Everything else is dropped
//! silently; a foreign tag is not an error.

use std::collections::BTreeSet;

/// Tag received by every applet regardless of its accepted set.
pub const BROADCAST_TAG: &str = "all";

/// The set of tags one applet receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    accepted: BTreeSet<String>,
}

impl TagFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if a message tagged `tag` should be delivered.
    pub fn accepts(&self, tag: &str) -> bool {
        tag == BROADCAST_TAG || self.accepted.contains(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(String::as_str)
    }
}
