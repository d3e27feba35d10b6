//! Domain layer: session configuration and tag filtering.
//!
//! Pure value types with no dependencies on networking or async runtimes.

pub mod config;
pub mod tags;

pub use config::{ConfigError, ConfigInput, SessionConfig, SessionOptions};
pub use tags::TagFilter;
