//! TOML session options on disk.
//!
//! A config file holds any subset of the [`SessionOptions`] fields at the top
//! level.  Either snake_case or the bridge's camelCase keys work:
//!
//! ```toml
//! applet_id = "lights"
//! accepts = ["lights", "scenes"]
//! bridge_host = "bridge.lan"
//! bridge_port = 8088
//! secure = false
//! reconnectDelayMs = 2000
//! ```
//!
//! Anything missing falls back to the defaults in `SessionConfig`, and the
//! binary layers its CLI flags on top of whatever the file provides.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use wb_core::SessionOptions;

/// Error type for config file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parses session options from TOML text.
///
/// # Errors
///
/// Returns [`ConfigFileError::Parse`] if the text is not valid TOML or a
/// field has the wrong type.
pub fn parse_options(text: &str) -> Result<SessionOptions, ConfigFileError> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses session options from `path`.
///
/// Unlike a settings store there is no "missing file means defaults" rule:
/// the caller named this file, so its absence is an error.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if its content is malformed.
pub fn load_options(path: &Path) -> Result<SessionOptions, ConfigFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("loaded session options from {}", path.display());
    parse_options(&text)
}
