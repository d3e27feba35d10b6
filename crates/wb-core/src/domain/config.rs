//! Session configuration.
//!
//! [`SessionConfig`] is the single, immutable record every other component
//! reads: who this applet is, which tags it receives, how it authenticates,
//! where the bridge lives and how to behave when the connection drops.
//!
//! It is built once from a [`ConfigInput`], which is either a bare applet id
//! or a [`SessionOptions`] record in which every field is optional.  Missing
//! fields are defaulted one by one, so supplying a subset never disturbs the
//! defaults of the others.
//!
//! # Defaults
//!
//! | Field                | Default              |
//! |----------------------|----------------------|
//! | `accepts`            | `{applet_id}`        |
//! | `auth_user`          | `"applet"`           |
//! | `auth_pass`          | `"applet"`           |
//! | `bridge_host`        | `"127.0.0.1"`        |
//! | `bridge_port`        | `8088`               |
//! | `sub_protocol`       | `"webbridge"`        |
//! | `origin`             | `"http://localhost"` |
//! | `auto_reconnect`     | `true`               |
//! | `reconnect_delay_ms` | `5000`               |
//! | `secure`             | `true`               |

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::tags::TagFilter;

pub const DEFAULT_AUTH_USER: &str = "applet";
pub const DEFAULT_AUTH_PASS: &str = "applet";
pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BRIDGE_PORT: u16 = 8088;
pub const DEFAULT_SUB_PROTOCOL: &str = "webbridge";
pub const DEFAULT_ORIGIN: &str = "http://localhost";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Error type for configuration construction.
///
/// Configuration errors are raised synchronously at construction time; they
/// are never deferred to connection time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No input at all was supplied.
    #[error("no session configuration supplied")]
    MissingInput,
    /// A structured input lacked the applet id (or it was blank).
    #[error("session configuration is missing the applet id")]
    MissingAppletId,
}

/// The `accepts` option: either a single tag or a list of tags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Accepts {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Accepts {
    fn from(tag: &str) -> Self {
        Accepts::One(tag.to_string())
    }
}

impl From<Vec<String>> for Accepts {
    fn from(tags: Vec<String>) -> Self {
        Accepts::Many(tags)
    }
}

/// Structured, partially-specified configuration input.
///
/// Keys are snake_case; the camelCase spellings (`appletId`, `authUser`, ...)
/// are accepted as aliases so existing bridge config files load unchanged.
///
/// ```rust
/// use wb_core::{SessionConfig, SessionOptions};
///
/// let options = SessionOptions {
///     applet_id: Some("lights".to_string()),
///     bridge_port: Some(9000),
///     ..Default::default()
/// };
/// let cfg = SessionConfig::build(Some(options.into())).unwrap();
/// assert_eq!(cfg.bridge_port(), 9000);
/// assert_eq!(cfg.auth_user(), "applet");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionOptions {
    #[serde(alias = "appletId")]
    pub applet_id: Option<String>,
    pub accepts: Option<Accepts>,
    #[serde(alias = "authUser")]
    pub auth_user: Option<String>,
    #[serde(alias = "authPass")]
    pub auth_pass: Option<String>,
    #[serde(alias = "bridgeHost")]
    pub bridge_host: Option<String>,
    #[serde(alias = "bridgePort")]
    pub bridge_port: Option<u16>,
    #[serde(alias = "subProtocol")]
    pub sub_protocol: Option<String>,
    pub origin: Option<String>,
    #[serde(alias = "autoReconnect")]
    pub auto_reconnect: Option<bool>,
    #[serde(alias = "reconnectDelayMs")]
    pub reconnect_delay_ms: Option<u64>,
    pub secure: Option<bool>,
}

impl SessionOptions {
    /// Layers `overrides` on top of `self`, field by field.
    ///
    /// A field set in `overrides` wins; an unset field keeps the value from
    /// `self`.
    pub fn merge(self, overrides: SessionOptions) -> SessionOptions {
        SessionOptions {
            applet_id: overrides.applet_id.or(self.applet_id),
            accepts: overrides.accepts.or(self.accepts),
            auth_user: overrides.auth_user.or(self.auth_user),
            auth_pass: overrides.auth_pass.or(self.auth_pass),
            bridge_host: overrides.bridge_host.or(self.bridge_host),
            bridge_port: overrides.bridge_port.or(self.bridge_port),
            sub_protocol: overrides.sub_protocol.or(self.sub_protocol),
            origin: overrides.origin.or(self.origin),
            auto_reconnect: overrides.auto_reconnect.or(self.auto_reconnect),
            reconnect_delay_ms: overrides.reconnect_delay_ms.or(self.reconnect_delay_ms),
            secure: overrides.secure.or(self.secure),
        }
    }
}

/// Construction input: a bare applet id or a structured options record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInput {
    Id(String),
    Options(SessionOptions),
}

impl From<&str> for ConfigInput {
    fn from(id: &str) -> Self {
        ConfigInput::Id(id.to_string())
    }
}

impl From<String> for ConfigInput {
    fn from(id: String) -> Self {
        ConfigInput::Id(id)
    }
}

impl From<SessionOptions> for ConfigInput {
    fn from(options: SessionOptions) -> Self {
        ConfigInput::Options(options)
    }
}

/// Fixed-delay reconnection policy.
///
/// The connection state machine only ever asks [`ReconnectPolicy::next_delay`];
/// a different cadence (backoff, attempt caps) is a change to this type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    enabled: bool,
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, delay: Duration) -> Self {
        Self { enabled, delay }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns the delay before the next attempt, or `None` when reconnection
    /// is disabled.
    pub fn next_delay(&self) -> Option<Duration> {
        self.enabled.then_some(self.delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(true, Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
    }
}

/// Fully-populated, immutable session configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    applet_id: String,
    accepted_tags: BTreeSet<String>,
    auth_user: String,
    auth_pass: String,
    bridge_host: String,
    bridge_port: u16,
    sub_protocol: String,
    origin: String,
    secure: bool,
    reconnect: ReconnectPolicy,
}

impl SessionConfig {
    /// Validates and normalizes `input` into a configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingInput`] if `input` is `None`.
    /// - [`ConfigError::MissingAppletId`] if the applet id is absent or blank.
    ///
    /// # Example
    ///
    /// ```rust
    /// use wb_core::SessionConfig;
    ///
    /// let cfg = SessionConfig::build(Some("lights".into())).unwrap();
    /// assert!(cfg.accepted_tags().contains("lights"));
    /// assert_eq!(cfg.bridge_url(), "wss://127.0.0.1:8088/");
    /// ```
    pub fn build(input: Option<ConfigInput>) -> Result<Self, ConfigError> {
        let options = match input.ok_or(ConfigError::MissingInput)? {
            ConfigInput::Id(id) => SessionOptions {
                applet_id: Some(id),
                ..Default::default()
            },
            ConfigInput::Options(options) => options,
        };
        Self::from_options(options)
    }

    /// Builds a configuration from structured options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAppletId`] if the applet id is absent or
    /// blank.
    pub fn from_options(options: SessionOptions) -> Result<Self, ConfigError> {
        let applet_id = options
            .applet_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingAppletId)?;

        let accepted_tags = match options.accepts {
            Some(Accepts::One(tag)) => BTreeSet::from([tag]),
            Some(Accepts::Many(tags)) if !tags.is_empty() => tags.into_iter().collect(),
            Some(Accepts::Many(_)) => {
                debug!("empty accepts list for applet {applet_id}; accepting its own id");
                BTreeSet::from([applet_id.clone()])
            }
            None => BTreeSet::from([applet_id.clone()]),
        };

        let reconnect = ReconnectPolicy::new(
            options.auto_reconnect.unwrap_or(true),
            Duration::from_millis(
                options
                    .reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
        );

        Ok(Self {
            applet_id,
            accepted_tags,
            auth_user: options
                .auth_user
                .unwrap_or_else(|| DEFAULT_AUTH_USER.to_string()),
            auth_pass: options
                .auth_pass
                .unwrap_or_else(|| DEFAULT_AUTH_PASS.to_string()),
            bridge_host: options
                .bridge_host
                .unwrap_or_else(|| DEFAULT_BRIDGE_HOST.to_string()),
            bridge_port: options.bridge_port.unwrap_or(DEFAULT_BRIDGE_PORT),
            sub_protocol: options
                .sub_protocol
                .unwrap_or_else(|| DEFAULT_SUB_PROTOCOL.to_string()),
            origin: options
                .origin
                .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
            secure: options.secure.unwrap_or(true),
            reconnect,
        })
    }

    pub fn applet_id(&self) -> &str {
        &self.applet_id
    }

    /// Tags this applet receives, in sorted order.
    pub fn accepted_tags(&self) -> &BTreeSet<String> {
        &self.accepted_tags
    }

    pub fn auth_user(&self) -> &str {
        &self.auth_user
    }

    pub fn auth_pass(&self) -> &str {
        &self.auth_pass
    }

    pub fn bridge_host(&self) -> &str {
        &self.bridge_host
    }

    pub fn bridge_port(&self) -> u16 {
        self.bridge_port
    }

    pub fn sub_protocol(&self) -> &str {
        &self.sub_protocol
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect
    }

    /// The WebSocket URL of the bridge: `wss://host:port/` or `ws://host:port/`.
    pub fn bridge_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/", self.bridge_host, self.bridge_port)
    }

    /// Builds the inbound filter for this applet's accepted tags.
    pub fn tag_filter(&self) -> TagFilter {
        TagFilter::new(self.accepted_tags.iter().cloned())
    }
}

impl fmt::Debug for SessionConfig {
    // The password never reaches log output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("applet_id", &self.applet_id)
            .field("accepted_tags", &self.accepted_tags)
            .field("auth_user", &self.auth_user)
            .field("auth_pass", &"<redacted>")
            .field("bridge_url", &self.bridge_url())
            .field("sub_protocol", &self.sub_protocol)
            .field("origin", &self.origin)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
