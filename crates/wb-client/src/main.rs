//! wb-client: command-line applet session for the web bridge.
//!
//! Connects to the bridge as one applet, prints every message addressed to
//! it as a JSON line on stdout, and sends every JSON line read from stdin.
//! Lifecycle events (connected, closed, retrying) are logged to stderr.
//!
//! # Usage
//!
//! ```text
//! wb-client [OPTIONS] [APPLET_ID]
//!
//! Options:
//!   -c, --config <FILE>            TOML file with session options
//!       --accept <TAG>             Accepted tag (repeatable) [default: APPLET_ID]
//!       --host <HOST>              Bridge host [default: 127.0.0.1]
//!       --port <PORT>              Bridge port [default: 8088]
//!       --sub-protocol <NAME>      WebSocket subprotocol [default: webbridge]
//!       --origin <URL>             Origin header [default: http://localhost]
//!       --user <USER>              Authentication user [default: applet]
//!       --pass <PASS>              Authentication password [default: applet]
//!       --insecure                 Use ws:// instead of wss://
//!       --no-reconnect             Do not reconnect after a failure or close
//!       --reconnect-delay-ms <MS>  Delay before reconnecting [default: 5000]
//! ```
//!
//! Values are resolved in this order, last one wins: built-in defaults, the
//! `--config` file, `WB_*` environment variables, command-line flags.
//!
//! | Variable                | Flag                   |
//! |-------------------------|------------------------|
//! | `WB_APPLET_ID`          | `APPLET_ID`            |
//! | `WB_ACCEPTS`            | `--accept` (comma list)|
//! | `WB_BRIDGE_HOST`        | `--host`               |
//! | `WB_BRIDGE_PORT`        | `--port`               |
//! | `WB_SUB_PROTOCOL`       | `--sub-protocol`       |
//! | `WB_ORIGIN`             | `--origin`             |
//! | `WB_AUTH_USER`          | `--user`               |
//! | `WB_AUTH_PASS`          | `--pass`               |
//! | `WB_RECONNECT_DELAY_MS` | `--reconnect-delay-ms` |
//! | `WB_CONFIG`             | `--config`             |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use wb_client::infrastructure::load_options;
use wb_client::{ConnectionManager, SessionEvent, WebSocketTransport};
use wb_core::{decode_envelope, encode_envelope, Accepts, SessionConfig, SessionOptions};

/// How long shutdown waits for the session to report its close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Time left for the socket writer to put the Close frame on the wire.
const CLOSE_FLUSH: Duration = Duration::from_millis(250);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Applet session client for the web bridge.
#[derive(Debug, Parser)]
#[command(
    name = "wb-client",
    about = "Reconnecting applet session client for the web bridge",
    version
)]
struct Cli {
    /// Identity of this applet; also the default accepted tag.
    #[arg(env = "WB_APPLET_ID")]
    applet_id: Option<String>,

    /// Tag to accept inbound messages for.  Repeat for several tags.
    ///
    /// Messages tagged `all` are always accepted.
    #[arg(long = "accept", value_name = "TAG", env = "WB_ACCEPTS", value_delimiter = ',')]
    accepts: Vec<String>,

    #[arg(long, env = "WB_BRIDGE_HOST")]
    host: Option<String>,

    #[arg(long, env = "WB_BRIDGE_PORT")]
    port: Option<u16>,

    #[arg(long, value_name = "NAME", env = "WB_SUB_PROTOCOL")]
    sub_protocol: Option<String>,

    /// Value of the `Origin` header on the upgrade request.
    #[arg(long, value_name = "URL", env = "WB_ORIGIN")]
    origin: Option<String>,

    #[arg(long, env = "WB_AUTH_USER")]
    user: Option<String>,

    #[arg(long, env = "WB_AUTH_PASS", hide_env_values = true)]
    pass: Option<String>,

    /// Connect with `ws://` instead of `wss://`.
    #[arg(long)]
    insecure: bool,

    /// Stay disconnected after a failed attempt or a closed connection.
    #[arg(long)]
    no_reconnect: bool,

    #[arg(long, value_name = "MS", env = "WB_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// TOML file with session options.  Flags override its values.
    #[arg(short, long, value_name = "FILE", env = "WB_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The options set explicitly on the command line or in the environment.
    fn overrides(&self) -> SessionOptions {
        SessionOptions {
            applet_id: self.applet_id.clone(),
            accepts: (!self.accepts.is_empty()).then(|| Accepts::Many(self.accepts.clone())),
            auth_user: self.user.clone(),
            auth_pass: self.pass.clone(),
            bridge_host: self.host.clone(),
            bridge_port: self.port,
            sub_protocol: self.sub_protocol.clone(),
            origin: self.origin.clone(),
            auto_reconnect: self.no_reconnect.then_some(false),
            reconnect_delay_ms: self.reconnect_delay_ms,
            secure: self.insecure.then_some(false),
        }
    }

    /// Resolves the final session options: config file first, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` names a file that cannot be read or
    /// parsed.
    fn into_options(self) -> anyhow::Result<SessionOptions> {
        let base = match &self.config {
            Some(path) => load_options(path)
                .with_context(|| format!("failed to load config file '{}'", path.display()))?,
            None => SessionOptions::default(),
        };
        Ok(base.merge(self.overrides()))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only delivered messages.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = Cli::parse().into_options()?;
    let config = SessionConfig::build(Some(options.into()))
        .context("invalid session configuration")?;

    info!(
        "wb-client starting: applet={}, bridge={}",
        config.applet_id(),
        config.bridge_url()
    );

    let manager = ConnectionManager::start(config, Arc::new(WebSocketTransport::new()));
    let mut events = manager.events();
    manager.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("received Ctrl+C, shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => report(&mut stdout, event).await?,
                None => break,
            },
            line = stdin.next_line(), if stdin_open => {
                match line.context("failed to read stdin")? {
                    Some(line) => send_line(&manager, &line),
                    None => {
                        debug!("stdin closed; no more outbound messages");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    shutdown(manager).await;
    info!("wb-client stopped");
    Ok(())
}

/// Closes an open session and waits briefly so the bridge sees a Close frame
/// before the runtime exits.
async fn shutdown(manager: ConnectionManager) {
    if !manager.is_ready() {
        manager.disconnect();
        return;
    }

    let mut closes = manager.bus().connection_closes();
    manager.disconnect();
    match tokio::time::timeout(SHUTDOWN_GRACE, closes.recv()).await {
        Ok(Some(reason)) => debug!("session closed: {reason}"),
        Ok(None) => {}
        Err(_) => warn!("session did not close within {SHUTDOWN_GRACE:?}"),
    }
    // The driver has dropped the link; the writer task still owns the socket.
    tokio::time::sleep(CLOSE_FLUSH).await;
}

/// Prints delivered messages and logs everything else.
async fn report(stdout: &mut tokio::io::Stdout, event: SessionEvent) -> anyhow::Result<()> {
    match event {
        SessionEvent::Message(envelope) => match encode_envelope(&envelope) {
            Ok(line) => {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(e) => warn!("could not print message tagged {}: {e}", envelope.tag),
        },
        SessionEvent::Connected => info!("session ready"),
        SessionEvent::ConnectionFailed { reason } => warn!("connection failed: {reason}"),
        SessionEvent::ConnectionError { reason } => warn!("connection error: {reason}"),
        SessionEvent::ConnectionClosed { reason } => info!("connection closed: {reason}"),
        SessionEvent::SendError { reason } => warn!("message not sent: {reason}"),
        SessionEvent::DecodeError { reason } => warn!("bridge sent an unreadable message: {reason}"),
    }
    Ok(())
}

/// Sends one stdin line, which must be a `{"t": ..., "p": ...}` object.
fn send_line(manager: &ConnectionManager, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match decode_envelope(line) {
        // Rejections are already reported as SendError events.
        Ok(envelope) => {
            let _ = manager.send(&envelope);
        }
        Err(e) => warn!("ignoring stdin line: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::Instant;

    use wb_client::MockTransport;

    fn mock_session() -> SessionConfig {
        SessionConfig::from_options(SessionOptions {
            applet_id: Some("lights".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_close_of_open_session() {
        // Arrange
        let transport = Arc::new(MockTransport::accepting());
        let manager = ConnectionManager::start(mock_session(), transport.clone());
        let mut connections = manager.bus().connections();
        manager.connect();
        connections.recv().await.expect("connected event");
        let mut peer = transport.next_peer().await;
        let _handshake = peer.outbound.recv().await;
        let started = Instant::now();

        // Act
        shutdown(manager).await;

        // Assert: the link was released before shutdown returned, after the flush
        assert_eq!(peer.outbound.try_recv(), Err(TryRecvError::Disconnected));
        assert!(started.elapsed() >= CLOSE_FLUSH);
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_session_returns_at_once() {
        let transport = Arc::new(MockTransport::failing("refused"));
        let manager = ConnectionManager::start(mock_session(), transport);
        let started = Instant::now();

        shutdown(manager).await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_cli_boolean_flags_default_to_unset() {
        // Absent switches must not override a config file's values.
        let options = Cli::parse_from(["wb-client", "lights"]).overrides();
        assert_eq!(options.secure, None);
        assert_eq!(options.auto_reconnect, None);
    }

    #[test]
    fn test_cli_positional_applet_id() {
        let cli = Cli::parse_from(["wb-client", "lights"]);
        assert_eq!(cli.overrides().applet_id.as_deref(), Some("lights"));
    }

    #[test]
    fn test_cli_repeated_accept_flags() {
        // Arrange
        let cli = Cli::parse_from(["wb-client", "lights", "--accept", "lights", "--accept", "scenes"]);

        // Act
        let options = cli.overrides();

        // Assert
        assert_eq!(
            options.accepts,
            Some(Accepts::Many(vec!["lights".to_string(), "scenes".to_string()]))
        );
    }

    #[test]
    fn test_cli_accept_takes_comma_list() {
        let cli = Cli::parse_from(["wb-client", "lights", "--accept", "lights,scenes"]);
        assert_eq!(cli.accepts, vec!["lights", "scenes"]);
    }

    #[test]
    fn test_cli_insecure_and_no_reconnect_flags() {
        let cli = Cli::parse_from(["wb-client", "lights", "--insecure", "--no-reconnect"]);
        let options = cli.overrides();
        assert_eq!(options.secure, Some(false));
        assert_eq!(options.auto_reconnect, Some(false));
    }

    #[test]
    fn test_cli_connection_overrides() {
        let cli = Cli::parse_from([
            "wb-client",
            "lights",
            "--host",
            "bridge.lan",
            "--port",
            "9000",
            "--sub-protocol",
            "wb2",
            "--origin",
            "http://panel",
            "--reconnect-delay-ms",
            "250",
        ]);
        let options = cli.overrides();
        assert_eq!(options.bridge_host.as_deref(), Some("bridge.lan"));
        assert_eq!(options.bridge_port, Some(9000));
        assert_eq!(options.sub_protocol.as_deref(), Some("wb2"));
        assert_eq!(options.origin.as_deref(), Some("http://panel"));
        assert_eq!(options.reconnect_delay_ms, Some(250));
    }

    #[test]
    fn test_cli_invalid_port_is_rejected() {
        let result = Cli::try_parse_from(["wb-client", "lights", "--port", "99999"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        // Arrange: a file setting host and port, a flag overriding the port
        let path = std::env::temp_dir().join(format!("wb-client-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "applet_id = \"lights\"\nbridge_host = \"file.lan\"\nbridge_port = 1000\n")
            .unwrap();
        let cli = Cli::parse_from([
            "wb-client",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "2000",
        ]);

        // Act
        let options = cli.into_options();
        let _ = std::fs::remove_file(&path);

        // Assert
        let options = options.unwrap();
        assert_eq!(options.applet_id.as_deref(), Some("lights"));
        assert_eq!(options.bridge_host.as_deref(), Some("file.lan"));
        assert_eq!(options.bridge_port, Some(2000));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["wb-client", "lights", "--config", "/nonexistent/wb.toml"]);
        assert!(cli.into_options().is_err());
    }
}
