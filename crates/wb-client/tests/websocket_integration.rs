//! The real WebSocket transport against a loopback bridge.
//!
//! A minimal bridge is served with `tokio-tungstenite` on an ephemeral port;
//! the client session connects to it over plain `ws://`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use wb_client::{ConnectionManager, WebSocketTransport};
use wb_core::{SessionConfig, SessionOptions};

const WAIT: Duration = Duration::from_secs(5);

/// Headers the bridge saw on the upgrade request.
#[derive(Debug, Default)]
struct Upgrade {
    origin: Option<String>,
    sub_protocol: Option<String>,
}

/// Accepts one client, echoing its subprotocol back as the bridge does.
async fn accept_one(listener: TcpListener) -> (WebSocketStream<TcpStream>, Upgrade) {
    let (stream, _) = listener.accept().await.unwrap();
    let (tx, rx) = oneshot::channel();
    let ws = accept_hdr_async(stream, move |req: &Request, mut resp: Response| {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let upgrade = Upgrade {
            origin: header("Origin"),
            sub_protocol: header("Sec-WebSocket-Protocol"),
        };
        if let Some(proto) = req.headers().get("Sec-WebSocket-Protocol") {
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", proto.clone());
        }
        let _ = tx.send(upgrade);
        Ok::<Response, ErrorResponse>(resp)
    })
    .await
    .unwrap();
    (ws, rx.await.unwrap())
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match timeout(WAIT, ws.next()).await.expect("bridge read timed out") {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("bridge expected a text frame, got {other:?}"),
        }
    }
}

fn session(port: u16) -> SessionConfig {
    SessionConfig::from_options(SessionOptions {
        applet_id: Some("lights".to_string()),
        bridge_port: Some(port),
        secure: Some(false),
        auto_reconnect: Some(false),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_session_over_loopback_bridge() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let bridge = tokio::spawn(accept_one(listener));

    let manager = ConnectionManager::start(session(port), Arc::new(WebSocketTransport::new()));
    let mut connections = manager.bus().connections();
    let mut messages = manager.messages();
    let mut closes = manager.bus().connection_closes();

    // Act: connect and let the bridge see the handshake
    manager.connect();
    let (mut ws, upgrade) = timeout(WAIT, bridge).await.unwrap().unwrap();
    timeout(WAIT, connections.recv()).await.unwrap();

    // Assert: upgrade headers and the auth request
    assert_eq!(upgrade.origin.as_deref(), Some("http://localhost"));
    assert_eq!(upgrade.sub_protocol.as_deref(), Some("webbridge"));
    assert_eq!(
        next_json(&mut ws).await,
        json!({"t": "authapp", "p": {"user": "applet", "pass": "applet", "accept": ["lights"]}})
    );

    // Act: bridge pushes three messages, one of them for another applet
    for text in [
        r#"{"t":"lights","p":{"on":true}}"#,
        r#"{"t":"thermostat","p":{"setpoint":21}}"#,
        r#"{"t":"all","p":{"shutdown":true}}"#,
    ] {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    // Assert: only lights and all arrive, in order
    let first = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(first.tag, "lights");
    assert_eq!(second.tag, "all");

    // Act/Assert: an outbound message reaches the bridge
    manager
        .send_payload("lights", &json!({"brightness": 40}))
        .unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({"t": "lights", "p": {"brightness": 40}})
    );

    // Act: bridge closes with a status
    ws.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: "bridge restarting".into(),
    })))
    .await
    .unwrap();
    tokio::spawn(async move { while ws.next().await.is_some() {} });

    // Assert
    let reason = timeout(WAIT, closes.recv()).await.unwrap();
    assert_eq!(reason.as_deref(), Some("1001: bridge restarting"));
    assert!(!manager.is_ready());
}

#[tokio::test]
async fn test_client_disconnect_closes_bridge_socket() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let bridge = tokio::spawn(accept_one(listener));

    let manager = ConnectionManager::start(session(port), Arc::new(WebSocketTransport::new()));
    let mut connections = manager.bus().connections();
    manager.connect();
    let (mut ws, _) = timeout(WAIT, bridge).await.unwrap().unwrap();
    timeout(WAIT, connections.recv()).await.unwrap();
    let _auth = next_json(&mut ws).await;

    // Act
    manager.disconnect();

    // Assert: the bridge sees a Close frame or the end of the stream
    let ended = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "bridge never saw the socket close");
}

#[tokio::test]
async fn test_unreachable_bridge_reports_connection_failed() {
    // Arrange: grab a free port, then stop listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = ConnectionManager::start(session(port), Arc::new(WebSocketTransport::new()));
    let mut failures = manager.bus().connection_failures();

    // Act
    manager.connect();

    // Assert
    let reason = timeout(WAIT, failures.recv()).await.unwrap().unwrap();
    assert!(reason.contains(&format!("127.0.0.1:{port}")), "{reason}");
    assert!(!manager.is_ready());
}

#[cfg(feature = "tls")]
#[tokio::test]
async fn test_default_secure_session_attempts_tls() {
    // Arrange: default options mean wss://; the listener speaks no TLS
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    let config = SessionConfig::from_options(SessionOptions {
        applet_id: Some("lights".to_string()),
        bridge_port: Some(port),
        auto_reconnect: Some(false),
        ..Default::default()
    })
    .unwrap();
    assert!(config.secure());

    let manager = ConnectionManager::start(config, Arc::new(WebSocketTransport::new()));
    let mut failures = manager.bus().connection_failures();

    // Act
    manager.connect();

    // Assert: the attempt failed in the handshake, not for lack of TLS support
    let reason = timeout(WAIT, failures.recv()).await.unwrap().unwrap();
    assert!(reason.contains(&format!("wss://127.0.0.1:{port}/")), "{reason}");
    assert!(!reason.contains("requires the `tls` feature"), "{reason}");
}
