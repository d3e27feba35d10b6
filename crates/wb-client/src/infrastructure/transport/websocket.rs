//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each successful [`WebSocketTransport::connect`] spawns two tasks:
//!
//! - **writer**: drains the link's outbound channel into the socket sink and
//!   sends a Close frame once the manager drops the link.
//! - **reader**: forwards text and binary frames to the manager in arrival
//!   order; protocol-level ping/pong is answered by tungstenite itself.
//!
//! A read error is reported as [`LinkEvent::Error`] followed by
//! [`LinkEvent::Closed`]; a Close frame from the bridge is reported as
//! `Closed("<code>: <reason>")`.
//!
//! `wss://` targets go through rustls (ring provider, webpki roots) when the
//! default `tls` feature is on.  Without it they fail with
//! [`TransportError::TlsUnavailable`].

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::HeaderValue,
        protocol::CloseFrame,
        Error as WsError, Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use wb_core::Frame;

use super::{BridgeTarget, Link, LinkEvent, LinkPeer, Transport, TransportError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Production transport: one WebSocket per connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, target: &BridgeTarget) -> Result<Link, TransportError> {
        if target.url.starts_with("wss://") {
            if !cfg!(feature = "tls") {
                return Err(TransportError::TlsUnavailable(target.url.clone()));
            }
            init_crypto();
        }

        let request = build_request(target)?;
        let (ws_stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    url: target.url.clone(),
                    reason: e.to_string(),
                })?;

        info!("bridge socket open at {}", target.url);

        let (link, LinkPeer { outbound, inbound }) = Link::pair();
        let (sink, stream) = ws_stream.split();

        tokio::spawn(write_frames(
            sink,
            outbound,
            inbound.clone(),
            target.url.clone(),
        ));
        tokio::spawn(read_frames(stream, inbound, target.url.clone()));

        Ok(link)
    }
}

#[cfg(feature = "tls")]
static INIT_CRYPTO: std::sync::Once = std::sync::Once::new();

/// Installs ring as the process-wide rustls provider, once.
///
/// Another provider installed first by the embedding application wins.
fn init_crypto() {
    #[cfg(feature = "tls")]
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Builds the upgrade request with the `Origin` and subprotocol headers.
fn build_request(target: &BridgeTarget) -> Result<Request, TransportError> {
    let invalid = |reason: String| TransportError::InvalidTarget {
        url: target.url.clone(),
        reason,
    };

    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;

    let headers = request.headers_mut();
    headers.insert(
        "Origin",
        HeaderValue::from_str(&target.origin).map_err(|e| invalid(e.to_string()))?,
    );
    if !target.sub_protocol.is_empty() {
        headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(&target.sub_protocol).map_err(|e| invalid(e.to_string()))?,
        );
    }

    Ok(request)
}

async fn write_frames(
    mut sink: WsSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
    url: String,
) {
    while let Some(frame) = outbound.recv().await {
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
        };
        if let Err(e) = sink.send(msg).await {
            warn!("write to bridge {url} failed: {e}");
            let _ = events.send(LinkEvent::Error(e.to_string()));
            return;
        }
    }

    debug!("link to {url} dropped; closing socket");
    if let Err(e) = sink.close().await {
        debug!("close handshake with {url} failed: {e}");
    }
}

async fn read_frames(
    mut stream: WsStream,
    events: mpsc::UnboundedSender<LinkEvent>,
    url: String,
) {
    let reason = loop {
        let event = match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => LinkEvent::Frame(Frame::Text(text)),
            Some(Ok(WsMessage::Binary(bytes))) => LinkEvent::Frame(Frame::Binary(bytes)),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Frame(_))) => continue,
            Some(Ok(WsMessage::Close(frame))) => break close_reason(frame.as_ref()),
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                break "connection closed".to_string()
            }
            Some(Err(e)) => {
                warn!("read from bridge {url} failed: {e}");
                let _ = events.send(LinkEvent::Error(e.to_string()));
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        };

        if events.send(event).is_err() {
            debug!("link to {url} dropped; stopping reader");
            return;
        }
    };

    debug!("bridge socket {url} closed: {reason}");
    let _ = events.send(LinkEvent::Closed(reason));
}

fn close_reason(frame: Option<&CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => u16::from(frame.code).to_string(),
        Some(frame) => format!("{}: {}", u16::from(frame.code), frame.reason),
        None => "closed without status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn target(url: &str) -> BridgeTarget {
        BridgeTarget {
            url: url.to_string(),
            sub_protocol: "webbridge".to_string(),
            origin: "http://localhost".to_string(),
        }
    }

    #[test]
    fn test_build_request_sets_origin_and_subprotocol() {
        // Act
        let request = build_request(&target("ws://127.0.0.1:8088/")).unwrap();

        // Assert
        assert_eq!(request.uri().to_string(), "ws://127.0.0.1:8088/");
        assert_eq!(request.headers()["Origin"], "http://localhost");
        assert_eq!(request.headers()["Sec-WebSocket-Protocol"], "webbridge");
    }

    #[test]
    fn test_build_request_omits_empty_subprotocol() {
        let mut t = target("ws://127.0.0.1:8088/");
        t.sub_protocol.clear();

        let request = build_request(&t).unwrap();

        assert!(request.headers().get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        let result = build_request(&target("not a url"));
        assert!(matches!(result, Err(TransportError::InvalidTarget { .. })));
    }

    #[test]
    fn test_close_reason_formats_code_and_text() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "bridge restarting".into(),
        };
        assert_eq!(close_reason(Some(&frame)), "1001: bridge restarting");
        assert_eq!(close_reason(None), "closed without status");
    }

    #[tokio::test]
    async fn test_connect_refused_is_a_connect_failure() {
        // Port 1 on loopback refuses immediately.
        let result = WebSocketTransport::new()
            .connect(&target("ws://127.0.0.1:1/"))
            .await;

        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn test_secure_target_reaches_tls_handshake() {
        // Arrange: a listener that accepts TCP and then hangs up without TLS
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        // Act
        let result = WebSocketTransport::new()
            .connect(&target(&format!("wss://127.0.0.1:{port}/")))
            .await;

        // Assert: the attempt got as far as the TLS layer
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[cfg(not(feature = "tls"))]
    #[tokio::test]
    async fn test_secure_target_without_tls_feature_fails_fast() {
        let result = WebSocketTransport::new()
            .connect(&target("wss://127.0.0.1:1/"))
            .await;

        assert!(matches!(result, Err(TransportError::TlsUnavailable(_))));
    }
}
