//! WebSocket relay.
//!
//! ```text
//! Client ←──── WebSocket frames ────→ Relay ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! The upstream handshake happens before the client is upgraded, so an
//! unreachable upstream is still an ordinary 502. Close frames are passed
//! on in both directions; either side closing ends the relay.

use axum::extract::ws::{
    CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade,
};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::ProxyError;
use crate::security::headers::sanitize_outbound;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers owned by each leg of the relay.
const HANDSHAKE_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-accept",
];

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// `ws`/`wss` equivalent of an http(s) target.
pub fn websocket_url(target: &Url) -> Result<Url, ProxyError> {
    let scheme = match target.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ProxyError::InvalidTarget(format!("scheme {other}"))),
    };
    let mut url = target.clone();
    url.set_scheme(scheme)
        .map_err(|_| ProxyError::InvalidTarget(target.to_string()))?;
    Ok(url)
}

/// Connect to the upstream, then upgrade the client and pump frames.
pub async fn relay(
    upgrade: WebSocketUpgrade,
    target: &Url,
    client_headers: &HeaderMap,
) -> Result<Response, ProxyError> {
    let ws_url = websocket_url(target)?;

    let mut headers = client_headers.clone();
    sanitize_outbound(&mut headers, target);
    for name in HANDSHAKE_HEADERS {
        headers.remove(*name);
    }

    let mut request = ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    request.headers_mut().extend(headers);

    let (upstream, handshake) = connect_async(request).await.map_err(|e| {
        tracing::debug!(target = %ws_url, error = %e, "Upstream WebSocket handshake failed");
        ProxyError::UpstreamUnreachable(e.to_string())
    })?;

    let protocol = handshake
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    tracing::debug!(target = %ws_url, "WebSocket relay established");
    Ok(upgrade.on_upgrade(move |client| pump(client, upstream)))
}

async fn pump(client: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let closing = matches!(msg, ClientMessage::Close(_));
            if upstream_tx.send(to_upstream(msg)).await.is_err() || closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(msg) = to_client(msg) else {
                continue;
            };
            let closing = matches!(msg, ClientMessage::Close(_));
            if client_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
    tracing::debug!("WebSocket relay closed");
}

fn to_upstream(msg: ClientMessage) -> UpstreamMessage {
    match msg {
        ClientMessage::Text(text) => UpstreamMessage::text(text.as_str()),
        ClientMessage::Binary(data) => UpstreamMessage::Binary(data),
        ClientMessage::Ping(data) => UpstreamMessage::Ping(data),
        ClientMessage::Pong(data) => UpstreamMessage::Pong(data),
        ClientMessage::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn to_client(msg: UpstreamMessage) -> Option<ClientMessage> {
    let msg = match msg {
        UpstreamMessage::Text(text) => ClientMessage::Text(text.as_str().into()),
        UpstreamMessage::Binary(data) => ClientMessage::Binary(data),
        UpstreamMessage::Ping(data) => ClientMessage::Ping(data),
        UpstreamMessage::Pong(data) => ClientMessage::Pong(data),
        UpstreamMessage::Close(frame) => ClientMessage::Close(frame.map(|f| ClientCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert("upgrade", HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert("upgrade", HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn test_websocket_url_maps_scheme() {
        let url = Url::parse("https://media.example:8920/socket?api_key=k").unwrap();
        assert_eq!(
            websocket_url(&url).unwrap().as_str(),
            "wss://media.example:8920/socket?api_key=k"
        );
        let url = Url::parse("http://10.0.0.2/socket").unwrap();
        assert_eq!(websocket_url(&url).unwrap().as_str(), "ws://10.0.0.2/socket");
    }

    #[test]
    fn test_close_frames_carry_code() {
        let upstream = to_upstream(ClientMessage::Close(Some(ClientCloseFrame {
            code: 1001,
            reason: "bye".into(),
        })));
        match upstream {
            UpstreamMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
