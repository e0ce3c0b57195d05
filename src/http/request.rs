//! Per-request metadata.
//!
//! The relay sits behind an edge network that reports the client address,
//! city and data-center in headers. These are read once per request into a
//! [`ClientMeta`] and then stripped before anything goes upstream.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap};
use tower::ServiceBuilder;
use tower::layer::util::{Identity, Stack};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer,
};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const CF_IPCITY: &str = "cf-ipcity";
pub const CF_RAY: &str = "cf-ray";

/// Who sent the request, as far as the edge can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: String,
    pub city: String,
    pub colo: String,
    pub user_agent: String,
}

impl ClientMeta {
    /// `ip_header` names the edge's client-address header; the socket peer
    /// is used when it is absent.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>, ip_header: &str) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let mut ip = text(ip_header);
        if ip.is_empty() {
            ip = peer.map(|p| p.ip().to_string()).unwrap_or_default();
        }

        // cf-ray looks like "8a1b2c3d4e5f6789-SIN"; the suffix is the colo.
        let ray = text(CF_RAY);
        let colo = ray
            .rsplit_once('-')
            .map(|(_, colo)| colo.to_string())
            .unwrap_or_default();

        Self {
            ip,
            city: text(CF_IPCITY),
            colo,
            user_agent: text(header::USER_AGENT.as_str()),
        }
    }
}

pub type RequestIdLayers =
    Stack<PropagateRequestIdLayer, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>;

/// Assigns an `x-request-id` (UUID v4) when the client sent none and echoes
/// it on the response.
pub fn request_id_layers() -> ServiceBuilder<RequestIdLayers> {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
}

/// Request id assigned by [`request_id_layers`], or "-" outside of them.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_edge_headers_take_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.7"));
        headers.insert(CF_IPCITY, HeaderValue::from_static("Osaka"));
        headers.insert(CF_RAY, HeaderValue::from_static("8a1b2c3d4e5f6789-KIX"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Infuse/7"));

        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let meta = ClientMeta::from_parts(&headers, Some(peer), "cf-connecting-ip");
        assert_eq!(meta.ip, "198.51.100.7");
        assert_eq!(meta.city, "Osaka");
        assert_eq!(meta.colo, "KIX");
        assert_eq!(meta.user_agent, "Infuse/7");
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let meta = ClientMeta::from_parts(&HeaderMap::new(), Some(peer), "cf-connecting-ip");
        assert_eq!(meta.ip, "10.0.0.1");
        assert_eq!(meta.colo, "");
        assert_eq!(meta.city, "");
    }

    #[test]
    fn test_ray_without_colo() {
        let mut headers = HeaderMap::new();
        headers.insert(CF_RAY, HeaderValue::from_static("8a1b2c3d4e5f6789"));
        let meta = ClientMeta::from_parts(&headers, None, "cf-connecting-ip");
        assert_eq!(meta.colo, "");
        assert_eq!(meta.ip, "");
    }
}
