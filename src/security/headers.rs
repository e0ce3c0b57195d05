//! Header policy for both directions of the relay.
//!
//! Outbound: nothing that identifies the client or the edge reaches the
//! upstream, and `host` always names the upstream authority.
//! Inbound: upstream security policy headers are dropped so the relayed
//! content can be embedded and fetched cross-origin.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use url::Url;

/// Client-identity and edge headers never forwarded upstream.
pub const CLIENT_IDENTITY_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "true-client-ip",
    "cf-connecting-ip",
    "cf-connecting-ipv6",
    "forwarded",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-client-ip",
    "fastly-client-ip",
    "cf-ipcity",
    "cf-ipcountry",
    "cf-ray",
    "cf-visitor",
    "cdn-loop",
];

/// Upstream policy headers removed from relayed responses.
pub const SECURITY_POLICY_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "strict-transport-security",
];

/// Connection-scoped headers; the HTTP client and server manage their own.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

fn remove_all(headers: &mut HeaderMap, names: &[&str]) {
    for name in names {
        headers.remove(*name);
    }
}

/// Drop headers listed in a `Connection` header value as well.
fn remove_connection_listed(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
}

/// Authority as it belongs in a `host` header: default ports omitted.
pub fn host_value(target: &Url) -> Option<HeaderValue> {
    let host = target.host_str()?;
    let authority = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&authority).ok()
}

/// Prepare client request headers for the upstream at `target`.
pub fn sanitize_outbound(headers: &mut HeaderMap, target: &Url) {
    remove_connection_listed(headers);
    remove_all(headers, CLIENT_IDENTITY_HEADERS);
    remove_all(headers, HOP_BY_HOP_HEADERS);
    headers.remove(header::REFERER);
    // Recomputed from the buffered body.
    headers.remove(header::CONTENT_LENGTH);

    match host_value(target) {
        Some(host) => {
            headers.insert(header::HOST, host);
        }
        None => {
            headers.remove(header::HOST);
        }
    }
}

/// Prepare upstream response headers for the client.
pub fn sanitize_inbound(headers: &mut HeaderMap) {
    remove_connection_listed(headers);
    remove_all(headers, SECURITY_POLICY_HEADERS);
    remove_all(headers, HOP_BY_HOP_HEADERS);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound_fixture() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("True-Client-IP", HeaderValue::from_static("1.2.3.4"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("cf-ray", HeaderValue::from_static("abc-SIN"));
        headers.insert(header::REFERER, HeaderValue::from_static("https://relay/"));
        headers.insert(header::HOST, HeaderValue::from_static("relay.example"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("MediaBrowser Token=t"));
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-"));
        headers
    }

    #[test]
    fn test_outbound_strips_identity() {
        let mut headers = outbound_fixture();
        let target = Url::parse("https://media.example:8920/Videos/1").unwrap();
        sanitize_outbound(&mut headers, &target);

        for name in ["x-forwarded-for", "x-real-ip", "true-client-ip", "cf-connecting-ip", "cf-ray"] {
            assert!(!headers.contains_key(name), "{name} should be stripped");
        }
        assert!(!headers.contains_key(header::REFERER));
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("x-trace"));
        assert!(!headers.contains_key(header::CONTENT_LENGTH));
        assert_eq!(headers[header::HOST], "media.example:8920");
        assert_eq!(headers[header::AUTHORIZATION], "MediaBrowser Token=t");
        assert_eq!(headers[header::RANGE], "bytes=0-");
    }

    #[test]
    fn test_outbound_host_omits_default_port() {
        let mut headers = HeaderMap::new();
        let target = Url::parse("https://media.example:443/").unwrap();
        sanitize_outbound(&mut headers, &target);
        assert_eq!(headers[header::HOST], "media.example");

        let target = Url::parse("http://[::1]:8096/").unwrap();
        sanitize_outbound(&mut headers, &target);
        assert_eq!(headers[header::HOST], "[::1]:8096");
    }

    #[test]
    fn test_inbound_strips_security_policy() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Security-Policy", HeaderValue::from_static("default-src 'self'"));
        headers.insert(
            "content-security-policy-report-only",
            HeaderValue::from_static("default-src 'self'"),
        );
        headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));

        sanitize_inbound(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    }
}
