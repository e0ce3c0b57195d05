//! Upstream response → client response.
//!
//! Bodies are streamed; dropping the client response drops the upstream
//! byte stream and with it the upstream connection.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use url::Url;

use crate::security::headers::sanitize_inbound;

/// Relay an upstream response with its security policy headers removed.
pub fn relay(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    sanitize_inbound(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Relay a redirect to the client with `Location` made absolute.
pub fn relay_redirect(upstream: reqwest::Response, location: &Url) -> Response<Body> {
    let mut response = relay(upstream);
    if let Ok(value) = HeaderValue::from_str(location.as_str()) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
