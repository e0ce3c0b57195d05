//! Outbound HTTP client.
//!
//! The client never follows redirects. The relay inspects the first 3xx
//! itself and re-issues the request once to a permitted target; a 3xx
//! coming back from that target is relayed to the client as it is, so
//! every hop the relay makes has passed the origin gate. There is no total
//! timeout, so long media streams are not cut.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use reqwest::redirect::Policy;
use url::Url;

use crate::config::TimeoutConfig;
use crate::error::ProxyError;

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

/// One outbound request, reusable for the followed hop.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamClient {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .redirect(Policy::none())
            .referer(false)
            .build()?;
        Ok(Self { client })
    }

    /// Send once. Redirect responses come back unfollowed.
    pub async fn fetch(
        &self,
        target: &Url,
        request: &UpstreamRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut builder = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await.map_err(|e| {
            tracing::debug!(target = %target, error = %e, "Upstream request failed");
            ProxyError::UpstreamUnreachable(e.to_string())
        })
    }
}
