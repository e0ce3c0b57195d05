//! Proxy-path errors and their HTTP mapping.
//!
//! Response bodies are fixed strings; the underlying detail only goes to
//! the tracing output and the access log reason.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::access_log::Action;
use crate::routing::OriginKey;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("path must be /{{user}}/{{target}}")]
    BadRequest,

    #[error("invalid target url: {0}")]
    InvalidTarget(String),

    #[error("user '{0}' missing or disabled")]
    UserDenied(String),

    #[error("origin {origin} not in whitelist")]
    OriginDenied { origin: OriginKey, redirect: bool },

    #[error("upstream request failed: {0}")]
    UpstreamUnreachable(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::UserDenied(_) | ProxyError::OriginDenied { .. } => StatusCode::FORBIDDEN,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Text stored in the access log's `reason` column.
    pub fn reason(&self) -> String {
        match self {
            ProxyError::BadRequest => "bad path".to_string(),
            ProxyError::InvalidTarget(_) => "invalid target url".to_string(),
            ProxyError::UserDenied(_) => "user missing or disabled".to_string(),
            ProxyError::OriginDenied { redirect: false, .. } => "not in whitelist".to_string(),
            ProxyError::OriginDenied { redirect: true, .. } => {
                "redirect target not in whitelist".to_string()
            }
            ProxyError::UpstreamUnreachable(detail) => format!("upstream error: {detail}"),
            ProxyError::StoreUnavailable(e) => format!("store error: {e}"),
            ProxyError::BodyTooLarge(_) => "body too large".to_string(),
        }
    }

    pub fn action(&self) -> Action {
        match self {
            ProxyError::UpstreamUnreachable(_) | ProxyError::StoreUnavailable(_) => Action::Error,
            _ => Action::Deny,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            ProxyError::BadRequest => "bad request",
            ProxyError::InvalidTarget(_) => "invalid target url",
            ProxyError::UserDenied(_) | ProxyError::OriginDenied { .. } => "forbidden",
            ProxyError::UpstreamUnreachable(_) => "upstream request failed",
            ProxyError::StoreUnavailable(_) => "store unavailable",
            ProxyError::BodyTooLarge(_) => "payload too large",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}
