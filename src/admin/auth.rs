use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminError;
use crate::http::server::AppState;
use crate::security::session::{token_from_cookie_header, SessionAuthenticator};

/// Configured admin password. It is also the session signing key, so
/// changing it logs everyone out.
pub fn admin_password(state: &AppState) -> Result<String, AdminError> {
    state
        .config
        .load()
        .admin
        .password
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or(AdminError::NotConfigured)
}

pub async fn require_password(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AdminError> {
    admin_password(&state)?;
    Ok(next.run(request).await)
}

pub async fn require_session(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AdminError> {
    let password = admin_password(&state)?;
    let authenticator = SessionAuthenticator::new(password);

    let valid = request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(token_from_cookie_header)
        .any(|token| authenticator.verify(token));

    if valid {
        Ok(next.run(request).await)
    } else {
        Err(AdminError::Unauthorized)
    }
}
