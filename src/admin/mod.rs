//! Admin JSON API, mounted under `/admin`.
//!
//! Every route requires `admin.password` to be configured. Everything but
//! login and logout also requires a valid session cookie.

pub mod auth;
pub mod handlers;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};

use crate::http::server::AppState;
use crate::store::StoreError;
use self::auth::{require_password, require_session};
use self::handlers::*;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("admin password not configured")]
    NotConfigured,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdminError {
    fn status(&self) -> StatusCode {
        match self {
            AdminError::NotConfigured | AdminError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        if let AdminError::Store(e) = &self {
            tracing::error!(error = %e, "Admin store operation failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/whitelist/enabled", put(set_whitelist_enabled))
        .route("/whitelist", post(add_whitelist).delete(remove_whitelist))
        .route("/direct-domains", put(set_direct_domains))
        .route("/base-domains", put(set_base_domains))
        .route("/users", post(add_user))
        .route("/users/{user}/toggle", post(toggle_user))
        .route("/users/{user}", delete(delete_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state, require_password))
}
