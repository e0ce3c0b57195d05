use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::access_log::LogRow;
use crate::admin::auth::admin_password;
use crate::admin::AdminError;
use crate::http::request::ClientMeta;
use crate::http::server::AppState;
use crate::routing::normalize_origin;
use crate::security::session::{
    clear_session_cookie, constant_time_eq, session_cookie, SessionAuthenticator,
};
use crate::store::{self, unix_now, LastSeen, Summary, UserRecord};

/// Rows of each list returned by `GET /admin/state`.
pub const STATE_ROWS: usize = 300;

pub const DEFAULT_USER: &str = "ikun";

/// Split operator input on newlines, commas and semicolons.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `https://www.Example.com` → `Example.com`; suffix matching works on
/// bare hosts.
pub fn normalize_direct_domain(raw: &str) -> Option<String> {
    let mut domain = raw.trim();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = strip_prefix_ignore_case(domain, prefix) {
            domain = rest;
            break;
        }
    }
    let mut domain = domain.trim();
    if let Some(rest) = strip_prefix_ignore_case(domain, "www.") {
        domain = rest.trim();
    }
    (!domain.is_empty()).then(|| domain.to_string())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &s[prefix.len()..])
}

/// Origin of an absolute URL, `None` for anything without one.
pub fn normalize_base_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AdminError> {
    let password = admin_password(&state)?;
    if !constant_time_eq(body.password.as_bytes(), password.as_bytes()) {
        let ip_header = state.config.load().security.client_ip_header.clone();
        let meta = ClientMeta::from_parts(&headers, None, &ip_header);
        tracing::warn!(ip = %meta.ip, "Admin login failed");
        return Err(AdminError::Unauthorized);
    }

    let token = SessionAuthenticator::new(password).issue();
    tracing::info!("Admin session issued");
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, session_cookie(&token))],
    )
        .into_response())
}

pub async fn logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie())],
    )
}

#[derive(Debug, Serialize)]
pub struct AdminState {
    pub summary: Summary,
    pub whitelist_enabled: bool,
    pub whitelist: Vec<String>,
    pub direct_domains: Vec<String>,
    pub base_domains: Vec<String>,
    pub users: Vec<UserRecord>,
    pub last_seen: Vec<LastSeen>,
    pub logs: Vec<LogRow>,
}

pub async fn get_state(State(state): State<AppState>) -> Result<Json<AdminState>, AdminError> {
    let snapshot = store::blocking(&state.store, |s| {
        Ok(AdminState {
            summary: s.summary()?,
            whitelist_enabled: store::whitelist_enabled(s)?,
            whitelist: s.list_origins()?,
            direct_domains: store::direct_domains(s)?,
            base_domains: store::base_domains(s)?,
            users: s.list_users()?,
            last_seen: s.list_last_seen(STATE_ROWS)?,
            logs: s.list_logs(STATE_ROWS)?,
        })
    })
    .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

pub async fn set_whitelist_enabled(
    State(state): State<AppState>,
    Json(body): Json<EnabledRequest>,
) -> Result<StatusCode, AdminError> {
    let enabled = body.enabled;
    store::blocking(&state.store, move |s| store::set_whitelist_enabled(s, enabled)).await?;
    if body.enabled {
        tracing::info!("Allow-list enforcement enabled");
    } else {
        tracing::warn!("Allow-list enforcement disabled, every origin is now permitted");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AddOriginsRequest {
    #[serde(default)]
    pub origins: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AddOriginsResponse {
    pub added: Vec<String>,
    pub existing: Vec<String>,
    pub invalid: Vec<String>,
}

/// Allow-list edits are refused while enforcement is off, so the list
/// cannot drift unnoticed while it has no effect.
async fn require_enforcement(state: &AppState) -> Result<(), AdminError> {
    if store::blocking(&state.store, |s| store::whitelist_enabled(s)).await? {
        Ok(())
    } else {
        Err(AdminError::BadRequest(
            "allow-list enforcement is disabled".into(),
        ))
    }
}

pub async fn add_whitelist(
    State(state): State<AppState>,
    Json(body): Json<AddOriginsRequest>,
) -> Result<Json<AddOriginsResponse>, AdminError> {
    require_enforcement(&state).await?;

    let now = unix_now();
    let mut response = AddOriginsResponse::default();
    let mut candidates = Vec::new();
    for item in split_list(&body.origins) {
        match normalize_origin(&item) {
            Some(origin) => candidates.push(origin.into_string()),
            None => response.invalid.push(item),
        }
    }

    let results = store::blocking(&state.store, move |s| {
        candidates
            .into_iter()
            .map(|origin| s.add_origin(&origin, now).map(|added| (origin, added)))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;
    for (origin, added) in results {
        if added {
            tracing::info!(origin = %origin, "Origin added to allow-list");
            response.added.push(origin);
        } else {
            response.existing.push(origin);
        }
    }
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct RemoveOriginRequest {
    pub origin: String,
}

pub async fn remove_whitelist(
    State(state): State<AppState>,
    Json(body): Json<RemoveOriginRequest>,
) -> Result<StatusCode, AdminError> {
    require_enforcement(&state).await?;

    let origin = normalize_origin(&body.origin)
        .ok_or_else(|| AdminError::BadRequest(format!("invalid origin '{}'", body.origin)))?;
    let key = origin.clone();
    if store::blocking(&state.store, move |s| s.remove_origin(key.as_str())).await? {
        tracing::info!(origin = %origin, "Origin removed from allow-list");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(origin.into_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct DomainsRequest {
    #[serde(default)]
    pub domains: String,
}

pub async fn set_direct_domains(
    State(state): State<AppState>,
    Json(body): Json<DomainsRequest>,
) -> Result<Json<Vec<String>>, AdminError> {
    let domains: Vec<String> = split_list(&body.domains)
        .iter()
        .filter_map(|d| normalize_direct_domain(d))
        .collect();

    let saved = domains.clone();
    store::blocking(&state.store, move |s| store::set_direct_domains(s, &saved)).await?;
    state.direct_domains.replace(domains.clone());
    tracing::info!(count = domains.len(), "Direct domains updated");
    Ok(Json(domains))
}

pub async fn set_base_domains(
    State(state): State<AppState>,
    Json(body): Json<DomainsRequest>,
) -> Result<Json<Vec<String>>, AdminError> {
    let mut origins: Vec<String> = Vec::new();
    for origin in split_list(&body.domains)
        .iter()
        .filter_map(|d| normalize_base_domain(d))
    {
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }

    let saved = origins.clone();
    store::blocking(&state.store, move |s| store::set_base_domains(s, &saved)).await?;
    Ok(Json(origins))
}

#[derive(Debug, Default, Deserialize)]
pub struct AddUserRequest {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn add_user(
    State(state): State<AppState>,
    Json(body): Json<AddUserRequest>,
) -> Result<(StatusCode, Json<UserRecord>), AdminError> {
    let user = body
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string();
    if user.contains('/') {
        return Err(AdminError::BadRequest("user must not contain '/'".into()));
    }
    let note = body
        .note
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let name = user.clone();
    let record = store::blocking(&state.store, move |s| {
        s.upsert_user(&name, &note, unix_now())?;
        s.get_user(&name)
    })
    .await?
    .ok_or_else(|| AdminError::NotFound(user.clone()))?;
    tracing::info!(user = %user, "User saved");
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub user: String,
    pub enabled: bool,
}

pub async fn toggle_user(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<ToggleResponse>, AdminError> {
    let name = user.clone();
    match store::blocking(&state.store, move |s| s.toggle_user(&name, unix_now())).await? {
        Some(enabled) => {
            tracing::info!(user = %user, enabled, "User toggled");
            Ok(Json(ToggleResponse { user, enabled }))
        }
        None => Err(AdminError::NotFound(user)),
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<StatusCode, AdminError> {
    let name = user.clone();
    if store::blocking(&state.store, move |s| s.delete_user(&name)).await? {
        tracing::info!(user = %user, "User deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(user))
    }
}
