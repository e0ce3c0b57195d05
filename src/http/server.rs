//! HTTP server setup and the relay handler.
//!
//! # Responsibilities
//! - Build the Axum router: overview page, admin API, relay fallback
//! - Wire up middleware (CORS, timeout, tracing, request id, cleanup)
//! - Gate each request by user and origin, relay it, resolve one redirect
//! - Hand every terminal decision to the access log
//! - Swap reloaded configuration and drain the log on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::access_log::{
    retention_cutoff, Action, AccessLogger, CleanupSchedule, GeoResolver, LogEntry,
};
use crate::admin;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::middleware::cors::cors_middleware;
use crate::http::redirect::{resolve_redirect, RedirectOutcome};
use crate::http::request::{request_id, request_id_layers, ClientMeta};
use crate::http::response;
use crate::http::upstream::{UpstreamClient, UpstreamRequest};
use crate::http::websocket;
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::routing::{canonical_origin, parse_upstream_url, split_ingress, DirectDomainCache};
use crate::security::headers::sanitize_outbound;
use crate::security::AccessGate;
use crate::store::{self, format_ts, unix_now, LastSeenUpdate, Store};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<ProxyConfig>>,
    pub store: Arc<dyn Store>,
    pub upstream: UpstreamClient,
    pub direct_domains: Arc<DirectDomainCache>,
    pub access_log: AccessLogger,
    pub cleanup: Arc<CleanupSchedule>,
    pub geo: GeoResolver,
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Build the server and start the access-log worker. Must be called
    /// inside a Tokio runtime.
    pub fn new(config: ProxyConfig, store: Arc<dyn Store>) -> Result<Self, ServerError> {
        let upstream = UpstreamClient::new(&config.timeouts)?;
        let geo = GeoResolver::new()?;
        let direct_domains = Arc::new(DirectDomainCache::new(Duration::from_secs(
            config.redirects.cache_ttl_secs,
        )));
        let config = Arc::new(ArcSwap::from_pointee(config));
        let access_log = AccessLogger::spawn(store.clone(), config.clone(), geo.clone());

        let state = AppState {
            config,
            store,
            upstream,
            direct_domains,
            access_log,
            cleanup: Arc::new(CleanupSchedule::new()),
            geo,
        };

        let router = Self::build_router(state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.load().timeouts.request_secs);

        Router::new()
            .route("/", any(root_handler))
            .nest("/admin", admin::router(state.clone()))
            .fallback(proxy_handler)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                cleanup_middleware,
            ))
            .with_state(state)
            .layer(middleware::from_fn(cors_middleware))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                request_timeout,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(request_id_layers())
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` fires, then drain the access log.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let live_config = self.state.config.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                live_config.store(Arc::new(config));
                tracing::info!("Configuration reloaded");
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await;

        reloader.abort();
        self.state.access_log.shutdown().await;
        tracing::info!("HTTP server stopped");
        served
    }
}

/// Schedule the retention sweep at most once per cleanup interval,
/// piggybacking on whatever request comes in.
async fn cleanup_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let access_log = state.config.load().access_log.clone();
    let now = unix_now();
    if state
        .cleanup
        .try_claim(now, access_log.cleanup_interval_secs)
    {
        let cutoff = retention_cutoff(now, &access_log);
        tracing::debug!(cutoff = %format_ts(cutoff), "Scheduling retention sweep");
        state.access_log.sweep(cutoff);
    }
    next.run(request).await
}

fn client_meta(state: &AppState, request: &Request<Body>) -> ClientMeta {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let config = state.config.load();
    ClientMeta::from_parts(request.headers(), peer, &config.security.client_ip_header)
}

/// One-line overview. Not logged.
async fn root_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let meta = client_meta(&state, &request);
    let summary = match store::blocking(&state.store, |s| s.summary()).await {
        Ok(summary) => summary,
        Err(e) => return ProxyError::from(e).into_response(),
    };
    let config = state.config.load_full();
    let city = state
        .geo
        .city(&config.geo, &state.store, &meta.ip, &meta.city)
        .await;

    let mut parts = vec![format!("IP: {}", meta.ip)];
    if !city.is_empty() {
        parts.push(format!("City: {city}"));
    }
    if !meta.colo.is_empty() {
        parts.push(format!("COLO: {}", meta.colo));
    }
    parts.push(format!("Total requests: {}", summary.total_requests));
    parts.push(format!("Users: {}", summary.enabled_users));
    parts.push(format!("Whitelist: {}", summary.whitelist));
    parts.push(format!(
        "Last activity: {}",
        summary.last_activity.map(format_ts).unwrap_or_default()
    ));

    (StatusCode::OK, parts.join(" / ")).into_response()
}

/// Fields of the log entry learned while the request is processed.
#[derive(Default)]
struct Trail {
    user: String,
    origin: String,
    path: String,
}

/// How a relayed request ended, for the log.
struct Relayed {
    response: Response,
    action: Action,
    reason: &'static str,
}

impl Relayed {
    fn proxied(response: Response, reason: &'static str) -> Self {
        Self {
            response,
            action: Action::Proxy,
            reason,
        }
    }
}

/// Relay handler: `/{user}/{target...}`.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    if path == "/admin" || path.starts_with("/admin/") {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let meta = client_meta(&state, &request);
    let request_id = request_id(request.headers());
    let mut trail = Trail::default();

    let (response, action, reason) = match relay(&state, &meta, request, &mut trail).await {
        Ok(Relayed {
            response,
            action,
            reason,
        }) => (response, action, reason.to_string()),
        Err(ProxyError::BadRequest) => {
            // Not a relay request at all; nothing worth logging.
            return ProxyError::BadRequest.into_response();
        }
        Err(e) => {
            tracing::info!(
                request_id = %request_id,
                user = %trail.user,
                origin = %trail.origin,
                error = %e,
                "Relay request refused"
            );
            let action = e.action();
            let reason = e.reason();
            (e.into_response(), action, reason)
        }
    };

    let status = response.status().as_u16();
    metrics::record_request(action.as_str(), status);
    state.access_log.record(
        LogEntry::new(unix_now(), &meta, action, status)
            .user(trail.user)
            .origin(trail.origin)
            .reason(reason)
            .path(trail.path),
    );
    response
}

async fn relay(
    state: &AppState,
    meta: &ClientMeta,
    request: Request<Body>,
    trail: &mut Trail,
) -> Result<Relayed, ProxyError> {
    let (user, rest) = split_ingress(request.uri().path()).ok_or(ProxyError::BadRequest)?;
    trail.user = user.clone();
    trail.path = rest.clone();

    let gate = AccessGate::new(&state.store);
    gate.check_user(&user).await?;

    let target = parse_upstream_url(&rest, request.uri().query())?;
    let origin = canonical_origin(&target);
    trail.origin = origin.to_string();
    trail.path = target.path().to_string();

    gate.enforce(&origin, false).await?;

    state.access_log.touch_last_seen(LastSeenUpdate {
        user,
        origin: origin.to_string(),
        ts: unix_now(),
        ip: meta.ip.clone(),
        colo: meta.colo.clone(),
    });

    if websocket::is_websocket_upgrade(request.headers()) {
        return relay_websocket(request, &target).await;
    }

    let config = state.config.load_full();
    let upstream_request = buffer_request(request, &target, config.security.max_body_size).await?;

    let started = Instant::now();
    let upstream = state.upstream.fetch(&target, &upstream_request).await?;
    metrics::record_upstream_duration(started);

    let direct_domains = state.direct_domains.refresh_if_stale(&state.store).await;
    let location = upstream.headers().get(header::LOCATION).cloned();
    let outcome = resolve_redirect(
        &target,
        upstream.status(),
        location.as_ref(),
        &direct_domains,
        |redirect_origin| async move { gate.permit(&redirect_origin).await },
    )
    .await?;
    if outcome != RedirectOutcome::NotRedirect {
        metrics::record_redirect(outcome.label());
    }

    match outcome {
        RedirectOutcome::NotRedirect => Ok(Relayed::proxied(response::relay(upstream), "ok")),
        RedirectOutcome::DirectPassthrough { location } => Ok(Relayed {
            response: response::relay_redirect(upstream, &location),
            action: Action::Allow,
            reason: "manual redirect",
        }),
        RedirectOutcome::Denied { origin } => Err(ProxyError::OriginDenied {
            origin,
            redirect: true,
        }),
        RedirectOutcome::Follow { target: next, .. } => {
            follow_redirect(state, upstream, upstream_request, &next).await
        }
        RedirectOutcome::RawForward => Ok(Relayed::proxied(
            response::relay(upstream),
            "bad redirect url",
        )),
    }
}

/// Re-issue the request once to a permitted redirect target. A further 3xx
/// from that target goes back to the client unfollowed. If the hop fails the
/// original 3xx is relayed as it is.
async fn follow_redirect(
    state: &AppState,
    upstream: reqwest::Response,
    mut request: UpstreamRequest,
    next: &Url,
) -> Result<Relayed, ProxyError> {
    sanitize_outbound(&mut request.headers, next);

    let started = Instant::now();
    match state.upstream.fetch(next, &request).await {
        Ok(followed) => {
            metrics::record_upstream_duration(started);
            Ok(Relayed::proxied(response::relay(followed), "follow redirect"))
        }
        Err(e) => {
            tracing::warn!(target = %next, error = %e, "Following redirect failed");
            Ok(Relayed::proxied(response::relay(upstream), "bad redirect url"))
        }
    }
}

async fn relay_websocket(request: Request<Body>, target: &Url) -> Result<Relayed, ProxyError> {
    let (mut parts, _body) = request.into_parts();
    let upgrade = match axum::extract::ws::WebSocketUpgrade::from_request_parts(&mut parts, &()).await
    {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            return Ok(Relayed::proxied(rejection.into_response(), "ws"));
        }
    };

    let response = websocket::relay(upgrade, target, &parts.headers).await?;
    Ok(Relayed::proxied(response, "ws"))
}

/// Outbound copy of the client request. GET and HEAD never carry a body.
async fn buffer_request(
    request: Request<Body>,
    target: &Url,
    max_body_size: usize,
) -> Result<UpstreamRequest, ProxyError> {
    let (parts, body) = request.into_parts();

    let body = if parts.method == Method::GET || parts.method == Method::HEAD {
        None
    } else {
        let bytes = axum::body::to_bytes(body, max_body_size)
            .await
            .map_err(|_| ProxyError::BodyTooLarge(max_body_size))?;
        Some(bytes)
    };

    let mut headers: HeaderMap = parts.headers;
    sanitize_outbound(&mut headers, target);

    Ok(UpstreamRequest {
        method: parts.method,
        headers,
        body,
    })
}
