//! Edge relay: a path-addressed reverse proxy with an origin allow-list.
//!
//! Requests to `/{user}/{scheme}:/{host}/{path}` are relayed to the
//! upstream URL encoded in the path, provided the user is enabled and the
//! upstream origin is on the allow-list. Redirects are resolved under the
//! same policy, and every decision lands in a capped, age-pruned access log.

pub mod access_log;
pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;
pub mod store;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
