//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig
//!     → held in an ArcSwap inside AppState
//!
//! On change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → server swaps the ArcSwap
//!     → next request observes the new config
//! ```
//!
//! Listener address, store backend and the direct-domain cache TTL are read
//! once at startup; everything else takes effect on reload.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AccessLogConfig, AdminConfig, GeoConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, RedirectConfig, SecurityConfig, StoreBackend, StoreConfig, TimeoutConfig,
};
