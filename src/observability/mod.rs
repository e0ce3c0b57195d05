//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handlers, access-log worker, admin API:
//!     → logging.rs (tracing events, plain or JSON)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (observability.metrics_enabled)
//! ```
//!
//! Per-request spans come from tower-http's `TraceLayer`; the
//! `x-request-id` header ties them to the access log entries.

pub mod logging;
pub mod metrics;
