//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, relay handler)
//!     → request.rs (request id, client metadata from edge headers)
//!     → upstream.rs (reqwest, redirects not followed)
//!     → redirect.rs (3xx → passthrough / follow / deny / raw)
//!     → response.rs (strip policy headers, stream body)
//!     → Send to client
//!
//! Upgrade: websocket
//!     → websocket.rs (upstream handshake, then frame pump)
//! ```

pub mod middleware;
pub mod redirect;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;
pub mod websocket;

pub use request::{ClientMeta, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
