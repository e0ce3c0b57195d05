//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy request:
//!     → access_control.rs (user enabled? origin on the allow-list?)
//!     → headers.rs (strip client identity, set host)
//!     → upstream
//!     → headers.rs (strip security policy headers)
//!
//! Admin request:
//!     → session.rs (verify signed `adm` cookie)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a store error is a 500, never a permit
//! - The allow-list is read per request, never cached
//! - Session tokens are stateless and HMAC-signed

pub mod access_control;
pub mod headers;
pub mod session;

pub use access_control::AccessGate;
pub use session::SessionAuthenticator;
