//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting → in-flight requests finish
//!             → access-log queue drained → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
