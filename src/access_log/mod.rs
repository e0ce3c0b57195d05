//! Access log: one row per terminal request decision.
//!
//! Handlers build a [`LogEntry`] and hand it to the [`AccessLogger`]; the
//! worker fills in the city, appends to the store and trims the table.
//! Rows older than the retention window are swept at most once per
//! cleanup interval.

pub mod entry;
pub mod geo;
pub mod retention;
pub mod writer;

pub use entry::{Action, LogEntry, LogRow};
pub use geo::GeoResolver;
pub use retention::{retention_cutoff, CleanupSchedule};
pub use writer::AccessLogger;
