//! Cross-cutting HTTP middleware.

pub mod cors;
