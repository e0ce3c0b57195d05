//! Target resolution.
//!
//! # Data Flow
//! ```text
//! Ingress path /{user}/{target...} + query
//!     → target.rs (split user, repair scheme, parse Url)
//!     → origin.rs (canonical scheme://host[:port] key)
//!     → security::access_control (user + allow-list gate)
//!
//! Upstream 3xx:
//!     → direct_domains.rs (cached direct-download host list)
//!     → http::redirect (decide passthrough / follow / deny)
//! ```

pub mod direct_domains;
pub mod origin;
pub mod target;

pub use direct_domains::DirectDomainCache;
pub use origin::{canonical_origin, normalize_origin, OriginKey};
pub use target::{parse_upstream_url, split_ingress};
