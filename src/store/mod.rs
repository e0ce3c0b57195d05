//! Persistent state behind the relay.
//!
//! # Tables
//! ```text
//! config      key → value              (whitelist_enabled, direct_domains)
//! users       user → enabled, note
//! whitelist   canonical origin
//! last_seen   (user, origin) → last_ts, count, last_ip, last_colo
//! logs        id → LogEntry            (capped, age-pruned)
//! geo         ip → city, updated_at    (age-pruned)
//! ```
//!
//! The trait is synchronous: both backends answer from memory or a local
//! SQLite file. `touch_last_seen` must be atomic per key in every backend.
//! Async code goes through [`blocking`], which runs the call on Tokio's
//! blocking pool so a held SQLite lock never stalls a runtime thread.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::access_log::entry::{LogEntry, LogRow};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Config key holding the allow-list enforcement flag ("1" / "0").
pub const KEY_WHITELIST_ENABLED: &str = "whitelist_enabled";
/// Config key holding the direct-domain list as a JSON array.
pub const KEY_DIRECT_DOMAINS: &str = "direct_domains";
/// Config key holding the public relay origins shown to operators.
pub const KEY_BASE_DOMAINS: &str = "base_domains";

/// Well-known direct-download hosts whose redirects go straight to the client.
pub const DEFAULT_DIRECT_DOMAINS: &[&str] = &[
    "ap-cn01.emby.bangumi.ca",
    "ap-cn02.emby.bangumi.ca",
    "ap-cn03.emby.bangumi.ca",
    "quark.cn",
    "mini189.cn",
    "189.cn",
    "ctyunxs.cn",
    "telecomjs.com",
    "xunlei.com",
    "115.com",
    "115cdn.com",
    "115cdn.net",
    "uc.cn",
    "aliyundrive.com",
    "aliyundrive.net",
    "voicehub.top",
    "xiaoya.pro",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt value for '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub user: String,
    pub enabled: bool,
    pub note: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// One permitted request, folded into the last-seen aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastSeenUpdate {
    pub user: String,
    pub origin: String,
    pub ts: i64,
    pub ip: String,
    pub colo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastSeen {
    pub user: String,
    pub origin: String,
    #[serde(serialize_with = "serialize_ts")]
    pub last_ts: i64,
    pub count: u64,
    pub last_ip: String,
    pub last_colo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub city: String,
    pub updated_at: i64,
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub logs: usize,
    pub last_seen: usize,
    pub geo: usize,
}

/// Counters for the overview page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_requests: u64,
    pub enabled_users: usize,
    pub whitelist: usize,
    pub last_activity: Option<i64>,
}

/// Storage contract the relay depends on.
pub trait Store: Send + Sync {
    fn get_config(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put_config(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_user(&self, user: &str) -> Result<Option<UserRecord>, StoreError>;
    fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;
    /// Create an enabled user, or update the note of an existing one.
    fn upsert_user(&self, user: &str, note: &str, now: i64) -> Result<(), StoreError>;
    /// Flip `enabled`; `None` when the user does not exist.
    fn toggle_user(&self, user: &str, now: i64) -> Result<Option<bool>, StoreError>;
    /// Remove the user and its last-seen rows.
    fn delete_user(&self, user: &str) -> Result<bool, StoreError>;

    /// Returns false when the origin was already present.
    fn add_origin(&self, origin: &str, now: i64) -> Result<bool, StoreError>;
    fn remove_origin(&self, origin: &str) -> Result<bool, StoreError>;
    fn contains_origin(&self, origin: &str) -> Result<bool, StoreError>;
    fn list_origins(&self) -> Result<Vec<String>, StoreError>;

    /// Atomic upsert: insert with count 1, or increment and overwrite ts/ip/colo.
    fn touch_last_seen(&self, update: &LastSeenUpdate) -> Result<(), StoreError>;
    /// Newest first.
    fn list_last_seen(&self, limit: usize) -> Result<Vec<LastSeen>, StoreError>;

    /// Append, then drop everything but the newest `max_entries` rows.
    fn append_log(&self, entry: &LogEntry, max_entries: usize) -> Result<i64, StoreError>;
    /// Newest first.
    fn list_logs(&self, limit: usize) -> Result<Vec<LogRow>, StoreError>;

    fn get_geo(&self, ip: &str) -> Result<Option<GeoRecord>, StoreError>;
    fn put_geo(&self, ip: &str, city: &str, now: i64) -> Result<(), StoreError>;

    /// Remove log, last-seen and geo rows stamped before `cutoff`.
    fn delete_older_than(&self, cutoff: i64) -> Result<PruneReport, StoreError>;

    fn summary(&self) -> Result<Summary, StoreError>;
}

/// Stand-in used when the configured store cannot be opened. Every call
/// fails, so requests get an explicit 500 instead of silently passing.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

impl Store for UnavailableStore {
    fn get_config(&self, _: &str) -> Result<Option<String>, StoreError> {
        self.fail()
    }
    fn put_config(&self, _: &str, _: &str) -> Result<(), StoreError> {
        self.fail()
    }
    fn get_user(&self, _: &str) -> Result<Option<UserRecord>, StoreError> {
        self.fail()
    }
    fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.fail()
    }
    fn upsert_user(&self, _: &str, _: &str, _: i64) -> Result<(), StoreError> {
        self.fail()
    }
    fn toggle_user(&self, _: &str, _: i64) -> Result<Option<bool>, StoreError> {
        self.fail()
    }
    fn delete_user(&self, _: &str) -> Result<bool, StoreError> {
        self.fail()
    }
    fn add_origin(&self, _: &str, _: i64) -> Result<bool, StoreError> {
        self.fail()
    }
    fn remove_origin(&self, _: &str) -> Result<bool, StoreError> {
        self.fail()
    }
    fn contains_origin(&self, _: &str) -> Result<bool, StoreError> {
        self.fail()
    }
    fn list_origins(&self) -> Result<Vec<String>, StoreError> {
        self.fail()
    }
    fn touch_last_seen(&self, _: &LastSeenUpdate) -> Result<(), StoreError> {
        self.fail()
    }
    fn list_last_seen(&self, _: usize) -> Result<Vec<LastSeen>, StoreError> {
        self.fail()
    }
    fn append_log(&self, _: &LogEntry, _: usize) -> Result<i64, StoreError> {
        self.fail()
    }
    fn list_logs(&self, _: usize) -> Result<Vec<LogRow>, StoreError> {
        self.fail()
    }
    fn get_geo(&self, _: &str) -> Result<Option<GeoRecord>, StoreError> {
        self.fail()
    }
    fn put_geo(&self, _: &str, _: &str, _: i64) -> Result<(), StoreError> {
        self.fail()
    }
    fn delete_older_than(&self, _: i64) -> Result<PruneReport, StoreError> {
        self.fail()
    }
    fn summary(&self) -> Result<Summary, StoreError> {
        self.fail()
    }
}

/// Run `f` against `store` on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
}

/// Whether allow-list enforcement is on. A missing key reads as enabled.
pub fn whitelist_enabled(store: &dyn Store) -> Result<bool, StoreError> {
    Ok(store
        .get_config(KEY_WHITELIST_ENABLED)?
        .map_or(true, |v| v == "1"))
}

pub fn set_whitelist_enabled(store: &dyn Store, enabled: bool) -> Result<(), StoreError> {
    store.put_config(KEY_WHITELIST_ENABLED, if enabled { "1" } else { "0" })
}

/// Stored direct-domain list, or the built-in defaults when never set.
pub fn direct_domains(store: &dyn Store) -> Result<Vec<String>, StoreError> {
    match store.get_config(KEY_DIRECT_DOMAINS)? {
        Some(raw) => {
            let list: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    key: KEY_DIRECT_DOMAINS.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(list.into_iter().filter(|d| !d.trim().is_empty()).collect())
        }
        None => Ok(default_direct_domains()),
    }
}

pub fn set_direct_domains(store: &dyn Store, domains: &[String]) -> Result<(), StoreError> {
    put_list(store, KEY_DIRECT_DOMAINS, domains)
}

/// Public origins the relay is reachable under. Unset or unreadable
/// values read as an empty list.
pub fn base_domains(store: &dyn Store) -> Result<Vec<String>, StoreError> {
    Ok(store
        .get_config(KEY_BASE_DOMAINS)?
        .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
        .unwrap_or_default())
}

pub fn set_base_domains(store: &dyn Store, origins: &[String]) -> Result<(), StoreError> {
    put_list(store, KEY_BASE_DOMAINS, origins)
}

fn put_list(store: &dyn Store, key: &str, list: &[String]) -> Result<(), StoreError> {
    let raw = serde_json::to_string(list).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.put_config(key, &raw)
}

pub fn default_direct_domains() -> Vec<String> {
    DEFAULT_DIRECT_DOMAINS.iter().map(|d| d.to_string()).collect()
}

/// First-start defaults. Existing values are never overwritten.
///
/// Enforcement starts enabled: with an empty allow-list nothing is proxied
/// until an operator adds origins or explicitly turns enforcement off.
pub fn seed_defaults(store: &dyn Store, seed_users: &[String], now: i64) -> Result<(), StoreError> {
    if store.get_config(KEY_WHITELIST_ENABLED)?.is_none() {
        set_whitelist_enabled(store, true)?;
    }
    if store.get_config(KEY_DIRECT_DOMAINS)?.is_none() {
        set_direct_domains(store, &default_direct_domains())?;
    }
    for user in seed_users {
        let user = user.trim();
        if !user.is_empty() && store.get_user(user)?.is_none() {
            store.upsert_user(user, "", now)?;
        }
    }
    Ok(())
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Render a unix timestamp as RFC 3339 (UTC).
pub fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

pub fn serialize_ts<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts(*ts))
}
