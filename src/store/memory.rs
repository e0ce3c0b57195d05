//! In-process store.
//!
//! Keyed tables live in `DashMap`s, whose per-shard locking makes the
//! `entry` API an atomic read-modify-write for the last-seen upsert. The log
//! table needs ordered trimming and sits behind a single mutex.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use crate::access_log::entry::{LogEntry, LogRow};
use crate::store::{
    GeoRecord, LastSeen, LastSeenUpdate, PruneReport, Store, StoreError, Summary, UserRecord,
};

#[derive(Default)]
struct LogTable {
    next_id: i64,
    rows: VecDeque<LogRow>,
}

/// A thread-safe, non-persistent store.
#[derive(Default)]
pub struct MemoryStore {
    config: DashMap<String, String>,
    users: DashMap<String, UserRecord>,
    whitelist: DashMap<String, i64>,
    last_seen: DashMap<(String, String), LastSeen>,
    logs: Mutex<LogTable>,
    geo: DashMap<String, GeoRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.config.get(key).map(|r| r.value().clone()))
    }

    fn put_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_user(&self, user: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(user).map(|r| r.value().clone()))
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users: Vec<UserRecord> = self.users.iter().map(|r| r.value().clone()).collect();
        users.sort_by(|a, b| a.user.cmp(&b.user));
        Ok(users)
    }

    fn upsert_user(&self, user: &str, note: &str, now: i64) -> Result<(), StoreError> {
        self.users
            .entry(user.to_string())
            .and_modify(|r| {
                r.note = note.to_string();
                r.updated_at = now;
            })
            .or_insert_with(|| UserRecord {
                user: user.to_string(),
                enabled: true,
                note: note.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    fn toggle_user(&self, user: &str, now: i64) -> Result<Option<bool>, StoreError> {
        Ok(self.users.get_mut(user).map(|mut r| {
            r.enabled = !r.enabled;
            r.updated_at = now;
            r.enabled
        }))
    }

    fn delete_user(&self, user: &str) -> Result<bool, StoreError> {
        let removed = self.users.remove(user).is_some();
        self.last_seen.retain(|(u, _), _| u != user);
        Ok(removed)
    }

    fn add_origin(&self, origin: &str, now: i64) -> Result<bool, StoreError> {
        let mut inserted = false;
        self.whitelist.entry(origin.to_string()).or_insert_with(|| {
            inserted = true;
            now
        });
        Ok(inserted)
    }

    fn remove_origin(&self, origin: &str) -> Result<bool, StoreError> {
        Ok(self.whitelist.remove(origin).is_some())
    }

    fn contains_origin(&self, origin: &str) -> Result<bool, StoreError> {
        Ok(self.whitelist.contains_key(origin))
    }

    fn list_origins(&self) -> Result<Vec<String>, StoreError> {
        let mut origins: Vec<String> = self.whitelist.iter().map(|r| r.key().clone()).collect();
        origins.sort();
        Ok(origins)
    }

    fn touch_last_seen(&self, update: &LastSeenUpdate) -> Result<(), StoreError> {
        self.last_seen
            .entry((update.user.clone(), update.origin.clone()))
            .and_modify(|r| {
                r.count += 1;
                r.last_ts = update.ts;
                r.last_ip = update.ip.clone();
                r.last_colo = update.colo.clone();
            })
            .or_insert_with(|| LastSeen {
                user: update.user.clone(),
                origin: update.origin.clone(),
                last_ts: update.ts,
                count: 1,
                last_ip: update.ip.clone(),
                last_colo: update.colo.clone(),
            });
        Ok(())
    }

    fn list_last_seen(&self, limit: usize) -> Result<Vec<LastSeen>, StoreError> {
        let mut rows: Vec<LastSeen> = self.last_seen.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| b.last_ts.cmp(&a.last_ts));
        rows.truncate(limit);
        Ok(rows)
    }

    fn append_log(&self, entry: &LogEntry, max_entries: usize) -> Result<i64, StoreError> {
        let mut table = self.logs.lock().map_err(|_| StoreError::Poisoned)?;
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push_back(LogRow {
            id,
            entry: entry.clone(),
        });
        while table.rows.len() > max_entries {
            table.rows.pop_front();
        }
        Ok(id)
    }

    fn list_logs(&self, limit: usize) -> Result<Vec<LogRow>, StoreError> {
        let table = self.logs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.rows.iter().rev().take(limit).cloned().collect())
    }

    fn get_geo(&self, ip: &str) -> Result<Option<GeoRecord>, StoreError> {
        Ok(self.geo.get(ip).map(|r| r.value().clone()))
    }

    fn put_geo(&self, ip: &str, city: &str, now: i64) -> Result<(), StoreError> {
        self.geo.insert(
            ip.to_string(),
            GeoRecord {
                city: city.to_string(),
                updated_at: now,
            },
        );
        Ok(())
    }

    fn delete_older_than(&self, cutoff: i64) -> Result<PruneReport, StoreError> {
        let logs = {
            let mut table = self.logs.lock().map_err(|_| StoreError::Poisoned)?;
            let before = table.rows.len();
            table.rows.retain(|r| r.entry.ts >= cutoff);
            before - table.rows.len()
        };

        let before = self.last_seen.len();
        self.last_seen.retain(|_, r| r.last_ts >= cutoff);
        let last_seen = before.saturating_sub(self.last_seen.len());

        let before = self.geo.len();
        self.geo.retain(|_, r| r.updated_at >= cutoff);
        let geo = before.saturating_sub(self.geo.len());

        Ok(PruneReport {
            logs,
            last_seen,
            geo,
        })
    }

    fn summary(&self) -> Result<Summary, StoreError> {
        let mut total_requests = 0;
        let mut last_activity: Option<i64> = None;
        for r in self.last_seen.iter() {
            total_requests += r.count;
            last_activity = Some(last_activity.map_or(r.last_ts, |ts| ts.max(r.last_ts)));
        }

        Ok(Summary {
            total_requests,
            enabled_users: self.users.iter().filter(|r| r.enabled).count(),
            whitelist: self.whitelist.len(),
            last_activity,
        })
    }
}
