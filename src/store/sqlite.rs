//! SQLite-backed durable store.
//!
//! One connection behind a mutex. Every statement runs with the lock held,
//! and the last-seen upsert is a single `ON CONFLICT DO UPDATE`, so
//! concurrent touches of the same key serialize without lost increments.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::access_log::entry::{Action, LogEntry, LogRow};
use crate::store::{
    GeoRecord, LastSeen, LastSeenUpdate, PruneReport, Store, StoreError, Summary, UserRecord,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS relay_config (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS relay_users (
        user       TEXT PRIMARY KEY,
        enabled    INTEGER NOT NULL DEFAULT 1,
        note       TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS relay_whitelist (
        origin     TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS relay_last_seen (
        user       TEXT NOT NULL,
        origin     TEXT NOT NULL,
        last_ts    INTEGER NOT NULL,
        count      INTEGER NOT NULL DEFAULT 0,
        last_ip    TEXT NOT NULL DEFAULT '',
        last_colo  TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (user, origin)
    );

    CREATE TABLE IF NOT EXISTS relay_logs (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        ts         INTEGER NOT NULL,
        user       TEXT NOT NULL DEFAULT '',
        origin     TEXT NOT NULL DEFAULT '',
        status     INTEGER NOT NULL,
        action     TEXT NOT NULL,
        reason     TEXT NOT NULL DEFAULT '',
        path       TEXT NOT NULL DEFAULT '',
        ip         TEXT NOT NULL DEFAULT '',
        city       TEXT NOT NULL DEFAULT '',
        colo       TEXT NOT NULL DEFAULT '',
        user_agent TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS relay_geo (
        ip         TEXT PRIMARY KEY,
        city       TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_last_seen_ts ON relay_last_seen(last_ts);
    CREATE INDEX IF NOT EXISTS idx_logs_ts      ON relay_logs(ts);
    CREATE INDEX IF NOT EXISTS idx_geo_updated  ON relay_geo(updated_at);
";

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private in-memory database, for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user: row.get(0)?,
        enabled: row.get::<_, i64>(1)? != 0,
        note: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    let action: String = row.get(5)?;
    let action = action.parse::<Action>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    Ok(LogRow {
        id: row.get(0)?,
        entry: LogEntry {
            ts: row.get(1)?,
            user: row.get(2)?,
            origin: row.get(3)?,
            status: row.get(4)?,
            action,
            reason: row.get(6)?,
            path: row.get(7)?,
            ip: row.get(8)?,
            city: row.get(9)?,
            colo: row.get(10)?,
            user_agent: row.get(11)?,
        },
    })
}

impl Store for SqliteStore {
    fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT value FROM relay_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO relay_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_user(&self, user: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT user, enabled, note, created_at, updated_at
                 FROM relay_users WHERE user = ?1",
                params![user],
                user_from_row,
            )
            .optional()?)
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT user, enabled, note, created_at, updated_at
             FROM relay_users ORDER BY user ASC",
        )?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_user(&self, user: &str, note: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO relay_users (user, enabled, note, created_at, updated_at)
             VALUES (?1, 1, ?2, ?3, ?3)
             ON CONFLICT(user) DO UPDATE SET note = excluded.note, updated_at = excluded.updated_at",
            params![user, note, now],
        )?;
        Ok(())
    }

    fn toggle_user(&self, user: &str, now: i64) -> Result<Option<bool>, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE relay_users
             SET enabled = CASE enabled WHEN 0 THEN 1 ELSE 0 END, updated_at = ?2
             WHERE user = ?1",
            params![user, now],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let enabled: i64 = conn.query_row(
            "SELECT enabled FROM relay_users WHERE user = ?1",
            params![user],
            |row| row.get(0),
        )?;
        Ok(Some(enabled != 0))
    }

    fn delete_user(&self, user: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM relay_users WHERE user = ?1", params![user])?;
        tx.execute("DELETE FROM relay_last_seen WHERE user = ?1", params![user])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn add_origin(&self, origin: &str, now: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relay_whitelist (origin, created_at) VALUES (?1, ?2)",
            params![origin, now],
        )?;
        Ok(inserted > 0)
    }

    fn remove_origin(&self, origin: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM relay_whitelist WHERE origin = ?1", params![origin])?;
        Ok(removed > 0)
    }

    fn contains_origin(&self, origin: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM relay_whitelist WHERE origin = ?1 LIMIT 1",
                params![origin],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_origins(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT origin FROM relay_whitelist ORDER BY origin ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn touch_last_seen(&self, update: &LastSeenUpdate) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO relay_last_seen (user, origin, last_ts, count, last_ip, last_colo)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(user, origin) DO UPDATE SET
                 last_ts   = excluded.last_ts,
                 count     = count + 1,
                 last_ip   = excluded.last_ip,
                 last_colo = excluded.last_colo",
            params![update.user, update.origin, update.ts, update.ip, update.colo],
        )?;
        Ok(())
    }

    fn list_last_seen(&self, limit: usize) -> Result<Vec<LastSeen>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT user, origin, last_ts, count, last_ip, last_colo
             FROM relay_last_seen ORDER BY last_ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LastSeen {
                user: row.get(0)?,
                origin: row.get(1)?,
                last_ts: row.get(2)?,
                count: row.get::<_, i64>(3)? as u64,
                last_ip: row.get(4)?,
                last_colo: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn append_log(&self, entry: &LogEntry, max_entries: usize) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO relay_logs
                 (ts, user, origin, status, action, reason, path, ip, city, colo, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.ts,
                entry.user,
                entry.origin,
                entry.status,
                entry.action.as_str(),
                entry.reason,
                entry.path,
                entry.ip,
                entry.city,
                entry.colo,
                entry.user_agent,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM relay_logs WHERE id <= ?1 - ?2",
            params![id, max_entries as i64],
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn list_logs(&self, limit: usize) -> Result<Vec<LogRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, user, origin, status, action, reason, path, ip, city, colo, user_agent
             FROM relay_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], log_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_geo(&self, ip: &str) -> Result<Option<GeoRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT city, updated_at FROM relay_geo WHERE ip = ?1",
                params![ip],
                |row| {
                    Ok(GeoRecord {
                        city: row.get(0)?,
                        updated_at: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn put_geo(&self, ip: &str, city: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO relay_geo (ip, city, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(ip) DO UPDATE SET city = excluded.city, updated_at = excluded.updated_at",
            params![ip, city, now],
        )?;
        Ok(())
    }

    fn delete_older_than(&self, cutoff: i64) -> Result<PruneReport, StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let logs = tx.execute("DELETE FROM relay_logs WHERE ts < ?1", params![cutoff])?;
        let last_seen = tx.execute("DELETE FROM relay_last_seen WHERE last_ts < ?1", params![cutoff])?;
        let geo = tx.execute("DELETE FROM relay_geo WHERE updated_at < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(PruneReport {
            logs,
            last_seen,
            geo,
        })
    }

    fn summary(&self) -> Result<Summary, StoreError> {
        let conn = self.conn()?;
        let (total_requests, last_activity): (i64, Option<i64>) = conn.query_row(
            "SELECT COALESCE(SUM(count), 0), MAX(last_ts) FROM relay_last_seen",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let enabled_users: i64 = conn.query_row(
            "SELECT COUNT(*) FROM relay_users WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;
        let whitelist: i64 =
            conn.query_row("SELECT COUNT(*) FROM relay_whitelist", [], |row| row.get(0))?;

        Ok(Summary {
            total_requests: total_requests as u64,
            enabled_users: enabled_users as usize,
            whitelist: whitelist as usize,
            last_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(ts: i64, action: Action, reason: &str) -> LogEntry {
        LogEntry {
            ts,
            user: "ikun".into(),
            origin: "https://example.com".into(),
            status: 403,
            action,
            reason: reason.into(),
            path: "/Items".into(),
            ip: "203.0.113.7".into(),
            city: "Tokyo".into(),
            colo: "NRT".into(),
            user_agent: "test".into(),
        }
    }

    #[test]
    fn test_log_rows_read_back_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.append_log(&entry(i, Action::Deny, &format!("r{i}")), 3).unwrap();
        }

        let rows = store.list_logs(10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].entry, entry(4, Action::Deny, "r4"));
        assert_eq!(rows[2].entry.reason, "r2");
    }

    #[test]
    fn test_user_toggle_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_user("ikun", "", 1).unwrap();
        assert_eq!(store.toggle_user("ikun", 2).unwrap(), Some(false));
        assert!(!store.get_user("ikun").unwrap().unwrap().enabled);
        assert_eq!(store.toggle_user("ghost", 2).unwrap(), None);

        store
            .touch_last_seen(&LastSeenUpdate {
                user: "ikun".into(),
                origin: "https://example.com".into(),
                ts: 3,
                ip: String::new(),
                colo: String::new(),
            })
            .unwrap();
        assert!(store.delete_user("ikun").unwrap());
        assert!(store.list_last_seen(10).unwrap().is_empty());
        assert!(!store.delete_user("ikun").unwrap());
    }

    #[test]
    fn test_config_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_config("k").unwrap(), None);
        store.put_config("k", "1").unwrap();
        store.put_config("k", "0").unwrap();
        assert_eq!(store.get_config("k").unwrap().as_deref(), Some("0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_touches_are_not_lost() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut tasks = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                store
                    .touch_last_seen(&LastSeenUpdate {
                        user: "ikun".into(),
                        origin: "https://example.com".into(),
                        ts: i,
                        ip: String::new(),
                        colo: String::new(),
                    })
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let rows = store.list_last_seen(10).unwrap();
        assert_eq!(rows[0].count, 100);
        assert_eq!(store.summary().unwrap().total_requests, 100);
    }

    #[test]
    fn test_retention_sweep() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append_log(&entry(10, Action::Proxy, "old"), 100).unwrap();
        store.append_log(&entry(90, Action::Proxy, "recent"), 100).unwrap();
        store.put_geo("203.0.113.1", "", 10).unwrap();
        store.put_geo("203.0.113.2", "Seoul", 90).unwrap();

        let report = store.delete_older_than(50).unwrap();
        assert_eq!(report.logs, 1);
        assert_eq!(report.geo, 1);

        let rows = store.list_logs(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.reason, "recent");
        assert!(store.get_geo("203.0.113.1").unwrap().is_none());
    }
}
