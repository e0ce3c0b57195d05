//! Background writer for access-log work.
//!
//! Request handlers enqueue and move on; a single worker task drains a
//! bounded queue in order. When the queue is full the task is dropped and
//! counted. Entries without a city are resolved on a small set of side
//! tasks and appended when the lookup returns, so a slow geo service never
//! holds up the rest of the queue. Failures are counted and logged, never
//! returned. `shutdown` is the completion barrier: everything queued before
//! it, pending lookups included, is written before it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::access_log::entry::LogEntry;
use crate::access_log::geo::GeoResolver;
use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::store::{self, LastSeenUpdate, Store};

/// Tasks waiting for the worker before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 1024;

/// Concurrent geo lookups; entries beyond this are logged without a city.
const MAX_GEO_LOOKUPS: usize = 16;

enum LogTask {
    Record(LogEntry),
    Touch(LastSeenUpdate),
    Sweep { cutoff: i64 },
    Close,
}

/// Handle for enqueueing log work. Cheap to clone.
#[derive(Clone)]
pub struct AccessLogger {
    tx: mpsc::Sender<LogTask>,
    failures: Arc<AtomicU64>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AccessLogger {
    /// Start the worker on the current runtime.
    pub fn spawn(
        store: Arc<dyn Store>,
        config: Arc<ArcSwap<ProxyConfig>>,
        geo: GeoResolver,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let failures = Arc::new(AtomicU64::new(0));

        let worker = LogWorker {
            store,
            config,
            geo,
            failures: failures.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            tx,
            failures,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn record(&self, entry: LogEntry) {
        self.enqueue(LogTask::Record(entry));
    }

    pub fn touch_last_seen(&self, update: LastSeenUpdate) {
        self.enqueue(LogTask::Touch(update));
    }

    /// Delete rows older than `cutoff` from logs, last-seen and geo cache.
    pub fn sweep(&self, cutoff: i64) {
        self.enqueue(LogTask::Sweep { cutoff });
    }

    /// Number of log operations that could not be completed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Drain the queue and stop the worker. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(LogTask::Close).await;
        let handle = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Access log worker panicked");
            }
        }
    }

    fn enqueue(&self, task: LogTask) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => record_failure(&self.failures, "queue full"),
            Err(TrySendError::Closed(_)) => record_failure(&self.failures, "queue closed"),
        }
    }
}

fn record_failure(counter: &AtomicU64, error: &str) {
    counter.fetch_add(1, Ordering::Relaxed);
    metrics::record_log_failure();
    tracing::warn!(error = %error, "Access log write failed");
}

struct LogWorker {
    store: Arc<dyn Store>,
    config: Arc<ArcSwap<ProxyConfig>>,
    geo: GeoResolver,
    failures: Arc<AtomicU64>,
}

impl LogWorker {
    async fn run(self, mut rx: mpsc::Receiver<LogTask>) {
        let mut lookups: JoinSet<LogEntry> = JoinSet::new();
        loop {
            tokio::select! {
                task = rx.recv() => match task {
                    Some(LogTask::Close) | None => break,
                    Some(task) => {
                        if let Err(e) = self.handle(task, &mut lookups).await {
                            record_failure(&self.failures, &e);
                        }
                    }
                },
                Some(resolved) = lookups.join_next(), if !lookups.is_empty() => {
                    self.finish_lookup(resolved).await;
                }
            }
        }

        while let Some(resolved) = lookups.join_next().await {
            self.finish_lookup(resolved).await;
        }
        tracing::debug!("Access log worker stopped");
    }

    async fn handle(&self, task: LogTask, lookups: &mut JoinSet<LogEntry>) -> Result<(), String> {
        match task {
            LogTask::Record(entry) => {
                let geo_config = self.config.load().geo.clone();
                if entry.city.is_empty() && geo_config.enabled && !entry.ip.is_empty() {
                    if lookups.len() < MAX_GEO_LOOKUPS {
                        let geo = self.geo.clone();
                        let store = self.store.clone();
                        lookups.spawn(async move {
                            let mut entry = entry;
                            entry.city = geo.city(&geo_config, &store, &entry.ip, "").await;
                            entry
                        });
                        return Ok(());
                    }
                    tracing::debug!(ip = %entry.ip, "Geo lookups saturated; logging without city");
                }
                self.append(entry).await
            }
            LogTask::Touch(update) => store::blocking(&self.store, move |s| {
                s.touch_last_seen(&update)
            })
            .await
            .map_err(|e| e.to_string()),
            LogTask::Sweep { cutoff } => {
                let report = store::blocking(&self.store, move |s| s.delete_older_than(cutoff))
                    .await
                    .map_err(|e| e.to_string())?;
                tracing::info!(
                    cutoff = cutoff,
                    logs = report.logs,
                    last_seen = report.last_seen,
                    geo = report.geo,
                    "Retention sweep finished"
                );
                Ok(())
            }
            LogTask::Close => Ok(()),
        }
    }

    async fn finish_lookup(&self, resolved: Result<LogEntry, JoinError>) {
        let result = match resolved {
            Ok(entry) => self.append(entry).await,
            Err(e) => Err(format!("geo lookup task failed: {e}")),
        };
        if let Err(e) = result {
            record_failure(&self.failures, &e);
        }
    }

    async fn append(&self, entry: LogEntry) -> Result<(), String> {
        let max_entries = self.config.load().access_log.max_entries;
        store::blocking(&self.store, move |s| s.append_log(&entry, max_entries).map(|_| ()))
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::entry::Action;
    use crate::store::{MemoryStore, UnavailableStore};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn config() -> Arc<ArcSwap<ProxyConfig>> {
        let mut config = ProxyConfig::default();
        config.geo.enabled = false;
        config.access_log.max_entries = 5;
        Arc::new(ArcSwap::from_pointee(config))
    }

    fn entry(ts: i64) -> LogEntry {
        LogEntry {
            ts,
            user: "ikun".into(),
            origin: "https://example.com".into(),
            status: 200,
            action: Action::Proxy,
            reason: "ok".into(),
            path: "/".into(),
            ip: "203.0.113.1".into(),
            city: String::new(),
            colo: String::new(),
            user_agent: String::new(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = Arc::new(MemoryStore::new());
        let logger = AccessLogger::spawn(store.clone(), config(), GeoResolver::new().unwrap());

        for ts in 0..8 {
            logger.record(entry(ts));
        }
        logger.shutdown().await;

        let rows = store.list_logs(100).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].entry.ts, 7);
        assert_eq!(logger.failures(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_touches_counted_once_each() {
        let store = Arc::new(MemoryStore::new());
        let logger = AccessLogger::spawn(store.clone(), config(), GeoResolver::new().unwrap());

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    logger.touch_last_seen(LastSeenUpdate {
                        user: "ikun".into(),
                        origin: "https://example.com".into(),
                        ts: i,
                        ip: String::new(),
                        colo: String::new(),
                    });
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        logger.shutdown().await;

        assert_eq!(store.list_last_seen(1).unwrap()[0].count, 100);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let store = Arc::new(MemoryStore::new());
        let logger = AccessLogger::spawn(store.clone(), config(), GeoResolver::new().unwrap());

        logger.record(entry(100));
        logger.record(entry(10_000));
        logger.sweep(5_000);
        logger.shutdown().await;

        let rows = store.list_logs(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.ts, 10_000);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let store = Arc::new(UnavailableStore::new("offline"));
        let logger = AccessLogger::spawn(store, config(), GeoResolver::new().unwrap());

        logger.record(entry(1));
        logger.sweep(0);
        logger.shutdown().await;
        assert_eq!(logger.failures(), 2);

        // Queue is closed now; further work is counted as failed.
        logger.record(entry(2));
        assert_eq!(logger.failures(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let logger = AccessLogger::spawn(store.clone(), config(), GeoResolver::new().unwrap());

        // The worker cannot run until this task yields.
        for ts in 0..(QUEUE_CAPACITY as i64 + 3) {
            logger.record(entry(ts));
        }
        assert_eq!(logger.failures(), 3);

        logger.shutdown().await;
        assert_eq!(store.list_logs(10).unwrap().len(), 5);
        assert_eq!(logger.failures(), 3);
    }

    /// Accepts connections and never answers.
    async fn silent_geo_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_stalled_geo_lookup_does_not_block_queue() {
        let mut proxy_config = ProxyConfig::default();
        proxy_config.geo.enabled = true;
        proxy_config.geo.endpoint = silent_geo_endpoint().await;
        proxy_config.geo.timeout_secs = 2;
        let config = Arc::new(ArcSwap::from_pointee(proxy_config));

        let store = Arc::new(MemoryStore::new());
        let logger = AccessLogger::spawn(store.clone(), config, GeoResolver::new().unwrap());

        logger.record(entry(1));
        logger.touch_last_seen(LastSeenUpdate {
            user: "ikun".into(),
            origin: "https://example.com".into(),
            ts: 1,
            ip: String::new(),
            colo: String::new(),
        });

        let touched = tokio::time::timeout(Duration::from_millis(1500), async {
            loop {
                if !store.list_last_seen(1).unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(touched.is_ok(), "last-seen update waited on the geo lookup");
        assert!(store.list_logs(10).unwrap().is_empty());

        // Shutdown waits for the lookup to time out, then writes the entry.
        logger.shutdown().await;
        let rows = store.list_logs(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.city, "");
        assert_eq!(logger.failures(), 0);
    }
}
