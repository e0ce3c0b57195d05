//! Cached view of the direct-download domain list.
//!
//! Redirects to these hosts are handed to the client instead of being
//! followed. The list changes rarely, so it is read from the store at most
//! once per TTL; an admin write replaces the snapshot immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::store::{self, Store};

struct Snapshot {
    domains: Arc<Vec<String>>,
    loaded_at: Option<Instant>,
}

pub struct DirectDomainCache {
    ttl: Duration,
    current: ArcSwap<Snapshot>,
}

impl DirectDomainCache {
    /// Starts empty and stale, so the first lookup reads the store.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: ArcSwap::from_pointee(Snapshot {
                domains: Arc::new(store::default_direct_domains()),
                loaded_at: None,
            }),
        }
    }

    /// Current list, reloading from `store` when the snapshot has expired.
    ///
    /// A failed reload keeps serving the previous snapshot.
    pub async fn refresh_if_stale(&self, store: &Arc<dyn Store>) -> Arc<Vec<String>> {
        let snapshot = self.current.load_full();
        let fresh = snapshot
            .loaded_at
            .is_some_and(|at| at.elapsed() < self.ttl);
        if fresh {
            return snapshot.domains.clone();
        }

        match store::blocking(store, |s| store::direct_domains(s)).await {
            Ok(domains) => self.replace(domains),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reload direct domains, keeping previous list");
                snapshot.domains.clone()
            }
        }
    }

    /// Install a new list, e.g. right after an admin update.
    pub fn replace(&self, domains: Vec<String>) -> Arc<Vec<String>> {
        let domains = Arc::new(domains);
        self.current.store(Arc::new(Snapshot {
            domains: domains.clone(),
            loaded_at: Some(Instant::now()),
        }));
        domains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UnavailableStore};

    fn shared() -> (Arc<MemoryStore>, Arc<dyn Store>) {
        let store = Arc::new(MemoryStore::new());
        let dynamic: Arc<dyn Store> = store.clone();
        (store, dynamic)
    }

    fn set(store: &MemoryStore, domains: &[&str]) {
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        store::set_direct_domains(store, &domains).unwrap();
    }

    #[tokio::test]
    async fn test_first_lookup_reads_store() {
        let (store, shared) = shared();
        set(&store, &["example.net"]);

        let cache = DirectDomainCache::new(Duration::from_secs(60));
        assert_eq!(*cache.refresh_if_stale(&shared).await, vec!["example.net"]);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_skips_store() {
        let (store, shared) = shared();
        set(&store, &["a.example"]);
        let cache = DirectDomainCache::new(Duration::from_secs(60));
        cache.refresh_if_stale(&shared).await;

        set(&store, &["b.example"]);
        assert_eq!(*cache.refresh_if_stale(&shared).await, vec!["a.example"]);

        cache.replace(vec!["b.example".to_string()]);
        assert_eq!(*cache.refresh_if_stale(&shared).await, vec!["b.example"]);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let (store, shared) = shared();
        let cache = DirectDomainCache::new(Duration::ZERO);
        set(&store, &["a.example"]);
        cache.refresh_if_stale(&shared).await;
        set(&store, &["b.example"]);
        assert_eq!(*cache.refresh_if_stale(&shared).await, vec!["b.example"]);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_previous_list() {
        let cache = DirectDomainCache::new(Duration::ZERO);
        let down: Arc<dyn Store> = Arc::new(UnavailableStore::new("down"));
        let domains = cache.refresh_if_stale(&down).await;
        assert!(domains.iter().any(|d| d == "115.com"));
    }
}
