use std::{future::Future, sync::Arc, time::Instant};

use dashmap::{mapref::entry::Entry, DashMap};
use lru_cache::LruCache;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    config::{CacheBackend, CacheConfig},
    sts::Policy,
};

/// One cached policy. Live entries drive the decision layer directly;
/// expired entries stay around (until LRU eviction) as the witness for
/// conditional refreshes.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fetched_at: Instant,
    pub pol_id: String,
    pub pol_body: Arc<Policy>,
}

impl CacheEntry {
    pub fn new(pol_id: String, pol_body: Arc<Policy>) -> Self {
        Self {
            fetched_at: Instant::now(),
            pol_id,
            pol_body,
        }
    }

    pub fn is_live(&self) -> bool {
        self.fetched_at.elapsed().as_secs() <= self.pol_body.max_age
    }
}

/// Outcome of a refresh computation run under [`PolicyCache::get_or_compute`].
pub enum CacheUpdate {
    /// Publish this entry for the domain.
    Store(CacheEntry),
    /// Leave the cache untouched; the pre-existing entry (if any) stands.
    Keep,
}

/// Policy cache backends, selected by `cache.type`.
pub enum PolicyCache {
    Internal(InternalCache),
}

impl PolicyCache {
    pub fn new(config: &CacheConfig) -> Self {
        match config.backend {
            CacheBackend::Internal => {
                PolicyCache::Internal(InternalCache::new(config.options.cache_size))
            }
        }
    }

    pub fn get(&self, domain: &str) -> Option<CacheEntry> {
        match self {
            PolicyCache::Internal(cache) => cache.get(domain),
        }
    }

    pub fn set(&self, domain: String, entry: CacheEntry) {
        match self {
            PolicyCache::Internal(cache) => cache.set(domain, entry),
        }
    }

    pub async fn get_or_compute<F, Fut>(&self, domain: &str, compute: F) -> Option<CacheEntry>
    where
        F: FnOnce(Option<CacheEntry>) -> Fut,
        Fut: Future<Output = CacheUpdate>,
    {
        match self {
            PolicyCache::Internal(cache) => cache.get_or_compute(domain, compute).await,
        }
    }
}

pub struct InternalCache {
    entries: Mutex<LruCache<String, CacheEntry, ahash::RandomState>>,
    in_flight: DashMap<String, broadcast::Sender<Option<CacheEntry>>, ahash::RandomState>,
}

impl InternalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::with_hasher(capacity, ahash::RandomState::new())),
            in_flight: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn get(&self, domain: &str) -> Option<CacheEntry> {
        self.entries.lock().get_mut(domain).map(|entry| entry.clone())
    }

    pub fn set(&self, domain: String, entry: CacheEntry) {
        self.entries.lock().insert(domain, entry);
    }

    /// Runs `compute` with the current entry for `domain`, guaranteeing at
    /// most one concurrent computation per domain. Concurrent callers for
    /// the same domain await the leader's outcome instead of computing.
    pub async fn get_or_compute<F, Fut>(&self, domain: &str, compute: F) -> Option<CacheEntry>
    where
        F: FnOnce(Option<CacheEntry>) -> Fut,
        Fut: Future<Output = CacheUpdate>,
    {
        let subscription = match self.in_flight.entry(domain.to_string()) {
            Entry::Occupied(entry) => Some(entry.get().subscribe()),
            Entry::Vacant(slot) => {
                let (tx, _rx) = broadcast::channel(1);
                slot.insert(tx);
                None
            }
        };

        if let Some(mut rx) = subscription {
            return match rx.recv().await {
                Ok(entry) => entry,
                // The leader was cancelled before publishing; fall back to
                // whatever the cache holds now.
                Err(_) => self.get(domain),
            };
        }

        let mut flight = Flight {
            cache: self,
            domain,
            outcome: None,
        };
        let cached = self.get(domain);
        let entry = match compute(cached.clone()).await {
            CacheUpdate::Store(entry) => {
                self.set(domain.to_string(), entry.clone());
                Some(entry)
            }
            CacheUpdate::Keep => cached,
        };
        flight.outcome = Some(entry.clone());
        entry
    }
}

/// Clears the in-flight slot for its domain when the leading computation
/// finishes or is cancelled mid-await, waking any subscribers.
struct Flight<'a> {
    cache: &'a InternalCache,
    domain: &'a str,
    outcome: Option<Option<CacheEntry>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if let Some((_, tx)) = self.cache.in_flight.remove(self.domain) {
            if let Some(outcome) = self.outcome.take() {
                tx.send(outcome).ok();
            }
        }
    }
}
