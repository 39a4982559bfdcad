//! Bounded TTL cache for best-effort lookups

use dashmap::DashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Result;

#[derive(Clone)]
struct CachedValue<V> {
    value: V,
    cached_at: Instant,
}

/// String-keyed cache with expiry and a size cap
///
/// When full, expired entries are purged first, then the oldest entry goes.
pub struct TtlCache<V> {
    entries: DashMap<String, CachedValue<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let hit = self.entries.get(key).map(|entry| {
            let fresh = now.saturating_duration_since(entry.cached_at) <= self.ttl;
            (fresh, entry.value.clone())
        });

        match hit {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&self, key: &str, value: V, now: Instant) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.entries
                .retain(|_, entry| now.saturating_duration_since(entry.cached_at) <= self.ttl);

            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.cached_at)
                    .map(|entry| entry.key().clone());
                if let Some(oldest) = oldest {
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(
            key.to_string(),
            CachedValue {
                value,
                cached_at: now,
            },
        );
    }

    /// Cached value, or fetch and remember it; fetch errors are not cached
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
