use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::models::SearchRequest;

pub struct SearchCache<T> {
    cache: Mutex<LruCache<String, (T, Instant)>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

impl<T> SearchCache<T> {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl: Duration::from_secs(ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<T>
    where
        T: Clone,
    {
        let mut cache = self.cache.lock();
        let fresh = cache
            .get(key)
            .map(|(value, stored)| (stored.elapsed() < self.ttl).then(|| value.clone()));
        match fresh {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                cache.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: T) {
        self.cache.lock().put(key.to_string(), (value, Instant::now()));
    }

    /// SHA-256 over every request field that changes the ranking.
    pub fn make_key(request: &SearchRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.query.as_bytes());
        if let Some(embedding) = &request.query_embedding {
            for v in embedding {
                hasher.update(v.to_le_bytes());
            }
        }
        hasher.update(request.limit.to_string().as_bytes());
        hasher.update(request.context_type.to_string().as_bytes());
        if let Some(filter) = request.source_filter {
            hasher.update(filter.to_string().as_bytes());
        }
        hasher.update([
            request.use_graph as u8,
            request.use_rerank as u8,
            request.use_expand as u8,
        ]);
        hasher.update(request.graph_weight.to_le_bytes());
        hasher.update(request.max_hops.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };

        CacheStats {
            hits,
            misses,
            size: self.cache.lock().len(),
            hit_rate,
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
