//! TTL cache of normalized responses
//!
//! Provides a `ResponseCache` that stores [`Response`] values under a request
//! fingerprint, with hit/miss counters for observability.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::http::{Method, Response};

/// A cached response with its expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The cached response, including its original timestamp
    response: Response,
    /// When the entry stops being served
    expires_at: Instant,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries currently held
    pub size: usize,
    /// Maximum number of entries
    pub max_size: usize,
    /// Time-to-live applied to new entries
    pub ttl: Duration,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
}

/// Bounded, TTL-based cache of responses
///
/// Expired entries are never returned; they are dropped lazily on lookup and
/// whenever an insert needs room.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache holding up to `capacity` entries for `ttl` each
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a fresh cached response for `key`, counting a hit or a miss
    pub fn get(&self, key: &str) -> Option<Response> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let fresh = match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };

        match fresh {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `response` under `key` for the cache TTL
    pub fn insert(&self, key: String, response: Response) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let soonest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(evicted) = soonest {
                entries.remove(&evicted);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; hit/miss counters are kept
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max_size: self.capacity,
            ttl: self.ttl,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Computes the cache key of a request
///
/// The key covers the method, the URL as given, and the sorted params and
/// headers, hashed with SHA-256.
pub fn fingerprint(
    method: Method,
    url: &str,
    params: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    for (key, value) in params {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"&");
    }
    hasher.update(b"\n");
    for (name, value) in headers {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
