//! In-memory response cache for GET requests
//!
//! This module provides a TTL-bounded cache keyed by a request fingerprint.
//! Entries expire after the configured TTL and the cache never holds more than
//! its configured capacity; when full, the entry closest to expiry is dropped.

mod response_cache;

pub use response_cache::{fingerprint, CacheStats, ResponseCache};
