//! Bounded TTL cache for relational query results.
//!
//! Keys are deterministic fingerprints of everything that shapes a result:
//! view name, kind, filters, cap, the view's predicates, and a hash of the
//! select tree. Expiry is lazy, checked on lookup; `clear` drops entries and
//! counters atomically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use fhirview_query::{FilterMap, ViewDefinition};

use crate::runner::Rows;
use crate::stats::CacheStats;

/// Compute the cache fingerprint for one query shape.
pub fn fingerprint(def: &ViewDefinition, filters: &FilterMap, cap: Option<u64>) -> String {
    let select_json =
        serde_json::to_string(&def.select).unwrap_or_default();
    let select_hash = hex_digest(select_json.as_bytes());

    let where_paths: Vec<&str> = def.where_.iter().map(|w| w.path.as_str()).collect();
    let filters_json = serde_json::to_string(filters).unwrap_or_default();

    let key = format!(
        "postgres|{}|{}|{}|{:?}|{:?}|{}",
        def.name,
        def.resource_kind(),
        filters_json,
        cap,
        where_paths,
        select_hash,
    );
    hex_digest(key.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, (Instant, Rows)>,
    hits: u64,
    misses: u64,
}

/// In-process TTL cache over query results.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    /// Create a cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a fingerprint, updating hit/miss counters. Expired entries
    /// are evicted on the spot and count as misses.
    pub fn get(&self, key: &str) -> Option<Rows> {
        let mut inner = self.inner.lock();

        match inner.entries.get(key) {
            Some((stored_at, _)) if stored_at.elapsed() > self.ttl => {
                inner.entries.remove(key);
                inner.misses += 1;
                debug!(key, "cache entry expired");
                None
            }
            Some((_, rows)) => {
                let rows = rows.clone();
                inner.hits += 1;
                Some(rows)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a result under its fingerprint.
    pub fn put(&self, key: String, rows: Rows) {
        let mut inner = self.inner.lock();
        inner.entries.insert(key, (Instant::now(), rows));
        debug!(size = inner.entries.len(), "cached query result");
    }

    /// Drop all entries and reset counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let size = inner.entries.len();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        debug!(removed = size, "result cache cleared");
    }

    /// Snapshot cache statistics.
    pub fn stats(&self, enabled: bool) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            enabled,
            ttl_seconds: self.ttl.as_secs(),
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate_percent: (hit_rate * 100.0).round() / 100.0,
        }
    }
}
