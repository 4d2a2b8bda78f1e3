//! Async client for the recent-writes cache.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::entry::{cache_key, kind_pattern, CachedResource};
use crate::error::{CacheError, CacheResult};

/// Client over the recent-writes key/value store.
///
/// Connections multiplex through a [`ConnectionManager`], so the client is
/// cheap to clone and share.
#[derive(Clone)]
pub struct CacheClient {
    manager: ConnectionManager,
    config: CacheConfig,
}

impl CacheClient {
    /// Connect using the given configuration.
    pub async fn connect(config: CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = client.get_connection_manager().await?;

        info!(url = %config.url, "connected to recent-writes cache");
        Ok(Self { manager, config })
    }

    /// The active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn deadlined<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(
                self.config.command_timeout.as_millis() as u64,
            )),
        }
    }

    /// Cache a document under its kind's TTL.
    pub async fn set_resource(&self, kind: &str, id: &str, resource: Value) -> CacheResult<()> {
        let key = cache_key(kind, id);
        let entry = CachedResource::new(kind, resource);
        let payload = serde_json::to_string(&entry)
            .map_err(|e| CacheError::serialization(format!("encoding entry '{key}': {e}")))?;

        let ttl_seconds = self.config.ttl_hours_for(kind) * 3600;
        let mut conn = self.manager.clone();

        self.deadlined(async move {
            conn.set_ex::<_, _, ()>(&key, payload, ttl_seconds).await
        })
        .await?;

        debug!(kind, id, ttl_seconds, "cached recent write");
        Ok(())
    }

    /// Fetch a cached document body, if present.
    pub async fn get_resource(&self, kind: &str, id: &str) -> CacheResult<Option<Value>> {
        Ok(self.get_entry(kind, id).await?.map(|entry| entry.resource))
    }

    /// Fetch a cached entry with its write metadata.
    pub async fn get_entry(&self, kind: &str, id: &str) -> CacheResult<Option<CachedResource>> {
        let key = cache_key(kind, id);
        let mut conn = self.manager.clone();

        let payload: Option<String> = self
            .deadlined(async move { conn.get(&key).await })
            .await?;

        match payload {
            Some(payload) => {
                let entry = serde_json::from_str(&payload).map_err(|e| {
                    CacheError::serialization(format!("decoding entry for {kind}/{id}: {e}"))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Scan for documents of one kind written at or after `since`.
    ///
    /// Results are capped at the configured maximum; entries that fail to
    /// decode are skipped with a warning.
    pub async fn scan_recent(
        &self,
        kind: &str,
        since: Option<DateTime<Utc>>,
    ) -> CacheResult<Vec<Value>> {
        let pattern = kind_pattern(kind);
        let mut resources = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut conn = self.manager.clone();
            let batch = self.config.scan_batch_size;
            let scan_pattern = pattern.clone();

            let (next, keys): (u64, Vec<String>) = self
                .deadlined(async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&scan_pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            for key in keys {
                if resources.len() >= self.config.max_scan_results {
                    warn!(
                        kind,
                        max = self.config.max_scan_results,
                        "scan hit the result cap, truncating"
                    );
                    return Ok(resources);
                }

                let mut conn = self.manager.clone();
                let lookup_key = key.clone();
                let payload: Option<String> = self
                    .deadlined(async move { conn.get(&lookup_key).await })
                    .await?;
                let Some(payload) = payload else { continue };

                let entry: CachedResource = match serde_json::from_str(&payload) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(key = %key, error = %e, "skipping undecodable cache entry");
                        continue;
                    }
                };

                if let Some(since) = since {
                    if entry.cached_at < since {
                        continue;
                    }
                }

                resources.push(entry.resource);
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(kind, count = resources.len(), "scanned recent writes");
        Ok(resources)
    }

    /// Remove a cached document.
    pub async fn delete_resource(&self, kind: &str, id: &str) -> CacheResult<bool> {
        let key = cache_key(kind, id);
        let mut conn = self.manager.clone();

        let removed: i64 = self
            .deadlined(async move { conn.del(&key).await })
            .await?;
        Ok(removed > 0)
    }

    /// Flush the whole cache database. Administrative use only.
    pub async fn flush_all(&self) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let _: () = self
            .deadlined(async move { redis::cmd("FLUSHDB").query_async(&mut conn).await })
            .await?;
        info!("recent-writes cache flushed");
        Ok(())
    }
}
