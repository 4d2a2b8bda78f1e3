//! Recent-writes ingestor.
//!
//! Polls the document store for documents updated after a watermark and
//! writes them into the recent-writes cache with per-kind TTLs. The
//! watermark only advances after a fully successful sweep, so a failed
//! sweep is retried over the same window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use fhirview_cache::CacheClient;
use fhirview_query::EngineResult;
use fhirview_store::{catalog, StorePool};

/// Kinds polled by default.
pub const DEFAULT_KINDS: [&str; 3] = ["Patient", "Condition", "Observation"];
/// Documents fetched per kind per sweep.
const SWEEP_LIMIT: i64 = 100;
/// Backoff after a failed sweep.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Counts from one ingest sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Documents cached per kind, in poll order.
    pub cached_per_kind: Vec<(String, usize)>,
    /// Total documents cached.
    pub total_cached: usize,
}

/// Polls the store and feeds the recent-writes cache.
pub struct RecentWritesIngestor {
    pool: StorePool,
    cache: CacheClient,
    kinds: Vec<String>,
    poll_interval: Duration,
    watermark: Mutex<DateTime<Utc>>,
    shutdown: Arc<Notify>,
}

impl RecentWritesIngestor {
    /// Create an ingestor polling the default kinds every five minutes,
    /// starting 24 hours back.
    pub fn new(pool: StorePool, cache: CacheClient) -> Self {
        Self {
            pool,
            cache,
            kinds: DEFAULT_KINDS.iter().map(|k| k.to_string()).collect(),
            poll_interval: Duration::from_secs(5 * 60),
            watermark: Mutex::new(Utc::now() - chrono::Duration::hours(24)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Override the polled kinds.
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle that stops the polling loop after its current iteration.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// The current watermark.
    pub fn watermark(&self) -> DateTime<Utc> {
        *self.watermark.lock()
    }

    /// Run one sweep: fetch updates per kind since the watermark, cache
    /// them, and advance the watermark.
    pub async fn sweep(&self) -> EngineResult<SweepOutcome> {
        let since = self.watermark();
        let sweep_started = Utc::now();
        info!(%since, "polling document store for recent writes");

        let conn = self.pool.get().await?;
        let mut outcome = SweepOutcome::default();

        for kind in &self.kinds {
            let resources = catalog::recent_resources(&conn, kind, since, SWEEP_LIMIT).await?;
            let mut cached = 0usize;

            for resource in resources {
                match resource_id(&resource) {
                    Some(id) => {
                        self.cache.set_resource(kind, &id, resource).await?;
                        cached += 1;
                    }
                    None => warn!(kind, "skipping document without an id"),
                }
            }

            outcome.total_cached += cached;
            outcome.cached_per_kind.push((kind.clone(), cached));
        }

        *self.watermark.lock() = sweep_started;
        info!(
            total = outcome.total_cached,
            per_kind = ?outcome.cached_per_kind,
            "recent writes cached"
        );
        Ok(outcome)
    }

    /// Poll until the shutdown handle is notified. A failed sweep logs and
    /// retries after a short backoff without advancing the watermark.
    pub async fn run(&self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            kinds = ?self.kinds,
            "recent-writes ingestor started"
        );

        loop {
            let delay = match self.sweep().await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    error!(error = %e, "ingest sweep failed");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {
                    info!("recent-writes ingestor stopping");
                    break;
                }
            }
        }
    }
}

fn resource_id(resource: &Value) -> Option<String> {
    resource
        .get("id")
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
