//! Relational runner: the batch compatibility path.
//!
//! Builds the full generated query through the transpiler pipeline and
//! executes it against the document store, with a bounded TTL result cache
//! in front.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use fhirview_query::{EngineError, EngineResult, FilterMap, QueryBuilder, ViewDefinition};
use fhirview_store::StorePool;

use crate::result_cache::{fingerprint, ResultCache};
use crate::runner::{LastSql, Rows, ViewRunner};
use crate::stats::{CacheStats, RunnerStats, StatsRecorder};

/// Runner that executes generated relational queries.
pub struct RelationalRunner {
    pool: StorePool,
    builder: QueryBuilder,
    cache: ResultCache,
    cache_enabled: bool,
    stats: StatsRecorder,
    last_sql: Mutex<Option<String>>,
}

impl RelationalRunner {
    /// Create a runner with the given cache policy.
    pub fn new(pool: StorePool, cache_enabled: bool, cache_ttl: Duration) -> Self {
        info!(
            cache_enabled,
            cache_ttl_seconds = cache_ttl.as_secs(),
            "initialized relational runner"
        );
        Self {
            pool,
            builder: QueryBuilder::new(),
            cache: ResultCache::new(cache_ttl),
            cache_enabled,
            stats: StatsRecorder::default(),
            last_sql: Mutex::new(None),
        }
    }

    /// Result-cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats(self.cache_enabled)
    }

    /// Drop all cached results and reset cache counters.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl ViewRunner for RelationalRunner {
    async fn execute(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<Rows> {
        let view_name = def.name.as_str();

        let cache_key = self.cache_enabled.then(|| fingerprint(def, filters, cap));
        if let Some(key) = &cache_key {
            if let Some(rows) = self.cache.get(key) {
                info!(view = view_name, rows = rows.len(), "result cache hit");
                return Ok(rows);
            }
            debug!(view = view_name, "result cache miss");
        }

        let plan = self.builder.build(def, filters, cap)?;
        let sql = plan.render();
        debug!(view = view_name, columns = plan.columns.len(), "built relational query");
        *self.last_sql.lock() = Some(sql.clone());

        let started = Instant::now();
        let conn = self.pool.get().await.map_err(EngineError::from)?;
        let rows = conn.query_json(&sql, &[]).await.map_err(EngineError::from)?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record(elapsed_ms);
        info!(
            view = view_name,
            rows = rows.len(),
            elapsed_ms = format!("{elapsed_ms:.1}"),
            "relational query completed"
        );

        if let Some(key) = cache_key {
            self.cache.put(key, rows.clone());
        }

        Ok(rows)
    }

    async fn execute_count(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
    ) -> EngineResult<u64> {
        let plan = self.builder.build(def, filters, None)?;
        let sql = plan.render_count();
        *self.last_sql.lock() = Some(sql.clone());

        let started = Instant::now();
        let conn = self.pool.get().await.map_err(EngineError::from)?;
        let row = conn.query_one(&sql, &[]).await.map_err(EngineError::from)?;
        let count: i64 = row
            .try_get("count")
            .map_err(|e| EngineError::fatal(format!("count result: {e}")))?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record(elapsed_ms);
        info!(view = %def.name, count, elapsed_ms = format!("{elapsed_ms:.1}"), "count query completed");

        Ok(count.max(0) as u64)
    }

    fn runner_type(&self) -> &'static str {
        "relational"
    }

    fn statistics(&self) -> RunnerStats {
        self.stats.snapshot(self.runner_type())
    }
}

impl LastSql for RelationalRunner {
    fn last_executed_sql(&self) -> Option<String> {
        self.last_sql.lock().clone()
    }
}
