//! Serving layer: the hybrid runner.
//!
//! Fans each request out across the batch and speed layers: the batch side
//! routes to the materialized runner when the target view exists (falling
//! back to the relational runner on any failure), and the recent-writes
//! side runs in parallel when enabled. The batch result is authoritative;
//! the speed result is reported through statistics and logs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fhirview_cache::CacheClient;
use fhirview_query::{infer_schema, ColumnType, EngineResult, FilterMap, ViewDefinition};
use fhirview_store::StorePool;

use crate::materialized::MaterializedViewRunner;
use crate::relational::RelationalRunner;
use crate::runner::{LastSql, Rows, ViewRunner};
use crate::speed::{SpeedLayerRunner, SpeedResult};
use crate::stats::{RunnerStats, ServingStats};

#[derive(Debug, Default)]
struct ServingCounters {
    materialized_queries: u64,
    relational_queries: u64,
    speed_layer_queries: u64,
    fallbacks: u64,
}

/// The serving-layer runner.
pub struct HybridRunner {
    materialized: MaterializedViewRunner,
    relational: RelationalRunner,
    speed: Option<SpeedLayerRunner>,
    view_exists: Mutex<HashMap<String, bool>>,
    counters: Mutex<ServingCounters>,
}

impl HybridRunner {
    /// Create the serving layer.
    ///
    /// `speed_cache` enables the recent-writes layer; pass `None` to serve
    /// batch-only.
    pub fn new(
        pool: StorePool,
        speed_cache: Option<CacheClient>,
        cache_enabled: bool,
        cache_ttl: Duration,
    ) -> Self {
        let speed = speed_cache.map(SpeedLayerRunner::new);
        info!(
            speed_layer = speed.is_some(),
            cache_enabled, "initialized hybrid runner"
        );

        Self {
            materialized: MaterializedViewRunner::new(pool.clone()),
            relational: RelationalRunner::new(pool, cache_enabled, cache_ttl),
            speed,
            view_exists: Mutex::new(HashMap::new()),
            counters: Mutex::new(ServingCounters::default()),
        }
    }

    /// Whether the recent-writes layer is active.
    pub fn speed_layer_enabled(&self) -> bool {
        self.speed.is_some()
    }

    /// The underlying recent-writes runner, when enabled.
    pub fn speed_runner(&self) -> Option<&SpeedLayerRunner> {
        self.speed.as_ref()
    }

    /// Output schema for a view definition.
    pub fn get_schema(&self, def: &ViewDefinition) -> IndexMap<String, ColumnType> {
        infer_schema(def)
    }

    /// Clear the view-existence cache. Must be called after materialized
    /// views are created, dropped, or renamed.
    pub fn clear_view_cache(&self) {
        self.view_exists.lock().clear();
        info!("cleared view existence cache");
    }

    /// Drop the relational runner's cached results.
    pub fn clear_result_cache(&self) {
        self.relational.clear_cache();
    }

    /// Serving statistics across layers.
    pub fn serving_statistics(&self) -> ServingStats {
        let counters = self.counters.lock();
        let total = counters.materialized_queries + counters.relational_queries;
        let materialized_percentage = if total > 0 {
            counters.materialized_queries as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        ServingStats {
            runner_type: "hybrid".to_string(),
            total_queries: total,
            materialized_queries: counters.materialized_queries,
            relational_queries: counters.relational_queries,
            speed_layer_queries: counters.speed_layer_queries,
            fallbacks: counters.fallbacks,
            materialized_percentage,
            speed_layer_enabled: self.speed.is_some(),
            views_cached: self.view_exists.lock().len(),
            materialized: self.materialized.statistics(),
            relational: self.relational.statistics(),
            relational_cache: self.relational.cache_stats(),
        }
    }

    /// Check whether the target materialized view exists, caching positive
    /// and negative answers until the cache is invalidated. Probe failures
    /// are not cached.
    async fn check_view_exists(&self, view_name: &str) -> bool {
        if let Some(&exists) = self.view_exists.lock().get(view_name) {
            return exists;
        }

        match self.materialized.view_exists(view_name).await {
            Ok(exists) => {
                self.view_exists
                    .lock()
                    .insert(view_name.to_string(), exists);
                exists
            }
            Err(e) => {
                warn!(view = view_name, error = %e, "view existence check failed");
                false
            }
        }
    }

    /// Run the batch layer: materialized when available, relational
    /// otherwise, and relational again as fallback when the materialized
    /// path fails for any reason.
    async fn execute_batch_layer(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
        view_exists: bool,
    ) -> EngineResult<Rows> {
        if view_exists {
            debug!(view = %def.name, "batch layer: materialized path");
            let result = self.materialized.execute(def, filters, cap).await;
            self.counters.lock().materialized_queries += 1;

            match result {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    warn!(view = %def.name, error = %e, "materialized runner failed, falling back");
                    self.counters.lock().fallbacks += 1;
                }
            }
        } else {
            debug!(view = %def.name, "batch layer: relational path");
        }

        let result = self.relational.execute(def, filters, cap).await;
        self.counters.lock().relational_queries += 1;
        result
    }

    async fn query_speed_layer(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> Option<EngineResult<SpeedResult>> {
        let speed = self.speed.as_ref()?;
        let result = speed.execute(def, filters, cap, None).await;
        self.counters.lock().speed_layer_queries += 1;
        Some(result)
    }
}

#[async_trait]
impl ViewRunner for HybridRunner {
    async fn execute(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<Rows> {
        let view_exists = self.check_view_exists(&def.name).await;

        // The batch query is initiated first; the speed query runs in
        // parallel and both complete before we return.
        let (batch, speed) = tokio::join!(
            self.execute_batch_layer(def, filters, cap, view_exists),
            self.query_speed_layer(def, filters, cap),
        );

        let rows = batch?;

        match speed {
            Some(Ok(result)) if result.total_count > 0 => {
                info!(
                    view = %def.name,
                    batch_rows = rows.len(),
                    speed_patients = result.total_count,
                    "merge summary: batch rows returned, speed-layer subjects observed"
                );
            }
            Some(Err(e)) => {
                warn!(view = %def.name, error = %e, "speed layer query failed, using batch only");
            }
            _ => {}
        }

        Ok(rows)
    }

    async fn execute_count(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
    ) -> EngineResult<u64> {
        // Count operations never consult the recent-writes layer.
        if self.check_view_exists(&def.name).await {
            let result = self.materialized.execute_count(def, filters).await;
            self.counters.lock().materialized_queries += 1;

            match result {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!(view = %def.name, error = %e, "materialized count failed, falling back");
                    self.counters.lock().fallbacks += 1;
                }
            }
        }

        let result = self.relational.execute_count(def, filters).await;
        self.counters.lock().relational_queries += 1;
        result
    }

    fn runner_type(&self) -> &'static str {
        "hybrid"
    }

    fn statistics(&self) -> RunnerStats {
        let serving = self.serving_statistics();
        RunnerStats {
            runner_type: "hybrid".to_string(),
            total_queries: serving.total_queries,
            total_execution_time_ms: serving.materialized.total_execution_time_ms
                + serving.relational.total_execution_time_ms,
            average_execution_time_ms: if serving.total_queries > 0 {
                (serving.materialized.total_execution_time_ms
                    + serving.relational.total_execution_time_ms)
                    / serving.total_queries as f64
            } else {
                0.0
            },
        }
    }
}

impl LastSql for HybridRunner {
    fn last_executed_sql(&self) -> Option<String> {
        self.materialized
            .last_executed_sql()
            .or_else(|| self.relational.last_executed_sql())
    }
}
