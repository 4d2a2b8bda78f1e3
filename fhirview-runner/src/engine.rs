//! Engine facade.
//!
//! Wires configuration, the store pool, the recent-writes cache, the view
//! registry, the runner hierarchy, and the lifecycle services into the API
//! surface consumed by callers (and by the admin CLI).

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use fhirview_cache::{CacheClient, CacheConfig};
use fhirview_query::{
    infer_schema, Aggregation, CodedFilter, ColumnType, EngineError, EngineResult, FilterMap,
    JoinQuery, JoinQueryBuilder, ViewDefinition, ViewDefinitionRegistry,
};
use fhirview_store::{catalog, StoreConfig, StorePool, StoreStats};

use crate::config::{EngineConfig, RunnerKind};
use crate::hybrid::HybridRunner;
use crate::ingest::RecentWritesIngestor;
use crate::materialized::MaterializedViewRunner;
use crate::refresh::RefreshPipeline;
use crate::relational::RelationalRunner;
use crate::runner::{LastSql, Rows, ViewRunner};
use crate::service::{
    MaterializedViewService, RefreshOutcome, RefreshSummary, StaleCheckSummary, ViewInfo,
    ViewStatusReport,
};
use crate::speed::{project_rows, SpeedLayerRunner};
use crate::validate::{IntegrityReport, IntegrityValidator};

/// Result of executing one view.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutput {
    /// The executed view.
    pub view_name: String,
    /// Document kind projected.
    pub resource_type: String,
    /// Number of rows returned.
    pub row_count: usize,
    /// The rows, in projection order.
    pub rows: Rows,
    /// Output schema.
    pub schema: IndexMap<String, ColumnType>,
    /// The SQL that produced the rows, when the active runner records it.
    pub generated_sql: Option<String>,
}

/// Engine health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether a store round-trip succeeded.
    pub store_healthy: bool,
    /// Idle pool connections.
    pub pool_available: usize,
    /// Current pool size.
    pub pool_size: usize,
    /// Maximum pool size.
    pub pool_max_size: usize,
    /// Store statistics, when the store is reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_stats: Option<StoreStatsReport>,
    /// Whether the recent-writes layer is connected.
    pub speed_layer_connected: bool,
    /// Active runner kind.
    pub runner: RunnerKind,
}

/// Serializable slice of the store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsReport {
    /// Live resources by kind (top 10).
    pub resource_counts: IndexMap<String, i64>,
    /// Total live resources.
    pub total_resources: i64,
    /// Database size in megabytes.
    pub database_size_mb: i64,
}

impl From<StoreStats> for StoreStatsReport {
    fn from(stats: StoreStats) -> Self {
        Self {
            resource_counts: stats.resource_counts,
            total_resources: stats.total_resources,
            database_size_mb: stats.database_size_mb,
        }
    }
}

enum EngineRunner {
    Hybrid(HybridRunner),
    Materialized(MaterializedViewRunner),
    Relational(RelationalRunner),
    Speed(SpeedLayerRunner),
}

/// The analytics engine.
pub struct AnalyticsEngine {
    config: EngineConfig,
    pool: StorePool,
    registry: ViewDefinitionRegistry,
    runner: EngineRunner,
    service: Arc<MaterializedViewService>,
    join_planner: JoinQueryBuilder,
    speed_cache: Option<CacheClient>,
}

impl AnalyticsEngine {
    /// Build the engine from configuration.
    ///
    /// The store pool is created eagerly; the recent-writes cache is
    /// connected when the configuration calls for it. A cache connection
    /// failure disables the speed layer with a warning unless the runner is
    /// recent-writes-only, in which case it is fatal.
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        let pool = StorePool::connect(StoreConfig::from_url(&config.store_url)?)?;
        let registry = ViewDefinitionRegistry::open(&config.view_defs_dir)?;

        let wants_cache = config.runner == RunnerKind::InMemory
            || (config.runner == RunnerKind::Hybrid && config.speed_layer_enabled);
        let speed_cache = if wants_cache {
            let mut cache_config = CacheConfig::from_env();
            cache_config.url = config.cache_url.clone();
            match CacheClient::connect(cache_config).await {
                Ok(client) => Some(client),
                Err(e) if config.runner == RunnerKind::InMemory => {
                    return Err(EngineError::fatal(format!(
                        "recent-writes cache unavailable: {e}"
                    )));
                }
                Err(e) => {
                    warn!(error = %e, "recent-writes cache unavailable, serving batch only");
                    None
                }
            }
        } else {
            None
        };

        let runner = match config.runner {
            RunnerKind::Hybrid => EngineRunner::Hybrid(HybridRunner::new(
                pool.clone(),
                speed_cache.clone(),
                config.query_cache_enabled,
                config.query_cache_ttl,
            )),
            RunnerKind::Materialized => {
                EngineRunner::Materialized(MaterializedViewRunner::new(pool.clone()))
            }
            RunnerKind::Postgres => EngineRunner::Relational(RelationalRunner::new(
                pool.clone(),
                config.query_cache_enabled,
                config.query_cache_ttl,
            )),
            RunnerKind::InMemory => {
                let cache = speed_cache.clone().ok_or_else(|| {
                    EngineError::fatal("recent-writes cache required for in_memory runner")
                })?;
                EngineRunner::Speed(SpeedLayerRunner::new(cache))
            }
        };

        info!(runner = config.runner.as_str(), "analytics engine initialized");

        Ok(Self {
            service: Arc::new(MaterializedViewService::new(pool.clone())),
            pool,
            registry,
            runner,
            join_planner: JoinQueryBuilder::default(),
            speed_cache,
            config,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The view-definition registry.
    pub fn registry(&self) -> &ViewDefinitionRegistry {
        &self.registry
    }

    /// Execute a view by name.
    pub async fn execute(
        &self,
        view_name: &str,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<ExecuteOutput> {
        let def = self.registry.load(view_name)?;
        let rows = self.execute_def(&def, filters, cap).await?;

        Ok(ExecuteOutput {
            view_name: def.name.clone(),
            resource_type: def.resource_kind().to_string(),
            row_count: rows.len(),
            schema: infer_schema(&def),
            generated_sql: self.get_last_executed_sql(),
            rows,
        })
    }

    async fn execute_def(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<Rows> {
        match &self.runner {
            EngineRunner::Hybrid(runner) => runner.execute(def, filters, cap).await,
            EngineRunner::Materialized(runner) => runner.execute(def, filters, cap).await,
            EngineRunner::Relational(runner) => runner.execute(def, filters, cap).await,
            EngineRunner::Speed(runner) => {
                let result = runner.execute(def, filters, cap, None).await?;
                Ok(project_rows(def, &result.resources))
            }
        }
    }

    /// Execute several views under one filter map, collecting per-view
    /// results or errors without aborting the batch.
    pub async fn execute_batch(
        &self,
        view_names: &[String],
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> IndexMap<String, EngineResult<ExecuteOutput>> {
        let mut results = IndexMap::with_capacity(view_names.len());
        for name in view_names {
            results.insert(name.clone(), self.execute(name, filters, cap).await);
        }
        results
    }

    /// Count the rows a view would produce.
    pub async fn count(&self, view_name: &str, filters: &FilterMap) -> EngineResult<u64> {
        let def = self.registry.load(view_name)?;

        match &self.runner {
            EngineRunner::Hybrid(runner) => runner.execute_count(&def, filters).await,
            EngineRunner::Materialized(runner) => runner.execute_count(&def, filters).await,
            EngineRunner::Relational(runner) => runner.execute_count(&def, filters).await,
            EngineRunner::Speed(runner) => {
                let result = runner.execute(&def, filters, None, None).await?;
                Ok(result.total_count as u64)
            }
        }
    }

    /// Output schema for a view.
    pub fn schema(&self, view_name: &str) -> EngineResult<IndexMap<String, ColumnType>> {
        Ok(infer_schema(&self.registry.load(view_name)?))
    }

    /// SQL recorded by the most recent batch query, when available.
    pub fn get_last_executed_sql(&self) -> Option<String> {
        match &self.runner {
            EngineRunner::Hybrid(runner) => runner.last_executed_sql(),
            EngineRunner::Materialized(runner) => runner.last_executed_sql(),
            EngineRunner::Relational(runner) => runner.last_executed_sql(),
            EngineRunner::Speed(_) => None,
        }
    }

    /// Runner statistics as a JSON document.
    pub fn statistics(&self) -> Value {
        match &self.runner {
            EngineRunner::Hybrid(runner) => {
                serde_json::to_value(runner.serving_statistics()).unwrap_or(Value::Null)
            }
            EngineRunner::Materialized(runner) => {
                serde_json::to_value(runner.statistics()).unwrap_or(Value::Null)
            }
            EngineRunner::Relational(runner) => {
                serde_json::to_value(runner.statistics()).unwrap_or(Value::Null)
            }
            EngineRunner::Speed(runner) => {
                serde_json::to_value(runner.statistics()).unwrap_or(Value::Null)
            }
        }
    }

    /// Invalidate the serving layer's view-existence cache.
    pub fn clear_view_cache(&self) {
        if let EngineRunner::Hybrid(runner) = &self.runner {
            runner.clear_view_cache();
        }
    }

    // ---- view definitions ------------------------------------------------

    /// List all view definitions.
    pub fn list_view_definitions(&self) -> EngineResult<Vec<ViewDefinition>> {
        self.registry.load_all()
    }

    /// Load one view definition.
    pub fn get_view_definition(&self, name: &str) -> EngineResult<ViewDefinition> {
        self.registry.load(name)
    }

    /// Save a view definition.
    pub fn create_view_definition(&self, def: &ViewDefinition) -> EngineResult<()> {
        self.registry.save(def, None)
    }

    /// Delete a view definition.
    pub fn delete_view_definition(&self, name: &str) -> EngineResult<()> {
        self.registry.delete(name)
    }

    // ---- cohort queries --------------------------------------------------

    /// Count distinct subjects matching a multi-view cohort filter.
    pub async fn cohort_count(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
    ) -> EngineResult<(u64, JoinQuery)> {
        let query = self.join_planner.build_count(views, filters, coded);
        let conn = self.pool.get().await?;
        let row = conn.query_one(&query.sql, &[]).await?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| EngineError::fatal(format!("cohort count result: {e}")))?;
        Ok((count.max(0) as u64, query))
    }

    /// Grouped cohort breakdown rows.
    pub async fn cohort_breakdown(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
        group_by: &[String],
        aggregation: Aggregation,
    ) -> EngineResult<(Rows, JoinQuery)> {
        let query = self
            .join_planner
            .build_breakdown(views, filters, coded, group_by, aggregation);
        let conn = self.pool.get().await?;
        let rows = conn.query_json(&query.sql, &[]).await?;
        Ok((rows, query))
    }

    /// Count distinct values of a view's characteristic column.
    pub async fn cohort_count_distinct(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
    ) -> EngineResult<(u64, JoinQuery)> {
        let query = self.join_planner.build_count_distinct(views, filters, coded);
        let conn = self.pool.get().await?;
        let row = conn.query_one(&query.sql, &[]).await?;
        let count: i64 = row
            .try_get("count")
            .map_err(|e| EngineError::fatal(format!("distinct count result: {e}")))?;
        Ok((count.max(0) as u64, query))
    }

    // ---- materialized view management ------------------------------------

    /// The materialized-view service.
    pub fn view_service(&self) -> Arc<MaterializedViewService> {
        self.service.clone()
    }

    /// List materialized views with metadata.
    pub async fn list_materialized_views(&self) -> EngineResult<Vec<ViewInfo>> {
        self.service.list_views().await
    }

    /// Status of one materialized view.
    pub async fn materialized_view_status(&self, name: &str) -> EngineResult<ViewStatusReport> {
        self.service.get_view_status(name).await
    }

    /// Materialize a view from its definition.
    pub async fn materialize_view(&self, name: &str) -> EngineResult<RefreshOutcome> {
        let def = self.registry.load(name)?;
        let outcome = self.service.create_view(&def).await?;
        self.clear_view_cache();
        Ok(outcome)
    }

    /// Drop a materialized view.
    pub async fn drop_materialized_view(&self, name: &str) -> EngineResult<()> {
        self.service.drop_view(name).await?;
        self.clear_view_cache();
        Ok(())
    }

    /// Refresh one materialized view.
    pub async fn refresh_view(&self, name: &str) -> EngineResult<RefreshOutcome> {
        self.service.refresh_view(name).await
    }

    /// Refresh every materialized view.
    pub async fn refresh_all_views(&self) -> EngineResult<RefreshSummary> {
        self.service.refresh_all_views().await
    }

    /// Refresh the stale materialized views.
    pub async fn refresh_stale_views(&self) -> EngineResult<StaleCheckSummary> {
        self.service.check_and_refresh_stale_views().await
    }

    /// Build a refresh pipeline over this engine's service.
    pub fn refresh_pipeline(&self, interval: Duration) -> RefreshPipeline {
        RefreshPipeline::new(self.service.clone(), interval)
    }

    // ---- operations ------------------------------------------------------

    /// Run the integrity validator.
    pub async fn validate_integrity(&self) -> EngineResult<IntegrityReport> {
        self.integrity_validator().validate_all().await
    }

    /// Build an integrity validator over this engine's pool, for callers
    /// that want to adjust thresholds before running it.
    pub fn integrity_validator(&self) -> IntegrityValidator {
        IntegrityValidator::new(self.pool.clone())
    }

    /// Build a recent-writes ingestor, when the cache is connected.
    pub fn ingestor(&self) -> Option<RecentWritesIngestor> {
        self.speed_cache
            .clone()
            .map(|cache| RecentWritesIngestor::new(self.pool.clone(), cache))
    }

    /// Engine health.
    pub async fn health(&self) -> HealthReport {
        let store_healthy = self.pool.is_healthy().await;
        let pool_status = self.pool.status();

        let store_stats = if store_healthy {
            match self.pool.get().await {
                Ok(conn) => catalog::store_statistics(&conn).await.ok().map(Into::into),
                Err(_) => None,
            }
        } else {
            None
        };

        HealthReport {
            store_healthy,
            pool_available: pool_status.available,
            pool_size: pool_status.size,
            pool_max_size: pool_status.max_size,
            store_stats,
            speed_layer_connected: self.speed_cache.is_some(),
            runner: self.config.runner,
        }
    }

    /// Close the store pool. The engine is unusable afterwards.
    pub fn close(&self) {
        self.pool.close();
        info!("analytics engine closed");
    }
}
