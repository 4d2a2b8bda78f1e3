//! # fhirview
//!
//! A SQL-on-FHIR analytics engine with Lambda-style dual-layer serving.
//!
//! fhirview executes declarative tabular projections ("view definitions")
//! against a FHIR document store and returns rows suitable for statistical
//! and cohort-count workloads. Queries are served from pre-computed
//! materialized views when available, from generated relational queries
//! otherwise, and a recent-writes cache keeps results observably fresh.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fhirview::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fhirview::EngineError> {
//!     let engine = AnalyticsEngine::new(EngineConfig::from_env()?).await?;
//!
//!     let filters: FilterMap =
//!         [("gender".to_string(), "female".into())].into_iter().collect();
//!     let output = engine.execute("patient_demographics", &filters, Some(100)).await?;
//!     println!("{} rows", output.row_count);
//!
//!     Ok(())
//! }
//! ```

pub use fhirview_cache::{CacheClient, CacheConfig, CachedResource};
pub use fhirview_query::{
    infer_schema, Aggregation, CodedFilter, ColumnSpec, ColumnType, EngineError, EngineResult,
    FilterMap, FilterValue, JoinQuery, JoinQueryBuilder, PathTranspiler, QueryBuilder, QueryPlan,
    SelectNode, ViewDefinition, ViewDefinitionRegistry, WhereClause, MATERIALIZED_SCHEMA,
};
pub use fhirview_runner::{
    AnalyticsEngine, EngineConfig, ExecuteOutput, HealthReport, HybridRunner, IntegrityReport,
    IntegrityValidator, LastSql, MaterializedViewRunner, MaterializedViewService,
    RecentWritesIngestor, RefreshPipeline, RefreshSummary, RelationalRunner, RunnerKind,
    SpeedLayerRunner, SpeedResult, ViewRunner, ViewStatus,
};
pub use fhirview_store::{StoreConfig, StoreConnection, StoreError, StorePool};

/// Prelude for convenient imports.
pub mod prelude {
    pub use fhirview_query::prelude::*;
    pub use fhirview_runner::prelude::*;
    pub use fhirview_store::{StoreConfig, StorePool};
}
