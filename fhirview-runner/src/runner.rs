//! Runner traits and shared row types.

use async_trait::async_trait;
use fhirview_query::{EngineResult, FilterMap, ViewDefinition};
use fhirview_store::JsonRow;

use crate::stats::RunnerStats;

/// Rows returned by a runner, in projection order.
pub type Rows = Vec<JsonRow>;

/// A query runner that can answer row and count queries for a view
/// definition. Implemented by the materialized, relational, and hybrid
/// runners.
#[async_trait]
pub trait ViewRunner: Send + Sync {
    /// Execute the view and return rows, optionally capped.
    async fn execute(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<Rows>;

    /// Execute the cardinality variant.
    async fn execute_count(&self, def: &ViewDefinition, filters: &FilterMap)
        -> EngineResult<u64>;

    /// Short label identifying the runner flavor.
    fn runner_type(&self) -> &'static str;

    /// Execution statistics since this runner was created.
    fn statistics(&self) -> RunnerStats;
}

/// Capability interface for runners that record the SQL they execute.
pub trait LastSql {
    /// The most recently executed SQL, if any query ran yet.
    fn last_executed_sql(&self) -> Option<String>;
}
