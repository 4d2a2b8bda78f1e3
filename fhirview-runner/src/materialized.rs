//! Materialized-view runner: the batch fast path.
//!
//! Queries pre-computed views in the dedicated schema directly, with no
//! transpilation. Filters map through a fixed search-parameter-to-column
//! table; missing views surface as `NotMaterialized` so the serving layer
//! can fall back.

use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fhirview_query::{
    quote_literal, EngineError, EngineResult, FilterMap, FilterValue, ViewDefinition,
    MATERIALIZED_SCHEMA,
};
use fhirview_store::{catalog, StorePool};

use crate::runner::{LastSql, Rows, ViewRunner};
use crate::stats::{RunnerStats, StatsRecorder};

/// Map a search parameter onto its materialized-view column.
///
/// Views store both the subject reference (`patient_ref`) and the extracted
/// id (`patient_id`); filters join through the id column.
fn search_param_column(param: &str) -> &str {
    match param {
        "gender" => "gender",
        "birthdate" => "dob",
        "family" => "name_family",
        "given" => "name_given",
        "patient" | "subject" => "patient_id",
        "_id" => "id",
        "code" => "code",
        "status" => "status",
        "clinical-status" => "clinical_status",
        "date" => "effective_date",
        "value-quantity" => "value",
        other => other,
    }
}

/// Runner over pre-computed materialized views.
pub struct MaterializedViewRunner {
    pool: StorePool,
    schema: String,
    stats: StatsRecorder,
    last_sql: Mutex<Option<String>>,
}

impl MaterializedViewRunner {
    /// Create a runner over the default schema.
    pub fn new(pool: StorePool) -> Self {
        Self::with_schema(pool, MATERIALIZED_SCHEMA)
    }

    /// Create a runner over an explicit schema.
    pub fn with_schema(pool: StorePool, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        info!(schema = %schema, "initialized materialized view runner");
        Self {
            pool,
            schema,
            stats: StatsRecorder::default(),
            last_sql: Mutex::new(None),
        }
    }

    /// Check whether the backing view exists.
    pub async fn view_exists(&self, view_name: &str) -> EngineResult<bool> {
        let conn = self.pool.get().await.map_err(EngineError::from)?;
        Ok(catalog::matview_exists(&conn, &self.schema, view_name).await?)
    }

    fn qualified(&self, view_name: &str) -> EngineResult<String> {
        if view_name.is_empty()
            || !view_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::invalid_input(format!(
                "invalid view name '{view_name}'"
            )));
        }
        Ok(format!("{}.{view_name}", self.schema))
    }

    /// Build WHERE conditions from the filter map.
    ///
    /// Text filters match as case-insensitive substrings, numbers as
    /// equality, lists expand to `IN`, ranges to bound comparisons.
    fn build_where_clauses(filters: &FilterMap) -> Vec<String> {
        let mut clauses = Vec::new();

        for (param, value) in filters {
            let column = search_param_column(param);

            match value {
                FilterValue::Text(text) => {
                    clauses.push(format!(
                        "{column} ILIKE {}",
                        quote_literal(&format!("%{text}%"))
                    ));
                }
                FilterValue::Number(n) => {
                    clauses.push(format!("{column} = {}", FilterValue::format_number(*n)));
                }
                FilterValue::List(values) => {
                    let quoted: Vec<String> =
                        values.iter().map(|v| quote_literal(v)).collect();
                    clauses.push(format!("{column} IN ({})", quoted.join(", ")));
                }
                FilterValue::Range { start, end } => {
                    if let Some(start) = start {
                        clauses.push(format!("{column} >= {}", quote_literal(start)));
                    }
                    if let Some(end) = end {
                        clauses.push(format!("{column} <= {}", quote_literal(end)));
                    }
                }
            }
        }

        clauses
    }

    fn build_query(&self, view_name: &str, filters: &FilterMap, cap: Option<u64>) -> EngineResult<String> {
        let mut sql = format!("SELECT * FROM {}", self.qualified(view_name)?);

        let clauses = Self::build_where_clauses(filters);
        if !clauses.is_empty() {
            sql.push_str(&format!("\nWHERE {}", clauses.join(" AND ")));
        }
        if let Some(cap) = cap {
            sql.push_str(&format!("\nLIMIT {cap}"));
        }

        Ok(sql)
    }

    fn build_count_query(&self, view_name: &str, filters: &FilterMap) -> EngineResult<String> {
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.qualified(view_name)?);

        let clauses = Self::build_where_clauses(filters);
        if !clauses.is_empty() {
            sql.push_str(&format!("\nWHERE {}", clauses.join(" AND ")));
        }

        Ok(sql)
    }

    async fn require_view(&self, view_name: &str) -> EngineResult<()> {
        match self.view_exists(view_name).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::not_materialized(view_name)),
            Err(e) => {
                warn!(view = view_name, error = %e, "view existence check failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ViewRunner for MaterializedViewRunner {
    async fn execute(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
    ) -> EngineResult<Rows> {
        let view_name = def.name.as_str();
        debug!(view = view_name, "executing materialized view query");

        self.require_view(view_name).await?;

        let sql = self.build_query(view_name, filters, cap)?;
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
            "materialized view query completed"
        );
        Ok(rows)
    }

    async fn execute_count(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
    ) -> EngineResult<u64> {
        let view_name = def.name.as_str();
        debug!(view = view_name, "executing materialized COUNT query");

        self.require_view(view_name).await?;

        let sql = self.build_count_query(view_name, filters)?;
        *self.last_sql.lock() = Some(sql.clone());

        let started = Instant::now();
        let conn = self.pool.get().await.map_err(EngineError::from)?;
        let row = conn
            .query_one(&sql, &[])
            .await
            .map_err(EngineError::from)?;
        let count: i64 = row
            .try_get("count")
            .map_err(|e| EngineError::fatal(format!("count result: {e}")))?;

        self.stats.record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(count.max(0) as u64)
    }

    fn runner_type(&self) -> &'static str {
        "materialized"
    }

    fn statistics(&self) -> RunnerStats {
        self.stats.snapshot(self.runner_type())
    }
}

impl LastSql for MaterializedViewRunner {
    fn last_executed_sql(&self) -> Option<String> {
        self.last_sql.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filters(pairs: &[(&str, FilterValue)]) -> FilterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_search_param_mapping() {
        assert_eq!(search_param_column("gender"), "gender");
        assert_eq!(search_param_column("birthdate"), "dob");
        assert_eq!(search_param_column("patient"), "patient_id");
        assert_eq!(search_param_column("subject"), "patient_id");
        assert_eq!(search_param_column("_id"), "id");
        assert_eq!(search_param_column("date"), "effective_date");
        assert_eq!(search_param_column("unknown_param"), "unknown_param");
    }

    #[test]
    fn test_text_filter_is_substring_match() {
        let clauses = MaterializedViewRunner::build_where_clauses(&filters(&[(
            "gender",
            "female".into(),
        )]));
        assert_eq!(clauses, vec!["gender ILIKE '%female%'"]);
    }

    #[test]
    fn test_numeric_filter_is_equality() {
        let clauses =
            MaterializedViewRunner::build_where_clauses(&filters(&[("value-quantity", 7.5.into())]));
        assert_eq!(clauses, vec!["value = 7.5"]);

        let clauses =
            MaterializedViewRunner::build_where_clauses(&filters(&[("value-quantity", 7i64.into())]));
        assert_eq!(clauses, vec!["value = 7"]);
    }

    #[test]
    fn test_list_filter_expands_to_in() {
        let clauses = MaterializedViewRunner::build_where_clauses(&filters(&[(
            "code",
            vec!["E11".to_string(), "E12".to_string()].into(),
        )]));
        assert_eq!(clauses, vec!["code IN ('E11', 'E12')"]);
    }

    #[test]
    fn test_range_filter_becomes_bounds() {
        let clauses = MaterializedViewRunner::build_where_clauses(&filters(&[(
            "date",
            FilterValue::Range {
                start: Some("2020-01-01".to_string()),
                end: Some("2020-12-31".to_string()),
            },
        )]));
        assert_eq!(
            clauses,
            vec![
                "effective_date >= '2020-01-01'",
                "effective_date <= '2020-12-31'"
            ]
        );
    }

    #[test]
    fn test_half_open_range() {
        let clauses = MaterializedViewRunner::build_where_clauses(&filters(&[(
            "date",
            FilterValue::Range {
                start: Some("2021-06-01".to_string()),
                end: None,
            },
        )]));
        assert_eq!(clauses, vec!["effective_date >= '2021-06-01'"]);
    }
}
