//! Referential-integrity validator for materialized views.
//!
//! Runs a fixed suite against the schema: orphaned subject references,
//! reference-format conformance, dual-column consistency, join latency,
//! cardinality sanity, and index presence on subject id columns.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use fhirview_query::{EngineResult, MATERIALIZED_SCHEMA};
use fhirview_store::{catalog, StoreConnection, StorePool};

/// Maximum join latency before the performance check fails.
pub const DEFAULT_JOIN_LATENCY_MS: f64 = 100.0;
/// Sample errors captured per failing check.
const SAMPLE_CAP: i64 = 5;

/// Result of one validation check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationOutcome {
    /// Check name.
    pub test_name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Rows examined.
    pub total_count: i64,
    /// Rows that satisfied the check.
    pub valid_count: i64,
    /// Rows that violated it.
    pub invalid_count: i64,
    /// Rows referencing a missing subject.
    pub orphaned_count: i64,
    /// Check duration.
    pub execution_time_ms: f64,
    /// Failure messages.
    pub errors: Vec<String>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
    /// Example offending rows, capped.
    pub sample_errors: Vec<Value>,
}

impl ValidationOutcome {
    fn failed(test_name: &str, message: String) -> Self {
        Self {
            test_name: test_name.to_string(),
            passed: false,
            errors: vec![message],
            ..Default::default()
        }
    }

    /// Share of examined rows that were valid.
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            100.0
        } else {
            self.valid_count as f64 / self.total_count as f64 * 100.0
        }
    }
}

/// Full integrity report over a schema.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    /// Schema validated.
    pub schema_name: String,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// True when every check passed.
    pub overall_passed: bool,
    /// Per-check outcomes.
    pub results: Vec<ValidationOutcome>,
}

impl IntegrityReport {
    /// Checks that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

/// Validator over a schema's materialized views.
pub struct IntegrityValidator {
    pool: StorePool,
    schema: String,
    primary_view: String,
    child_views: Vec<String>,
    join_latency_ms: f64,
}

impl IntegrityValidator {
    /// Create a validator with the default demographics/child layout.
    pub fn new(pool: StorePool) -> Self {
        Self {
            pool,
            schema: MATERIALIZED_SCHEMA.to_string(),
            primary_view: "patient_demographics".to_string(),
            child_views: vec!["condition_simple".to_string(), "observation_labs".to_string()],
            join_latency_ms: DEFAULT_JOIN_LATENCY_MS,
        }
    }

    /// Override the child views checked against the primary.
    pub fn with_child_views(mut self, child_views: Vec<String>) -> Self {
        self.child_views = child_views;
        self
    }

    /// Override the join latency threshold.
    pub fn with_join_latency_ms(mut self, threshold: f64) -> Self {
        self.join_latency_ms = threshold;
        self
    }

    /// Run the full suite.
    pub async fn validate_all(&self) -> EngineResult<IntegrityReport> {
        info!(schema = %self.schema, "starting referential integrity validation");
        let timestamp = Utc::now();
        let conn = self.pool.get().await?;

        let mut results = Vec::new();
        for child in &self.child_views {
            results.push(self.check_orphans(&conn, child).await);
        }
        results.push(self.check_reference_format(&conn).await);
        results.push(self.check_dual_columns(&conn).await);
        results.push(self.check_join_performance(&conn).await);
        results.push(self.check_cardinality(&conn).await);
        results.push(self.check_indexes(&conn).await);

        let overall_passed = results.iter().all(|r| r.passed);
        let report = IntegrityReport {
            schema_name: self.schema.clone(),
            timestamp,
            overall_passed,
            results,
        };

        info!(
            passed = report.passed_count(),
            total = report.results.len(),
            overall = report.overall_passed,
            "integrity validation finished"
        );
        Ok(report)
    }

    async fn views_present(&self, conn: &StoreConnection, views: &[&str]) -> EngineResult<bool> {
        for view in views {
            if !catalog::matview_exists(conn, &self.schema, view).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every non-null subject id in a child view resolves to a primary row.
    async fn check_orphans(&self, conn: &StoreConnection, child: &str) -> ValidationOutcome {
        let test_name = format!("Subject references in {child}");
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            if !self
                .views_present(conn, &[child, self.primary_view.as_str()])
                .await?
            {
                return Ok(ValidationOutcome::failed(
                    &test_name,
                    "required views do not exist".to_string(),
                ));
            }

            let total: i64 = conn
                .query_one(
                    &format!(
                        "SELECT COUNT(*) AS count FROM {s}.{child} WHERE patient_id IS NOT NULL",
                        s = self.schema
                    ),
                    &[],
                )
                .await?
                .try_get("count")
                .unwrap_or(0);

            let valid: i64 = conn
                .query_one(
                    &format!(
                        "SELECT COUNT(*) AS count
                         FROM {s}.{child} c
                         INNER JOIN {s}.{p} p ON c.patient_id = p.patient_id
                         WHERE c.patient_id IS NOT NULL",
                        s = self.schema,
                        p = self.primary_view
                    ),
                    &[],
                )
                .await?
                .try_get("count")
                .unwrap_or(0);

            let orphaned = total - valid;
            let mut sample_errors = Vec::new();
            let mut warnings = Vec::new();

            if orphaned > 0 {
                warnings.push(format!(
                    "found {orphaned} rows referencing non-existent subjects"
                ));
                let samples = conn
                    .query_json(
                        &format!(
                            "SELECT c.id, c.patient_id, c.patient_ref
                             FROM {s}.{child} c
                             LEFT JOIN {s}.{p} p ON c.patient_id = p.patient_id
                             WHERE c.patient_id IS NOT NULL AND p.patient_id IS NULL
                             LIMIT {SAMPLE_CAP}",
                            s = self.schema,
                            p = self.primary_view
                        ),
                        &[],
                    )
                    .await?;
                sample_errors = samples
                    .into_iter()
                    .map(|row| serde_json::to_value(row).unwrap_or(Value::Null))
                    .collect();
            }

            Ok(ValidationOutcome {
                test_name: test_name.clone(),
                passed: orphaned == 0,
                total_count: total,
                valid_count: valid,
                invalid_count: 0,
                orphaned_count: orphaned,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                errors: Vec::new(),
                warnings,
                sample_errors,
            })
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!(check = %test_name, error = %e, "validation check errored");
            ValidationOutcome::failed(&test_name, e.to_string())
        })
    }

    /// Every subject reference matches `Patient/<id>`.
    async fn check_reference_format(&self, conn: &StoreConnection) -> ValidationOutcome {
        let test_name = "Subject reference format";
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            let mut total = 0i64;
            let mut valid = 0i64;

            for child in &self.child_views {
                if !self.views_present(conn, &[child.as_str()]).await? {
                    continue;
                }
                let row = conn
                    .query_one(
                        &format!(
                            "SELECT COUNT(*) AS total,
                                    COALESCE(SUM(CASE WHEN patient_ref LIKE 'Patient/%' \
                                        THEN 1 ELSE 0 END), 0) AS valid_format
                             FROM {s}.{child}
                             WHERE patient_ref IS NOT NULL",
                            s = self.schema
                        ),
                        &[],
                    )
                    .await?;
                total += row.try_get::<_, i64>("total").unwrap_or(0);
                valid += row.try_get::<_, i64>("valid_format").unwrap_or(0);
            }

            let invalid = total - valid;
            let errors = if invalid > 0 {
                vec![format!(
                    "found {invalid} references not matching 'Patient/<id>'"
                )]
            } else {
                Vec::new()
            };

            Ok(ValidationOutcome {
                test_name: test_name.to_string(),
                passed: invalid == 0,
                total_count: total,
                valid_count: valid,
                invalid_count: invalid,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                errors,
                ..Default::default()
            })
        }
        .await;

        result.unwrap_or_else(|e| ValidationOutcome::failed(test_name, e.to_string()))
    }

    /// `patient_id` equals the id extracted from `patient_ref`.
    async fn check_dual_columns(&self, conn: &StoreConnection) -> ValidationOutcome {
        let test_name = "Dual column consistency";
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            let mut total = 0i64;
            let mut consistent = 0i64;

            for child in &self.child_views {
                if !self.views_present(conn, &[child.as_str()]).await? {
                    continue;
                }
                let row = conn
                    .query_one(
                        &format!(
                            "SELECT COUNT(*) AS total,
                                    COALESCE(SUM(CASE WHEN patient_id = \
                                        SPLIT_PART(patient_ref, '/', 2) \
                                        THEN 1 ELSE 0 END), 0) AS consistent
                             FROM {s}.{child}
                             WHERE patient_ref IS NOT NULL AND patient_id IS NOT NULL",
                            s = self.schema
                        ),
                        &[],
                    )
                    .await?;
                total += row.try_get::<_, i64>("total").unwrap_or(0);
                consistent += row.try_get::<_, i64>("consistent").unwrap_or(0);
            }

            let inconsistent = total - consistent;
            let errors = if inconsistent > 0 {
                vec![format!(
                    "found {inconsistent} rows where patient_id does not match patient_ref"
                )]
            } else {
                Vec::new()
            };

            Ok(ValidationOutcome {
                test_name: test_name.to_string(),
                passed: inconsistent == 0,
                total_count: total,
                valid_count: consistent,
                invalid_count: inconsistent,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                errors,
                ..Default::default()
            })
        }
        .await;

        result.unwrap_or_else(|e| ValidationOutcome::failed(test_name, e.to_string()))
    }

    /// A demographics-to-child join completes under the latency threshold.
    async fn check_join_performance(&self, conn: &StoreConnection) -> ValidationOutcome {
        let test_name = "Join performance";
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            let Some(child) = self.child_views.first() else {
                return Ok(ValidationOutcome::failed(
                    test_name,
                    "no child views configured".to_string(),
                ));
            };
            if !self
                .views_present(conn, &[child.as_str(), self.primary_view.as_str()])
                .await?
            {
                return Ok(ValidationOutcome::failed(
                    test_name,
                    "required views do not exist".to_string(),
                ));
            }

            let join_started = Instant::now();
            let row = conn
                .query_one(
                    &format!(
                        "SELECT COUNT(*) AS count
                         FROM {s}.{p} p
                         INNER JOIN {s}.{child} c ON p.patient_id = c.patient_id",
                        s = self.schema,
                        p = self.primary_view
                    ),
                    &[],
                )
                .await?;
            let join_ms = join_started.elapsed().as_secs_f64() * 1000.0;
            let joined: i64 = row.try_get("count").unwrap_or(0);

            let passed = join_ms < self.join_latency_ms;
            let warnings = if passed {
                Vec::new()
            } else {
                vec![format!(
                    "join took {join_ms:.2}ms, threshold is {:.0}ms",
                    self.join_latency_ms
                )]
            };

            Ok(ValidationOutcome {
                test_name: test_name.to_string(),
                passed,
                total_count: joined,
                valid_count: joined,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                warnings,
                ..Default::default()
            })
        }
        .await;

        result.unwrap_or_else(|e| ValidationOutcome::failed(test_name, e.to_string()))
    }

    /// Child rows with a subject are at least as many as distinct subjects.
    async fn check_cardinality(&self, conn: &StoreConnection) -> ValidationOutcome {
        let test_name = "Cardinality";
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            let mut errors = Vec::new();
            let mut total = 0i64;

            for child in &self.child_views {
                if !self.views_present(conn, &[child.as_str()]).await? {
                    continue;
                }
                let row = conn
                    .query_one(
                        &format!(
                            "SELECT COUNT(patient_id) AS rows_with_subject,
                                    COUNT(DISTINCT patient_id) AS distinct_subjects
                             FROM {s}.{child}",
                            s = self.schema
                        ),
                        &[],
                    )
                    .await?;
                let rows_with_subject: i64 = row.try_get("rows_with_subject").unwrap_or(0);
                let distinct_subjects: i64 = row.try_get("distinct_subjects").unwrap_or(0);
                total += rows_with_subject;

                if rows_with_subject < distinct_subjects {
                    errors.push(format!(
                        "{child}: {rows_with_subject} rows with subject but \
                         {distinct_subjects} distinct subjects"
                    ));
                }
            }

            Ok(ValidationOutcome {
                test_name: test_name.to_string(),
                passed: errors.is_empty(),
                total_count: total,
                valid_count: total,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                errors,
                ..Default::default()
            })
        }
        .await;

        result.unwrap_or_else(|e| ValidationOutcome::failed(test_name, e.to_string()))
    }

    /// Every child view has an index covering `patient_id`.
    async fn check_indexes(&self, conn: &StoreConnection) -> ValidationOutcome {
        let test_name = "Subject id indexes";
        let started = Instant::now();

        let result: EngineResult<ValidationOutcome> = async {
            let mut errors = Vec::new();
            let mut checked = 0i64;
            let mut indexed = 0i64;

            for child in &self.child_views {
                if !self.views_present(conn, &[child.as_str()]).await? {
                    continue;
                }
                checked += 1;
                if catalog::has_index_on(conn, &self.schema, child, "patient_id").await? {
                    indexed += 1;
                } else {
                    errors.push(format!("{child}: no index on patient_id"));
                }
            }

            Ok(ValidationOutcome {
                test_name: test_name.to_string(),
                passed: errors.is_empty(),
                total_count: checked,
                valid_count: indexed,
                invalid_count: checked - indexed,
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                errors,
                ..Default::default()
            })
        }
        .await;

        result.unwrap_or_else(|e| ValidationOutcome::failed(test_name, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let outcome = ValidationOutcome {
            total_count: 200,
            valid_count: 150,
            ..Default::default()
        };
        assert!((outcome.success_rate() - 75.0).abs() < f64::EPSILON);

        let empty = ValidationOutcome::default();
        assert_eq!(empty.success_rate(), 100.0);
    }

    #[test]
    fn test_failed_outcome_shape() {
        let outcome = ValidationOutcome::failed("Orphans", "views missing".to_string());
        assert!(!outcome.passed);
        assert_eq!(outcome.errors, vec!["views missing"]);
        assert_eq!(outcome.total_count, 0);
    }

    #[test]
    fn test_report_counts() {
        let report = IntegrityReport {
            schema_name: "sqlonfhir".to_string(),
            timestamp: Utc::now(),
            overall_passed: false,
            results: vec![
                ValidationOutcome {
                    passed: true,
                    ..Default::default()
                },
                ValidationOutcome::failed("x", "y".to_string()),
            ],
        };
        assert_eq!(report.passed_count(), 1);
    }
}
