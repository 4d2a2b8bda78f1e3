//! Cross-view join planning for cohort queries.
//!
//! Composes several materialized-view projections into one query keyed by
//! subject id, answering conjunctive filters like "male patients with
//! diabetes": a demographics view is the primary, every other view joins on
//! `patient_id`, demographic filters apply to the primary, and coded-value
//! filters apply to the joined views with a text-search fallback for
//! incompletely coded data.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builder::{FilterMap, FilterValue};
use crate::plan::{quote_identifier, quote_literal};

/// Schema holding the materialized views.
pub const MATERIALIZED_SCHEMA: &str = "sqlonfhir";

/// Views that carry demographics and can anchor a join.
pub const DEMOGRAPHIC_VIEWS: [&str; 2] = ["patient_demographics", "patient_simple"];

/// A coded-value filter applied to a joined view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodedFilter {
    /// Column to match (e.g. `icd10_code`, `snomed_code`).
    #[serde(default)]
    pub field: String,
    /// Coded value or pattern.
    #[serde(default)]
    pub value: String,
    /// Verbose label behind the code, used for the text fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    /// Match with `LIKE` instead of equality.
    #[serde(default)]
    pub use_like: bool,
    /// Skip coded matching entirely and search text only.
    #[serde(default)]
    pub use_text_search: bool,
    /// Pattern for the text-only search; defaults to `%<condition_name>%`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_pattern: Option<String>,
}

/// Aggregation applied in breakdown queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Distinct subject count (the default).
    #[default]
    Count,
    /// Average of the `value` column.
    Avg,
    /// Sum of the `value` column.
    Sum,
    /// Minimum of the `value` column.
    Min,
    /// Maximum of the `value` column.
    Max,
}

impl Aggregation {
    fn expression(&self, alias: &str) -> String {
        match self {
            Self::Count => format!("COUNT(DISTINCT {alias}.patient_id) AS count"),
            Self::Avg => format!("AVG({alias}.value) AS avg_value"),
            Self::Sum => format!("SUM({alias}.value) AS sum_value"),
            Self::Min => format!("MIN({alias}.value) AS min_value"),
            Self::Max => format!("MAX({alias}.value) AS max_value"),
        }
    }
}

/// A planned cross-view query.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    /// The generated SQL.
    pub sql: String,
    /// The anchoring demographics view.
    pub primary_view: String,
    /// Views joined onto the primary.
    pub joined_views: Vec<String>,
    /// Human-readable filter description for logs and UIs.
    pub filter_summary: String,
    /// Breakdown dimensions, when grouping.
    pub group_by: Vec<String>,
    /// Column counted by the distinct-count variant.
    pub distinct_column: Option<String>,
}

/// Plans JOIN queries over materialized views.
#[derive(Debug, Clone)]
pub struct JoinQueryBuilder {
    schema: String,
}

impl Default for JoinQueryBuilder {
    fn default() -> Self {
        Self::new(MATERIALIZED_SCHEMA)
    }
}

impl JoinQueryBuilder {
    /// Create a planner over the given schema.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Build a distinct-subject COUNT across the given views.
    pub fn build_count(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
    ) -> JoinQuery {
        info!(?views, "building join count query");

        let (primary, joined) = self.split_views(views);
        let primary_alias = view_alias(&primary);

        let mut sql = format!(
            "SELECT COUNT(DISTINCT {primary_alias}.patient_id)\n  FROM {}.{primary} {primary_alias}",
            self.schema
        );
        sql.push_str(&self.render_joins(&primary_alias, &joined));

        let mut clauses = demographic_clauses(&primary_alias, filters);
        for view in &joined {
            let alias = view_alias(view);
            for filter in coded {
                clauses.extend(coded_clauses(&alias, filter));
            }
        }
        sql.push_str(&render_where(&clauses));

        JoinQuery {
            sql,
            primary_view: primary,
            joined_views: joined,
            filter_summary: summarize_filters(filters, coded),
            group_by: Vec::new(),
            distinct_column: None,
        }
    }

    /// Build a GROUP BY breakdown across the given views.
    ///
    /// Dimensions: `gender`, `age_group` (fixed buckets derived from date of
    /// birth), or any column of the primary view. An empty dimension list
    /// degrades to the plain count query.
    pub fn build_breakdown(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
        group_by: &[String],
        aggregation: Aggregation,
    ) -> JoinQuery {
        if group_by.is_empty() {
            warn!("no group_by dimensions specified, falling back to count query");
            return self.build_count(views, filters, coded);
        }

        info!(?views, ?group_by, "building breakdown query");

        let (primary, joined) = self.split_views(views);
        let primary_alias = view_alias(&primary);

        let mut select_columns = Vec::new();
        let mut group_columns = Vec::new();
        for dimension in group_by {
            match dimension.as_str() {
                "gender" => {
                    select_columns.push(format!("{primary_alias}.gender"));
                    group_columns.push(format!("{primary_alias}.gender"));
                }
                "age_group" => {
                    select_columns.push(age_group_case(&primary_alias));
                    group_columns.push("age_group".to_string());
                }
                other => {
                    let column = format!("{primary_alias}.{}", quote_identifier(other));
                    select_columns.push(column.clone());
                    group_columns.push(column);
                }
            }
        }

        let mut sql = format!(
            "SELECT {}, {}\n  FROM {}.{primary} {primary_alias}",
            select_columns.join(", "),
            aggregation.expression(&primary_alias),
            self.schema
        );
        sql.push_str(&self.render_joins(&primary_alias, &joined));

        let mut clauses = demographic_clauses(&primary_alias, filters);
        for view in &joined {
            let alias = view_alias(view);
            for filter in coded {
                clauses.extend(coded_clauses(&alias, filter));
            }
        }
        sql.push_str(&render_where(&clauses));

        sql.push_str(&format!("\n GROUP BY {}", group_columns.join(", ")));
        sql.push_str(&format!("\n ORDER BY {}", group_columns.join(", ")));

        JoinQuery {
            sql,
            primary_view: primary,
            joined_views: joined,
            filter_summary: summarize_filters(filters, coded),
            group_by: group_by.to_vec(),
            distinct_column: None,
        }
    }

    /// Build a COUNT DISTINCT over a single view's characteristic column
    /// (distinct codes, medications, etc.).
    pub fn build_count_distinct(
        &self,
        views: &[String],
        filters: &FilterMap,
        coded: &[CodedFilter],
    ) -> JoinQuery {
        let view = views
            .first()
            .cloned()
            .unwrap_or_else(|| "patient_demographics".to_string());
        let alias = view_alias(&view);

        let distinct_column = match view.as_str() {
            "condition_simple" => "code_text",
            "condition_diagnoses" => "code",
            "medication_requests" => "medication_code",
            "observation_labs" => "code",
            "procedure_history" => "cpt_code",
            _ => "patient_id",
        };

        let mut sql = format!(
            "SELECT COUNT(DISTINCT {alias}.{distinct_column}) AS count\n  FROM {}.{view} {alias}",
            self.schema
        );

        let mut clauses = demographic_clauses(&alias, filters);
        for filter in coded {
            clauses.extend(coded_clauses(&alias, filter));
        }
        sql.push_str(&render_where(&clauses));

        info!(view = %view, column = distinct_column, "built count distinct query");

        JoinQuery {
            sql,
            primary_view: view,
            joined_views: Vec::new(),
            filter_summary: summarize_filters(filters, coded),
            group_by: Vec::new(),
            distinct_column: Some(distinct_column.to_string()),
        }
    }

    /// Pick the primary demographics view and the joined rest.
    fn split_views(&self, views: &[String]) -> (String, Vec<String>) {
        let mut primary = None;
        let mut joined = Vec::new();

        for view in views {
            if DEMOGRAPHIC_VIEWS.contains(&view.as_str()) && primary.is_none() {
                primary = Some(view.clone());
            } else {
                joined.push(view.clone());
            }
        }

        (
            primary.unwrap_or_else(|| "patient_demographics".to_string()),
            joined,
        )
    }

    fn render_joins(&self, primary_alias: &str, joined: &[String]) -> String {
        let mut sql = String::new();
        for view in joined {
            let alias = view_alias(view);
            sql.push_str(&format!(
                "\n  JOIN {}.{view} {alias}\n    ON {primary_alias}.patient_id = {alias}.patient_id",
                self.schema
            ));
        }
        sql
    }
}

/// Table alias for a view name.
fn view_alias(view: &str) -> String {
    match view {
        "patient_demographics" => "p".to_string(),
        "patient_simple" => "ps".to_string(),
        "condition_simple" => "c".to_string(),
        "observation_labs" => "o".to_string(),
        "medication_requests" => "m".to_string(),
        "procedure_history" => "pr".to_string(),
        other => other.chars().take(1).collect(),
    }
}

fn render_where(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("\n WHERE {}", clauses.join("\n   AND "))
    }
}

/// Demographic predicates on the primary view: lowered gender equality and
/// birth-date range bounds.
fn demographic_clauses(alias: &str, filters: &FilterMap) -> Vec<String> {
    let mut clauses = Vec::new();

    if let Some(FilterValue::Text(gender)) = filters.get("gender") {
        clauses.push(format!(
            "LOWER({alias}.gender) = {}",
            quote_literal(&gender.to_lowercase())
        ));
    }

    if let Some(FilterValue::Text(value)) = filters.get("birthdate_min") {
        let date = value.strip_prefix("ge").unwrap_or(value);
        clauses.push(format!("{alias}.dob >= {}", quote_literal(date)));
    }

    if let Some(FilterValue::Text(value)) = filters.get("birthdate_max") {
        let date = value.strip_prefix("le").unwrap_or(value);
        clauses.push(format!("{alias}.dob <= {}", quote_literal(date)));
    }

    clauses
}

/// Predicates for one coded filter on a joined view.
///
/// Code fields get a resilience fallback: the coded match OR a
/// case-insensitive substring on `code_text` using the condition's core
/// term, because real-world documents are often incompletely coded.
fn coded_clauses(alias: &str, filter: &CodedFilter) -> Vec<String> {
    if filter.use_text_search {
        let fallback = filter
            .condition_name
            .as_deref()
            .map(|name| format!("%{name}%"))
            .unwrap_or_else(|| "%".to_string());
        let pattern = filter.text_pattern.as_deref().unwrap_or(&fallback);
        info!(
            condition = filter.condition_name.as_deref().unwrap_or(""),
            pattern, "using text search fallback"
        );
        return vec![format!(
            "{alias}.{} ILIKE {}",
            filter.field,
            quote_literal(pattern)
        )];
    }

    if filter.field.is_empty() || filter.value.is_empty() {
        return Vec::new();
    }

    let primary = if filter.use_like {
        format!("{alias}.{} LIKE {}", filter.field, quote_literal(&filter.value))
    } else {
        format!("{alias}.{} = {}", filter.field, quote_literal(&filter.value))
    };

    let is_code_field = matches!(filter.field.as_str(), "icd10_code" | "snomed_code");
    match (&filter.condition_name, is_code_field) {
        (Some(name), true) => {
            let core = core_medical_term(name);
            let mut branches = vec![
                primary,
                format!("{alias}.code_text ILIKE {}", quote_literal(&format!("%{core}%"))),
            ];
            if core.to_lowercase() != name.to_lowercase() {
                branches.push(format!(
                    "{alias}.code_text ILIKE {}",
                    quote_literal(&format!("%{name}%"))
                ));
            }
            vec![format!("({})", branches.join(" OR "))]
        }
        _ => vec![primary],
    }
}

/// Extract the core medical term from a verbose condition label.
///
/// Strips parenthesized qualifiers, lower-cases, and drops type/stage/
/// severity qualifiers and short words, keeping the first significant
/// keyword: "Type 2 diabetes mellitus" becomes "diabetes".
pub fn core_medical_term(condition_name: &str) -> String {
    let stripped = Regex::new(r"\([^)]*\)")
        .unwrap()
        .replace_all(condition_name, "");
    let term = stripped.trim().to_lowercase();

    const STOP_WORDS: [&str; 17] = [
        "type", "stage", "grade", "mellitus", "disorder", "disease", "syndrome", "condition",
        "1", "2", "3", "i", "ii", "iii", "acute", "chronic", "severe",
    ];
    const SEVERITY: [&str; 2] = ["mild", "moderate"];

    let words: Vec<&str> = term.split_whitespace().collect();
    let significant = words
        .iter()
        .find(|w| !STOP_WORDS.contains(w) && !SEVERITY.contains(w) && w.len() > 3);

    match significant {
        Some(word) => word.to_string(),
        None => words
            .first()
            .map(|w| w.to_string())
            .unwrap_or_else(|| condition_name.to_lowercase()),
    }
}

fn summarize_filters(filters: &FilterMap, coded: &[CodedFilter]) -> String {
    let mut parts = Vec::new();

    if let Some(FilterValue::Text(gender)) = filters.get("gender") {
        parts.push(format!("Gender: {gender}"));
    }

    let min = filters.get("birthdate_min").and_then(|v| match v {
        FilterValue::Text(s) => Some(s.strip_prefix("ge").unwrap_or(s)),
        _ => None,
    });
    let max = filters.get("birthdate_max").and_then(|v| match v {
        FilterValue::Text(s) => Some(s.strip_prefix("le").unwrap_or(s)),
        _ => None,
    });
    match (min, max) {
        (Some(min), Some(max)) => parts.push(format!("Birth date: {min} to {max}")),
        (Some(min), None) => parts.push(format!("Birth date >= {min}")),
        (None, Some(max)) => parts.push(format!("Birth date <= {max}")),
        (None, None) => {}
    }

    for filter in coded {
        if let Some(name) = &filter.condition_name {
            parts.push(format!("Condition: {name}"));
        }
    }

    if parts.is_empty() {
        "No filters".to_string()
    } else {
        parts.join(", ")
    }
}

fn age_group_case(alias: &str) -> String {
    format!(
        "CASE \
         WHEN EXTRACT(YEAR FROM AGE({alias}.dob::date)) < 18 THEN '<18' \
         WHEN EXTRACT(YEAR FROM AGE({alias}.dob::date)) BETWEEN 18 AND 30 THEN '18-30' \
         WHEN EXTRACT(YEAR FROM AGE({alias}.dob::date)) BETWEEN 31 AND 50 THEN '31-50' \
         WHEN EXTRACT(YEAR FROM AGE({alias}.dob::date)) BETWEEN 51 AND 70 THEN '51-70' \
         ELSE '70+' END AS age_group"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filters(pairs: &[(&str, &str)]) -> FilterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FilterValue::Text(v.to_string())))
            .collect()
    }

    fn diabetes_filter() -> CodedFilter {
        CodedFilter {
            field: "icd10_code".to_string(),
            value: "E11%".to_string(),
            condition_name: Some("Diabetes mellitus".to_string()),
            use_like: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_cohort_join_query() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_count(
            &["patient_demographics".to_string(), "condition_simple".to_string()],
            &filters(&[("gender", "male")]),
            &[diabetes_filter()],
        );

        assert_eq!(query.primary_view, "patient_demographics");
        assert_eq!(query.joined_views, vec!["condition_simple"]);

        assert!(query.sql.starts_with("SELECT COUNT(DISTINCT p.patient_id)"));
        assert_eq!(query.sql.matches("JOIN").count(), 1);
        assert!(query.sql.contains("ON p.patient_id = c.patient_id"));
        assert!(query.sql.contains("LOWER(p.gender) = 'male'"));
        assert!(query.sql.contains(
            "(c.icd10_code LIKE 'E11%' OR c.code_text ILIKE '%diabetes%' \
             OR c.code_text ILIKE '%Diabetes mellitus%')"
        ));
    }

    #[test]
    fn test_single_view_count_has_no_join() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_count(
            &["patient_demographics".to_string()],
            &filters(&[("gender", "female")]),
            &[],
        );

        assert!(query.joined_views.is_empty());
        assert!(!query.sql.contains("JOIN sqlonfhir"));
        assert!(query.sql.contains("LOWER(p.gender) = 'female'"));
    }

    #[test]
    fn test_missing_demographic_view_defaults_primary() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_count(&["condition_simple".to_string()], &FilterMap::new(), &[]);
        assert_eq!(query.primary_view, "patient_demographics");
        assert_eq!(query.joined_views, vec!["condition_simple"]);
    }

    #[test]
    fn test_birthdate_range_filters() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_count(
            &["patient_demographics".to_string()],
            &filters(&[("birthdate_min", "ge1990-01-01"), ("birthdate_max", "le2000-12-31")]),
            &[],
        );

        assert!(query.sql.contains("p.dob >= '1990-01-01'"));
        assert!(query.sql.contains("p.dob <= '2000-12-31'"));
        assert_eq!(query.filter_summary, "Birth date: 1990-01-01 to 2000-12-31");
    }

    #[test]
    fn test_text_search_only_branch() {
        let builder = JoinQueryBuilder::default();
        let filter = CodedFilter {
            field: "code_text".to_string(),
            condition_name: Some("Long covid".to_string()),
            use_text_search: true,
            text_pattern: Some("%covid%".to_string()),
            ..Default::default()
        };

        let query = builder.build_count(
            &["patient_demographics".to_string(), "condition_simple".to_string()],
            &FilterMap::new(),
            &[filter],
        );

        assert!(query.sql.contains("c.code_text ILIKE '%covid%'"));
        assert!(!query.sql.contains(" OR "));
    }

    #[test]
    fn test_core_medical_term() {
        let cases = [
            ("Diabetes mellitus (all types)", "diabetes"),
            ("Type 2 diabetes mellitus", "diabetes"),
            ("Hypertension (disorder)", "hypertension"),
            ("Chronic kidney disease stage 3", "kidney"),
            ("Asthma", "asthma"),
        ];
        for (input, expected) in cases {
            assert_eq!(core_medical_term(input), expected, "input {input}");
        }
    }

    #[test]
    fn test_breakdown_by_gender_and_age() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_breakdown(
            &["patient_demographics".to_string()],
            &FilterMap::new(),
            &[],
            &["gender".to_string(), "age_group".to_string()],
            Aggregation::Count,
        );

        assert!(query.sql.contains("p.gender"));
        assert!(query.sql.contains("WHEN EXTRACT(YEAR FROM AGE(p.dob::date)) < 18 THEN '<18'"));
        assert!(query.sql.contains("ELSE '70+' END AS age_group"));
        assert!(query.sql.contains("COUNT(DISTINCT p.patient_id) AS count"));
        assert!(query.sql.contains("GROUP BY p.gender, age_group"));
        assert!(query.sql.contains("ORDER BY p.gender, age_group"));
        assert_eq!(query.group_by, vec!["gender", "age_group"]);
    }

    #[test]
    fn test_breakdown_aggregations() {
        let builder = JoinQueryBuilder::default();
        for (agg, expected) in [
            (Aggregation::Avg, "AVG(p.value) AS avg_value"),
            (Aggregation::Sum, "SUM(p.value) AS sum_value"),
            (Aggregation::Min, "MIN(p.value) AS min_value"),
            (Aggregation::Max, "MAX(p.value) AS max_value"),
        ] {
            let query = builder.build_breakdown(
                &["patient_demographics".to_string()],
                &FilterMap::new(),
                &[],
                &["gender".to_string()],
                agg,
            );
            assert!(query.sql.contains(expected), "{agg:?}");
        }
    }

    #[test]
    fn test_breakdown_without_dimensions_degrades_to_count() {
        let builder = JoinQueryBuilder::default();
        let query = builder.build_breakdown(
            &["patient_demographics".to_string()],
            &FilterMap::new(),
            &[],
            &[],
            Aggregation::Count,
        );
        assert!(query.sql.starts_with("SELECT COUNT(DISTINCT p.patient_id)"));
        assert!(query.group_by.is_empty());
    }

    #[test]
    fn test_count_distinct_column_mapping() {
        let builder = JoinQueryBuilder::default();
        for (view, column) in [
            ("condition_simple", "code_text"),
            ("medication_requests", "medication_code"),
            ("observation_labs", "code"),
            ("procedure_history", "cpt_code"),
            ("patient_demographics", "patient_id"),
        ] {
            let query =
                builder.build_count_distinct(&[view.to_string()], &FilterMap::new(), &[]);
            assert_eq!(query.distinct_column.as_deref(), Some(column), "{view}");
            assert!(query
                .sql
                .contains(&format!("COUNT(DISTINCT {}.{column})", view_alias(view))));
        }
    }

    #[test]
    fn test_filter_summary() {
        let query = JoinQueryBuilder::default().build_count(
            &["patient_demographics".to_string(), "condition_simple".to_string()],
            &filters(&[("gender", "male")]),
            &[diabetes_filter()],
        );
        assert_eq!(query.filter_summary, "Gender: male, Condition: Diabetes mellitus");

        let empty = JoinQueryBuilder::default().build_count(
            &["patient_demographics".to_string()],
            &FilterMap::new(),
            &[],
        );
        assert_eq!(empty.filter_summary, "No filters");
    }
}
