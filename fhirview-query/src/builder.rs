//! Query assembly from a view definition plus caller filters.
//!
//! Combines the extractor's projection, the document-version join, the
//! view's own predicates, the caller filter map, and the always-present
//! deletion/kind filters into a [`QueryPlan`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::columns::ColumnExtractor;
use crate::error::{EngineError, EngineResult};
use crate::plan::{quote_literal, QueryPlan, RESOURCE_ALIAS, VERSION_ALIAS};
use crate::viewdef::ViewDefinition;

/// A caller-supplied filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Text value; most filters are text.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Multiple alternatives, expanded to `IN` where supported.
    List(Vec<String>),
    /// Inclusive range with optional bounds.
    Range {
        /// Lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<String>,
        /// Upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<String>,
    },
}

impl FilterValue {
    /// Render a number without a trailing `.0` for whole values.
    pub fn format_number(value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        }
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

/// A flat filter map. Ordered so generated SQL and cache fingerprints are
/// deterministic.
pub type FilterMap = BTreeMap<String, FilterValue>;

/// Assembles query plans from view definitions.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Build the plan for a view definition, caller filters, and row cap.
    pub fn build(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        limit: Option<u64>,
    ) -> EngineResult<QueryPlan> {
        def.validate()?;
        let kind = def.resource_kind().to_string();

        let mut extractor = ColumnExtractor::default();
        let extracted = extractor.extract(&def.select)?;

        let mut predicates = extractor.extract_predicates(&def.where_);
        predicates.extend(self.filter_predicates(filters)?);
        predicates.push(format!("{RESOURCE_ALIAS}.res_deleted_at IS NULL"));
        predicates.push(format!(
            "{RESOURCE_ALIAS}.res_type = {}",
            quote_literal(&kind)
        ));

        Ok(QueryPlan {
            view_name: def.name.clone(),
            kind,
            columns: extracted.columns,
            lateral_joins: extracted.lateral_joins,
            predicates,
            limit,
        })
    }

    /// Translate the caller filter map into predicates.
    fn filter_predicates(&self, filters: &FilterMap) -> EngineResult<Vec<String>> {
        let doc = format!("{VERSION_ALIAS}.res_text_vc::jsonb");
        let mut predicates = Vec::new();

        for (key, value) in filters {
            let predicate = match key.as_str() {
                "_id" => match value {
                    FilterValue::Text(v) => {
                        format!("{RESOURCE_ALIAS}.res_id = {}", quote_literal(v))
                    }
                    FilterValue::Number(n) => {
                        format!("{RESOURCE_ALIAS}.res_id = {}", FilterValue::format_number(*n))
                    }
                    _ => return Err(unsupported(key, value)),
                },
                "gender" => match value {
                    FilterValue::Text(v) => {
                        format!("{doc}->>'gender' = {}", quote_literal(v))
                    }
                    _ => return Err(unsupported(key, value)),
                },
                "birthdate" | "birthdate_min" | "birthdate_max" => match value {
                    FilterValue::Text(v) => date_comparison(&format!("{doc}->>'birthDate'"), v),
                    _ => return Err(unsupported(key, value)),
                },
                "family" => match value {
                    FilterValue::Text(v) => format!(
                        "EXISTS (SELECT 1 FROM jsonb_array_elements({doc}->'name') AS name_elem \
                         WHERE name_elem->>'family' = {})",
                        quote_literal(v)
                    ),
                    _ => return Err(unsupported(key, value)),
                },
                other => {
                    warn!(param = other, "unknown search parameter, using generic field match");
                    match value {
                        FilterValue::Text(v) => {
                            format!("{doc}->>{} = {}", quote_literal(other), quote_literal(v))
                        }
                        FilterValue::Number(n) => format!(
                            "{doc}->>{} = {}",
                            quote_literal(other),
                            quote_literal(&FilterValue::format_number(*n))
                        ),
                        _ => return Err(unsupported(key, value)),
                    }
                }
            };
            predicates.push(predicate);
        }

        Ok(predicates)
    }
}

/// Parse a FHIR-style comparison prefix (`ge`, `le`, `gt`, `lt`, `eq`) off a
/// date value and emit the corresponding comparison; no prefix means exact
/// equality.
fn date_comparison(column: &str, value: &str) -> String {
    let (op, date) = match value {
        v if v.starts_with("ge") => (">=", &v[2..]),
        v if v.starts_with("le") => ("<=", &v[2..]),
        v if v.starts_with("gt") => (">", &v[2..]),
        v if v.starts_with("lt") => ("<", &v[2..]),
        v if v.starts_with("eq") => ("=", &v[2..]),
        v => ("=", v),
    };
    format!("{column} {op} {}", quote_literal(date))
}

fn unsupported(key: &str, value: &FilterValue) -> EngineError {
    EngineError::invalid_input(format!(
        "unsupported filter value for '{key}': {value:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn patient_view() -> ViewDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "patient_simple",
            "resource": "Patient",
            "select": [{
                "column": [
                    {"name": "id", "path": "getResourceKey()"},
                    {"name": "gender", "path": "gender"},
                    {"name": "birth_date", "path": "birthDate"}
                ]
            }]
        }))
        .unwrap()
    }

    fn filters(pairs: &[(&str, FilterValue)]) -> FilterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_build_full_query() {
        let builder = QueryBuilder::new();
        let plan = builder
            .build(
                &patient_view(),
                &filters(&[("gender", "female".into())]),
                Some(10),
            )
            .unwrap();

        let sql = plan.render();
        assert!(sql.contains("v.res_text_vc::jsonb->>'id' AS id"));
        assert!(sql.contains("FROM hfj_resource r"));
        assert!(sql.contains("JOIN hfj_res_ver v ON r.res_id = v.res_id AND r.res_ver = v.res_ver"));
        assert!(sql.contains("v.res_text_vc::jsonb->>'gender' = 'female'"));
        assert!(sql.contains("r.res_deleted_at IS NULL"));
        assert!(sql.contains("r.res_type = 'Patient'"));
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_deletion_and_kind_filters_always_present() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &FilterMap::new(), None)
            .unwrap();
        let sql = plan.render();
        assert!(sql.contains("r.res_deleted_at IS NULL"));
        assert!(sql.contains("r.res_type = 'Patient'"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_id_filter() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &filters(&[("_id", "42".into())]), None)
            .unwrap();
        assert!(plan.render().contains("r.res_id = '42'"));
    }

    #[test]
    fn test_birthdate_prefixes() {
        let cases = [
            ("ge1995-01-01", ">= '1995-01-01'"),
            ("le2005-12-31", "<= '2005-12-31'"),
            ("gt1990-06-15", "> '1990-06-15'"),
            ("lt2000-01-01", "< '2000-01-01'"),
            ("eq1980-03-03", "= '1980-03-03'"),
            ("1999-09-09", "= '1999-09-09'"),
        ];

        for (input, expected) in cases {
            let plan = QueryBuilder::new()
                .build(&patient_view(), &filters(&[("birthdate", input.into())]), None)
                .unwrap();
            let sql = plan.render();
            assert!(
                sql.contains(&format!("v.res_text_vc::jsonb->>'birthDate' {expected}")),
                "case {input}: {sql}"
            );
        }
    }

    #[test]
    fn test_birthdate_min_and_max_coexist() {
        let plan = QueryBuilder::new()
            .build(
                &patient_view(),
                &filters(&[
                    ("birthdate_min", "ge1990-01-01".into()),
                    ("birthdate_max", "le2000-01-01".into()),
                ]),
                None,
            )
            .unwrap();

        let sql = plan.render();
        assert!(sql.contains(">= '1990-01-01'"));
        assert!(sql.contains("<= '2000-01-01'"));
    }

    #[test]
    fn test_family_filter_searches_name_array() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &filters(&[("family", "Smith".into())]), None)
            .unwrap();
        assert!(plan.render().contains(
            "EXISTS (SELECT 1 FROM jsonb_array_elements(v.res_text_vc::jsonb->'name') \
             AS name_elem WHERE name_elem->>'family' = 'Smith')"
        ));
    }

    #[test]
    fn test_generic_filter_matches_root_field() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &filters(&[("active", "true".into())]), None)
            .unwrap();
        assert!(plan
            .render()
            .contains("v.res_text_vc::jsonb->>'active' = 'true'"));
    }

    #[test]
    fn test_literal_values_are_escaped() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &filters(&[("family", "O'Brien".into())]), None)
            .unwrap();
        assert!(plan.render().contains("= 'O''Brien'"));
    }

    #[test]
    fn test_list_filter_is_rejected() {
        let err = QueryBuilder::new()
            .build(
                &patient_view(),
                &filters(&[("gender", vec!["male".to_string()].into())]),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_cap_zero_renders_limit_zero() {
        let plan = QueryBuilder::new()
            .build(&patient_view(), &FilterMap::new(), Some(0))
            .unwrap();
        assert!(plan.render().ends_with("LIMIT 0"));
    }

    #[test]
    fn test_count_variant() {
        let plan = QueryBuilder::new()
            .build(
                &patient_view(),
                &filters(&[("gender", "male".into())]),
                Some(5),
            )
            .unwrap();

        let sql = plan.render_count();
        assert!(sql.starts_with("SELECT COUNT(DISTINCT r.res_id) AS count"));
        assert!(sql.contains("v.res_text_vc::jsonb->>'gender' = 'male'"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_view_where_clauses_are_included() {
        let view: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "active_patients",
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "getResourceKey()"}]}],
            "where": [{"path": "birthDate.exists()"}]
        }))
        .unwrap();

        let plan = QueryBuilder::new().build(&view, &FilterMap::new(), None).unwrap();
        assert!(plan
            .render()
            .contains("((v.res_text_vc::jsonb->'birthDate' IS NOT NULL))"));
    }

    #[test]
    fn test_filter_value_untagged_deserialization() {
        let v: FilterValue = serde_json::from_value(serde_json::json!("female")).unwrap();
        assert_eq!(v, FilterValue::Text("female".to_string()));

        let v: FilterValue = serde_json::from_value(serde_json::json!(5)).unwrap();
        assert_eq!(v, FilterValue::Number(5.0));

        let v: FilterValue = serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(v, FilterValue::List(vec!["a".to_string(), "b".to_string()]));

        let v: FilterValue =
            serde_json::from_value(serde_json::json!({"start": "2020-01-01"})).unwrap();
        assert_eq!(
            v,
            FilterValue::Range {
                start: Some("2020-01-01".to_string()),
                end: None
            }
        );
    }
}
