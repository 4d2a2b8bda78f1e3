//! End-to-end SQL generation: view definition JSON in, executable SQL out.

use fhirview::{infer_schema, ColumnType, FilterMap, QueryBuilder, ViewDefinition};
use pretty_assertions::assert_eq;

fn patient_simple() -> ViewDefinition {
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

fn filters(pairs: &[(&str, &str)]) -> FilterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).into()))
        .collect()
}

#[test]
fn simple_projection_generates_complete_query() {
    let plan = QueryBuilder::new()
        .build(&patient_simple(), &filters(&[("gender", "female")]), Some(10))
        .unwrap();
    let sql = plan.render();

    assert_eq!(plan.column_names(), vec!["id", "gender", "birth_date"]);
    assert!(sql.contains("v.res_text_vc::jsonb->>'id' AS id"));
    assert!(sql.contains("JOIN hfj_res_ver v ON r.res_id = v.res_id AND r.res_ver = v.res_ver"));
    assert!(sql.contains("v.res_text_vc::jsonb->>'gender' = 'female'"));
    assert!(sql.contains("r.res_deleted_at IS NULL"));
    assert!(sql.contains("r.res_type = 'Patient'"));
    assert!(sql.ends_with("LIMIT 10"));
}

#[test]
fn row_and_count_queries_share_predicates() {
    let filters = filters(&[("gender", "male"), ("birthdate_min", "ge1980-01-01")]);
    let plan = QueryBuilder::new()
        .build(&patient_simple(), &filters, Some(50))
        .unwrap();

    let rows_sql = plan.render();
    let count_sql = plan.render_count();

    for predicate in [
        "v.res_text_vc::jsonb->>'gender' = 'male'",
        "v.res_text_vc::jsonb->>'birthDate' >= '1980-01-01'",
        "r.res_deleted_at IS NULL",
        "r.res_type = 'Patient'",
    ] {
        assert!(rows_sql.contains(predicate), "rows missing {predicate}");
        assert!(count_sql.contains(predicate), "count missing {predicate}");
    }

    assert!(count_sql.starts_with("SELECT COUNT(DISTINCT r.res_id) AS count"));
    assert!(!count_sql.contains("LIMIT"));
}

#[test]
fn for_each_scopes_choose_join_flavor() {
    let view: ViewDefinition = serde_json::from_value(serde_json::json!({
        "name": "patient_addresses",
        "resource": "Patient",
        "select": [
            {"column": [{"name": "id", "path": "getResourceKey()"}]},
            {"forEach": "address", "column": [{"name": "city", "path": "city"}]},
            {"forEachOrNull": "telecom", "column": [{"name": "phone", "path": "value"}]}
        ]
    }))
    .unwrap();

    let plan = QueryBuilder::new().build(&view, &FilterMap::new(), None).unwrap();
    let sql = plan.render();

    // forEach drops rows on empty arrays, forEachOrNull preserves them.
    assert!(sql.contains(
        "CROSS JOIN LATERAL jsonb_array_elements(\
         COALESCE(v.res_text_vc::jsonb->'address', '[]'::jsonb)) AS foreach_1"
    ));
    assert!(sql.contains(
        "LEFT JOIN LATERAL jsonb_array_elements(\
         COALESCE(v.res_text_vc::jsonb->'telecom', '[]'::jsonb)) AS foreach_2 ON true"
    ));
    assert!(sql.contains("foreach_1->>'city' AS city"));
    assert!(sql.contains("foreach_2->>'value' AS phone"));
}

#[test]
fn where_subquery_paths_flow_into_projection() {
    let view: ViewDefinition = serde_json::from_value(serde_json::json!({
        "name": "condition_codes",
        "resource": "Condition",
        "select": [{
            "column": [
                {"name": "id", "path": "getResourceKey()"},
                {"name": "loinc", "path": "code.coding.where(system='http://loinc.org').code"}
            ]
        }]
    }))
    .unwrap();

    let plan = QueryBuilder::new().build(&view, &FilterMap::new(), None).unwrap();
    let sql = plan.render();

    assert!(sql.contains("SELECT elem_1->>'code' FROM jsonb_array_elements("));
    assert!(sql.contains("elem_1->>'system' = 'http://loinc.org' LIMIT 1"));
    assert!(sql.contains("r.res_type = 'Condition'"));
}

#[test]
fn duplicate_columns_are_rejected() {
    let view: ViewDefinition = serde_json::from_value(serde_json::json!({
        "name": "dupes",
        "resource": "Patient",
        "select": [
            {"column": [{"name": "gender", "path": "gender"}]},
            {"forEach": "name", "column": [{"name": "gender", "path": "family"}]}
        ]
    }))
    .unwrap();

    assert!(QueryBuilder::new().build(&view, &FilterMap::new(), None).is_err());
}

#[test]
fn cap_zero_limits_to_nothing_and_no_cap_means_all_rows() {
    let builder = QueryBuilder::new();

    let capped = builder.build(&patient_simple(), &FilterMap::new(), Some(0)).unwrap();
    assert!(capped.render().ends_with("LIMIT 0"));

    let uncapped = builder.build(&patient_simple(), &FilterMap::new(), None).unwrap();
    assert!(!uncapped.render().contains("LIMIT"));
}

#[test]
fn schema_matches_projection_names_in_order() {
    let schema = infer_schema(&patient_simple());
    let names: Vec<_> = schema.keys().cloned().collect();
    assert_eq!(names, vec!["id", "gender", "birth_date"]);
    assert_eq!(schema["birth_date"], ColumnType::Datetime);
    assert_eq!(schema["gender"], ColumnType::String);
}
