//! Cohort join planning across materialized views.

use fhirview::{Aggregation, CodedFilter, FilterMap, JoinQueryBuilder};

fn filters(pairs: &[(&str, &str)]) -> FilterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).into()))
        .collect()
}

#[test]
fn male_patients_with_diabetes() {
    let planner = JoinQueryBuilder::default();
    let query = planner.build_count(
        &[
            "patient_demographics".to_string(),
            "condition_simple".to_string(),
        ],
        &filters(&[("gender", "Male")]),
        &[CodedFilter {
            field: "icd10_code".to_string(),
            value: "E11%".to_string(),
            condition_name: Some("Diabetes mellitus".to_string()),
            use_like: true,
            ..Default::default()
        }],
    );

    // One join keyed by subject id.
    assert_eq!(query.sql.matches("JOIN").count(), 1);
    assert!(query.sql.contains("ON p.patient_id = c.patient_id"));

    // Demographic predicate lowers the gender on both sides.
    assert!(query.sql.contains("LOWER(p.gender) = 'male'"));

    // The coded predicate is a parenthesized disjunction: the LIKE on the
    // code column plus a case-insensitive substring on the code text using
    // the condition's core term.
    assert!(query.sql.contains("(c.icd10_code LIKE 'E11%' OR "));
    assert!(query.sql.contains("c.code_text ILIKE '%diabetes%'"));
}

#[test]
fn breakdown_by_age_group_orders_dimensions() {
    let planner = JoinQueryBuilder::default();
    let query = planner.build_breakdown(
        &[
            "patient_demographics".to_string(),
            "condition_simple".to_string(),
        ],
        &filters(&[("birthdate_min", "ge1950-01-01")]),
        &[],
        &["age_group".to_string()],
        Aggregation::Count,
    );

    assert!(query.sql.contains("ELSE '70+' END AS age_group"));
    assert!(query.sql.contains("COUNT(DISTINCT p.patient_id) AS count"));
    assert!(query.sql.contains("p.dob >= '1950-01-01'"));
    assert!(query.sql.contains("GROUP BY age_group"));
    assert!(query.sql.contains("ORDER BY age_group"));
}

#[test]
fn text_search_fallback_skips_coded_branch() {
    let planner = JoinQueryBuilder::default();
    let query = planner.build_count(
        &[
            "patient_demographics".to_string(),
            "condition_simple".to_string(),
        ],
        &FilterMap::new(),
        &[CodedFilter {
            field: "code_text".to_string(),
            condition_name: Some("Long covid".to_string()),
            use_text_search: true,
            ..Default::default()
        }],
    );

    assert!(query.sql.contains("c.code_text ILIKE '%Long covid%'"));
    assert!(!query.sql.contains("icd10_code"));
}
