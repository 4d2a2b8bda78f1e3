//! Schema inference for view definitions.
//!
//! A view's output schema is a pure function of the definition: an explicit
//! type hint wins, otherwise the column name decides.

use indexmap::IndexMap;

use crate::viewdef::{ColumnType, ViewDefinition};

/// Infer the output schema as an ordered `name -> type` map.
///
/// Name heuristics: `date`/`time` substrings mean datetime, `count`/`age`
/// mean integer, `value`/`score` mean float; everything else is string.
pub fn infer_schema(def: &ViewDefinition) -> IndexMap<String, ColumnType> {
    let mut schema = IndexMap::new();

    for col in def.flattened_columns() {
        let inferred = col.type_hint.unwrap_or_else(|| infer_from_name(&col.name));
        schema.insert(col.name.clone(), inferred);
    }

    schema
}

fn infer_from_name(name: &str) -> ColumnType {
    let lower = name.to_lowercase();

    if lower.contains("date") || lower.contains("time") {
        ColumnType::Datetime
    } else if lower.contains("count") || lower.contains("age") {
        ColumnType::Integer
    } else if lower.contains("value") || lower.contains("score") {
        ColumnType::Float
    } else {
        ColumnType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_heuristics() {
        let def: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "observation_labs",
            "resource": "Observation",
            "select": [{
                "column": [
                    {"name": "id", "path": "getResourceKey()"},
                    {"name": "effective_date", "path": "effectiveDateTime"},
                    {"name": "result_count", "path": "component.count()"},
                    {"name": "value", "path": "valueQuantity.value"},
                    {"name": "risk_score", "path": "riskScore"},
                    {"name": "code", "path": "code.text"}
                ]
            }]
        }))
        .unwrap();

        let schema = infer_schema(&def);
        assert_eq!(schema["id"], ColumnType::String);
        assert_eq!(schema["effective_date"], ColumnType::Datetime);
        assert_eq!(schema["result_count"], ColumnType::Integer);
        assert_eq!(schema["value"], ColumnType::Float);
        assert_eq!(schema["risk_score"], ColumnType::Float);
        assert_eq!(schema["code"], ColumnType::String);
    }

    #[test]
    fn test_explicit_hint_wins() {
        let def: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "hints",
            "resource": "Patient",
            "select": [{
                "column": [
                    {"name": "value", "path": "x", "type": "boolean"}
                ]
            }]
        }))
        .unwrap();

        assert_eq!(infer_schema(&def)["value"], ColumnType::Boolean);
    }

    #[test]
    fn test_declaration_order_preserved() {
        let def: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "ordered",
            "resource": "Patient",
            "select": [
                {"column": [{"name": "zulu", "path": "z"}]},
                {"forEach": "address", "column": [{"name": "alpha", "path": "city"}]}
            ]
        }))
        .unwrap();

        let keys: Vec<_> = infer_schema(&def).keys().cloned().collect();
        assert_eq!(keys, vec!["zulu", "alpha"]);
    }
}
