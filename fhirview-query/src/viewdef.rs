//! View-definition model.
//!
//! A view definition is a declarative tabular projection over one document
//! kind: a named list of projection scopes (root columns, `forEach` /
//! `forEachOrNull` array scopes, nested selects), plus optional path
//! predicates. Definitions are plain JSON documents; this module is the
//! serde model plus the structural validation the planner relies on.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A declarative tabular projection over a document kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// View name, unique per namespace.
    pub name: String,
    /// Document kind this view projects (e.g. `Patient`, `Condition`).
    #[serde(default)]
    pub resource: String,
    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered projection scopes.
    #[serde(default)]
    pub select: Vec<SelectNode>,
    /// Optional path predicates, ANDed together.
    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub where_: Vec<WhereClause>,
}

/// One projection scope: a root column list, an array-iteration scope, or a
/// nested select inheriting the parent scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectNode {
    /// Columns projected at this scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column: Vec<ColumnSpec>,
    /// Iterate over each element of this array path; zero matching elements
    /// produce zero rows.
    #[serde(default, rename = "forEach", skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,
    /// Like `forEach`, but an empty array still yields one row with nulls.
    #[serde(
        default,
        rename = "forEachOrNull",
        skip_serializing_if = "Option::is_none"
    )]
    pub for_each_or_null: Option<String>,
    /// Nested scopes, evaluated in this scope's context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<SelectNode>,
    /// Legacy source hint; only consulted when the definition has no
    /// top-level `resource`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// A single projected column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, unique within the flattened projection.
    pub name: String,
    /// Path expression into the document tree.
    pub path: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Advisory type hint; never enforced against values.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<ColumnType>,
}

/// Advisory column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Text (the default).
    String,
    /// Whole number.
    Integer,
    /// Floating point number.
    Float,
    /// Date or timestamp.
    Datetime,
    /// Boolean.
    Boolean,
}

impl ColumnType {
    /// Lowercase label used in schema maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
        }
    }
}

/// One ANDed predicate on the view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereClause {
    /// Path expression that must evaluate truthy.
    pub path: String,
    /// Optional description, carried into generated SQL as a comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ViewDefinition {
    /// The document kind this view reads.
    ///
    /// Uses the top-level `resource` field; falls back to the first scope's
    /// `from` prefix, then to `Patient`.
    pub fn resource_kind(&self) -> &str {
        if !self.resource.is_empty() {
            return &self.resource;
        }
        if let Some(from) = self.select.first().and_then(|s| s.from.as_deref()) {
            return from.split('.').next().unwrap_or(from);
        }
        "Patient"
    }

    /// All column specs in declaration order, flattening every scope.
    pub fn flattened_columns(&self) -> Vec<&ColumnSpec> {
        fn walk<'a>(nodes: &'a [SelectNode], out: &mut Vec<&'a ColumnSpec>) {
            for node in nodes {
                out.extend(node.column.iter());
                walk(&node.select, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.select, &mut out);
        out
    }

    /// Validate structural invariants: a non-empty name and unique column
    /// names across the flattened projection.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_input("view definition has no name"));
        }
        let mut seen = std::collections::HashSet::new();
        for col in self.flattened_columns() {
            if !seen.insert(col.name.as_str()) {
                return Err(EngineError::invalid_input(format!(
                    "duplicate column name '{}' in view '{}'",
                    col.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Render a readable pseudo-SQL description of this view.
    ///
    /// Not executable; used for display (CLI `views show`, logs).
    pub fn describe_sql(&self) -> String {
        let mut header = format!("-- ViewDefinition: {}\n", self.name);
        if let Some(title) = &self.title {
            header.push_str(&format!("-- {}\n", title));
        }
        if let Some(desc) = &self.description {
            header.push_str(&format!("-- {}\n", desc));
        }
        header.push('\n');

        let mut columns = Vec::new();
        describe_columns(&self.select, "", &mut columns);
        let select_clause = if columns.is_empty() {
            "SELECT 1".to_string()
        } else {
            format!("SELECT\n  {}", columns.join(",\n  "))
        };

        let mut sql = format!("{header}{select_clause}\nFROM {}", self.resource_kind());

        if !self.where_.is_empty() {
            let conditions: Vec<String> = self
                .where_
                .iter()
                .map(|w| match &w.description {
                    Some(desc) => format!("{}  -- {}", w.path, desc),
                    None => w.path.clone(),
                })
                .collect();
            sql.push_str(&format!("\nWHERE\n  {}", conditions.join(" AND\n  ")));
        }

        sql.push(';');
        sql
    }
}

fn describe_columns(nodes: &[SelectNode], prefix: &str, out: &mut Vec<String>) {
    for node in nodes {
        let scope = node
            .for_each
            .as_deref()
            .map(|p| ("forEach", p))
            .or_else(|| node.for_each_or_null.as_deref().map(|p| ("forEachOrNull", p)));

        for col in &node.column {
            let mut comment = match scope {
                Some((kind, path)) => format!(" -- {kind}({path}) -> {}", col.path),
                None => format!(" -- {}", col.path),
            };
            if let Some(desc) = &col.description {
                comment.push_str(&format!(" | {desc}"));
            }
            out.push(format!("{prefix}{}{comment}", col.name));
        }

        describe_columns(&node.select, &format!("{prefix}  "), out);
    }
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
                    {"name": "birth_date", "path": "birthDate", "type": "datetime"}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_and_validate() {
        let view = patient_view();
        assert_eq!(view.name, "patient_simple");
        assert_eq!(view.resource_kind(), "Patient");
        assert!(view.validate().is_ok());

        let names: Vec<_> = view.flattened_columns().iter().map(|c| &c.name).collect();
        assert_eq!(names, vec!["id", "gender", "birth_date"]);
        assert_eq!(
            view.flattened_columns()[2].type_hint,
            Some(ColumnType::Datetime)
        );
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let view: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "dupes",
            "resource": "Patient",
            "select": [
                {"column": [{"name": "id", "path": "id"}]},
                {"forEach": "name", "column": [{"name": "id", "path": "family"}]}
            ]
        }))
        .unwrap();

        let err = view.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate column name 'id'"));
    }

    #[test]
    fn test_resource_kind_fallbacks() {
        let view: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "obs",
            "select": [{"from": "Observation.component", "column": []}]
        }))
        .unwrap();
        assert_eq!(view.resource_kind(), "Observation");

        let view: ViewDefinition =
            serde_json::from_value(serde_json::json!({"name": "empty"})).unwrap();
        assert_eq!(view.resource_kind(), "Patient");
    }

    #[test]
    fn test_nested_select_columns_flatten_in_order() {
        let view: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "nested",
            "resource": "Patient",
            "select": [{
                "column": [{"name": "id", "path": "getResourceKey()"}],
                "select": [{"column": [{"name": "city", "path": "address.city"}]}]
            }]
        }))
        .unwrap();

        let names: Vec<_> = view.flattened_columns().iter().map(|c| &c.name).collect();
        assert_eq!(names, vec!["id", "city"]);
    }

    #[test]
    fn test_describe_sql() {
        let mut view = patient_view();
        view.title = Some("Basic patient projection".to_string());
        view.where_ = vec![WhereClause {
            path: "active = true".to_string(),
            description: Some("live patients only".to_string()),
        }];

        let sql = view.describe_sql();
        assert!(sql.starts_with("-- ViewDefinition: patient_simple\n"));
        assert!(sql.contains("-- Basic patient projection"));
        assert!(sql.contains("gender -- gender"));
        assert!(sql.contains("FROM Patient"));
        assert!(sql.contains("active = true  -- live patients only"));
        assert!(sql.ends_with(';'));
    }

    #[test]
    fn test_describe_sql_annotates_foreach() {
        let view: ViewDefinition = serde_json::from_value(serde_json::json!({
            "name": "patient_names",
            "resource": "Patient",
            "select": [{
                "forEach": "name",
                "column": [{"name": "family", "path": "family"}]
            }]
        }))
        .unwrap();

        assert!(view
            .describe_sql()
            .contains("family -- forEach(name) -> family"));
    }

    #[test]
    fn test_roundtrip_preserves_shape() {
        let view = patient_view();
        let json = serde_json::to_value(&view).unwrap();
        let back: ViewDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.flattened_columns().len(), 3);
        assert_eq!(back.resource, "Patient");
    }
}
