//! Query plan algebra and SQL rendering.
//!
//! A [`QueryPlan`] is a small algebra of nodes: projection items, the fixed
//! metadata/version join, ordered lateral joins, ANDed predicates, and an
//! optional row cap. Plans are assembled by the builder and rendered to SQL
//! exactly once, in [`QueryPlan::render`] / [`QueryPlan::render_count`].

use crate::columns::{ColumnDef, LateralJoin};

/// Metadata table holding one row per document (id, kind, current version,
/// deletion stamp).
pub const RESOURCE_TABLE: &str = "hfj_resource";
/// Version table holding the JSON document body per `(id, version)`.
pub const VERSION_TABLE: &str = "hfj_res_ver";
/// Alias of the metadata table in generated queries.
pub const RESOURCE_ALIAS: &str = "r";
/// Alias of the version table in generated queries.
pub const VERSION_ALIAS: &str = "v";

/// Escape a string for use as a SQL identifier (not a value).
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check if an identifier needs quoting.
pub fn needs_quoting(name: &str) -> bool {
    let reserved = [
        "user", "order", "group", "select", "from", "where", "table", "index", "key", "primary",
        "check", "default", "null", "not", "and", "or", "in", "is", "like", "between", "case",
        "when", "then", "else", "end", "as", "on", "join", "left", "right", "cross", "limit",
        "offset", "union", "all", "distinct", "having", "count", "value",
    ];

    if reserved.contains(&name.to_lowercase().as_str()) {
        return true;
    }

    !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote an identifier if needed.
pub fn quote_identifier(name: &str) -> String {
    if needs_quoting(name) {
        escape_identifier(name)
    } else {
        name.to_string()
    }
}

/// Quote a string literal for interpolation into generated SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// An assembled query plan over the document store.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Name of the view definition this plan serves.
    pub view_name: String,
    /// Document kind being projected.
    pub kind: String,
    /// Projection in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Lateral joins in scope order.
    pub lateral_joins: Vec<LateralJoin>,
    /// Predicates, ANDed. Always includes the deletion and kind filters.
    pub predicates: Vec<String>,
    /// Optional row cap.
    pub limit: Option<u64>,
}

impl QueryPlan {
    /// Projection column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// True when any projection scope required a lateral join.
    pub fn has_lateral_joins(&self) -> bool {
        !self.lateral_joins.is_empty()
    }

    /// The document-version join every plan reads from.
    fn from_clause() -> String {
        format!(
            "FROM {res} {r}\nJOIN {ver} {v} ON {r}.res_id = {v}.res_id AND {r}.res_ver = {v}.res_ver",
            res = RESOURCE_TABLE,
            ver = VERSION_TABLE,
            r = RESOURCE_ALIAS,
            v = VERSION_ALIAS,
        )
    }

    fn where_clause(&self) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        Some(format!(
            "WHERE\n    {}",
            self.predicates.join("\n    AND ")
        ))
    }

    /// Render the row-returning query.
    pub fn render(&self) -> String {
        let select = if self.columns.is_empty() {
            "SELECT 1".to_string()
        } else {
            let items: Vec<String> = self
                .columns
                .iter()
                .map(|c| format!("    {} AS {}", c.sql, quote_identifier(&c.name)))
                .collect();
            format!("SELECT\n{}", items.join(",\n"))
        };

        let mut parts = vec![select, Self::from_clause()];
        for join in &self.lateral_joins {
            parts.push(join.render());
        }
        if let Some(where_clause) = self.where_clause() {
            parts.push(where_clause);
        }
        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {limit}"));
        }

        parts.join("\n")
    }

    /// Render the distinct-cardinality variant.
    ///
    /// Projects `COUNT(DISTINCT r.res_id)` and drops the lateral joins: no
    /// recognized predicate can reference an iteration alias, so they are
    /// never required for filtering.
    pub fn render_count(&self) -> String {
        let mut parts = vec![
            format!("SELECT COUNT(DISTINCT {RESOURCE_ALIAS}.res_id) AS count"),
            Self::from_clause(),
        ];
        if let Some(where_clause) = self.where_clause() {
            parts.push(where_clause);
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::LateralKind;
    use pretty_assertions::assert_eq;

    fn plan() -> QueryPlan {
        QueryPlan {
            view_name: "patient_simple".to_string(),
            kind: "Patient".to_string(),
            columns: vec![
                ColumnDef {
                    name: "id".to_string(),
                    sql: "v.res_text_vc::jsonb->>'id'".to_string(),
                    nullable: false,
                },
                ColumnDef {
                    name: "gender".to_string(),
                    sql: "v.res_text_vc::jsonb->>'gender'".to_string(),
                    nullable: false,
                },
            ],
            lateral_joins: vec![],
            predicates: vec![
                "r.res_deleted_at IS NULL".to_string(),
                "r.res_type = 'Patient'".to_string(),
            ],
            limit: Some(10),
        }
    }

    #[test]
    fn test_render_full_query() {
        let sql = plan().render();
        assert_eq!(
            sql,
            "SELECT\n    v.res_text_vc::jsonb->>'id' AS id,\n    \
             v.res_text_vc::jsonb->>'gender' AS gender\n\
             FROM hfj_resource r\n\
             JOIN hfj_res_ver v ON r.res_id = v.res_id AND r.res_ver = v.res_ver\n\
             WHERE\n    r.res_deleted_at IS NULL\n    AND r.res_type = 'Patient'\n\
             LIMIT 10"
        );
    }

    #[test]
    fn test_render_includes_lateral_joins_in_order() {
        let mut p = plan();
        p.lateral_joins = vec![
            LateralJoin {
                kind: LateralKind::Cross,
                body: "jsonb_array_elements(x) AS foreach_1".to_string(),
                alias: "foreach_1".to_string(),
            },
            LateralJoin {
                kind: LateralKind::Left,
                body: "jsonb_array_elements(y) AS foreach_2".to_string(),
                alias: "foreach_2".to_string(),
            },
        ];

        let sql = p.render();
        let cross = sql.find("CROSS JOIN LATERAL").unwrap();
        let left = sql.find("LEFT JOIN LATERAL").unwrap();
        assert!(cross < left);
        assert!(sql.find("WHERE").unwrap() > left);
    }

    #[test]
    fn test_render_count_drops_laterals_and_limit() {
        let mut p = plan();
        p.lateral_joins = vec![LateralJoin {
            kind: LateralKind::Cross,
            body: "jsonb_array_elements(x) AS foreach_1".to_string(),
            alias: "foreach_1".to_string(),
        }];

        let sql = p.render_count();
        assert!(sql.starts_with("SELECT COUNT(DISTINCT r.res_id) AS count"));
        assert!(!sql.contains("LATERAL"));
        assert!(!sql.contains("LIMIT"));
        assert!(sql.contains("r.res_type = 'Patient'"));
    }

    #[test]
    fn test_empty_projection_renders_select_one() {
        let mut p = plan();
        p.columns.clear();
        assert!(p.render().starts_with("SELECT 1\n"));
    }

    #[test]
    fn test_reserved_column_names_are_quoted() {
        let mut p = plan();
        p.columns[1].name = "value".to_string();
        assert!(p.render().contains("AS \"value\""));
    }

    #[test]
    fn test_identifier_helpers() {
        assert_eq!(escape_identifier("has\"quote"), "\"has\"\"quote\"");
        assert!(needs_quoting("order"));
        assert!(needs_quoting("has space"));
        assert!(!needs_quoting("patient_id"));
        assert_eq!(quote_identifier("gender"), "gender");
        assert_eq!(quote_identifier("select"), "\"select\"");
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }
}
