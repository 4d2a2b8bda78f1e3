//! Path-expression transpiler.
//!
//! Rewrites the restricted tree-path language used by view definitions into
//! PostgreSQL JSONB expressions over the version table's document column.
//! Supported constructs: member access, the arrays-by-convention implicit
//! first-element index, `first()`, `exists()`, `count()`, `empty()`,
//! single-field equality `where()` filters, and string concatenation with
//! `+`.
//!
//! Example conversions:
//!
//! ```text
//! name.family                       v.res_text_vc::jsonb->0->'name'->>'family'
//! code.coding.where(system='x').y   (SELECT elem_1->>'y' FROM jsonb_array_elements(...) ...)
//! ```

use regex_lite::Regex;
use tracing::warn;

/// Field names treated as arrays by convention: when one appears in a plain
/// member chain it gets an implicit first-element index. View definitions
/// rely on this set; changing it is a breaking change.
pub const ARRAY_FIELDS: [&str; 5] = ["name", "address", "telecom", "identifier", "coding"];

/// A transpiled path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    /// The original path expression.
    pub path: String,
    /// The emitted SQL.
    pub sql: String,
    /// True when the emission is a correlated subquery (from `where()`).
    pub requires_subquery: bool,
    /// Alias generated for the unnested array element, if any.
    pub array_alias: Option<String>,
}

impl PathExpr {
    fn plain(path: &str, sql: String) -> Self {
        Self {
            path: path.to_string(),
            sql,
            requires_subquery: false,
            array_alias: None,
        }
    }
}

/// Transpiles path expressions to JSONB SQL.
///
/// The alias counter lives on the value, so a fresh transpiler restarts
/// numbering and produces deterministic SQL.
#[derive(Debug, Clone)]
pub struct PathTranspiler {
    resource_alias: String,
    resource_column: String,
    array_counter: u32,
}

impl Default for PathTranspiler {
    fn default() -> Self {
        Self::new("v", "res_text_vc")
    }
}

impl PathTranspiler {
    /// Create a transpiler targeting the given version-table alias and
    /// document column.
    pub fn new(resource_alias: impl Into<String>, resource_column: impl Into<String>) -> Self {
        Self {
            resource_alias: resource_alias.into(),
            resource_column: resource_column.into(),
            array_counter: 0,
        }
    }

    /// The root document expression (`<alias>.<column>::jsonb`).
    pub fn document_root(&self) -> String {
        format!("{}.{}::jsonb", self.resource_alias, self.resource_column)
    }

    /// Transpile a path expression.
    ///
    /// `as_text` selects text extraction (`->>`) for the final step;
    /// `context` stands in for the current element during array iteration.
    pub fn transpile(&mut self, path: &str, as_text: bool, context: Option<&str>) -> PathExpr {
        let path = path.trim();

        if path.is_empty() || path == "." {
            let sql = context
                .map(str::to_string)
                .unwrap_or_else(|| self.document_root());
            return PathExpr::plain(path, sql);
        }

        // Already-emitted SQL passes through untouched, so re-transpiling
        // generated expressions is a no-op.
        if path.contains("->") {
            return PathExpr::plain(path, path.to_string());
        }

        if path.contains(" + ") {
            return self.transpile_concatenation(path, context);
        }

        if path.contains(".where(") {
            return self.transpile_where(path, as_text, context);
        }

        if path.contains(".first()") {
            return self.transpile_first(path, context);
        }

        if path.contains(".exists()") {
            return self.transpile_exists(path, context);
        }

        if path.contains(".count()") {
            return self.transpile_count(path, context);
        }

        if path.contains(".empty()") {
            return self.transpile_empty(path, context);
        }

        self.transpile_simple(path, as_text, context)
    }

    /// Transpile an array-iteration scope path (`forEach` / `forEachOrNull`).
    ///
    /// Explicit iteration suppresses the arrays-by-convention index: the
    /// caller is about to unnest the array itself, so `name` must resolve to
    /// the whole array, not its first element.
    pub fn transpile_scope(&mut self, path: &str, context: Option<&str>) -> PathExpr {
        let path = path.trim();

        if path.contains(".where(") {
            return self.transpile_where(path, false, context);
        }

        if path.contains(".first()") {
            let base_path = path.replace(".first()", "");
            let base = self.chain(&base_path, false, context, false);
            return PathExpr::plain(path, format!("({})->0", base.sql));
        }

        self.chain(path, false, context, false)
    }

    fn base(&self, context: Option<&str>) -> String {
        context
            .map(str::to_string)
            .unwrap_or_else(|| self.document_root())
    }

    /// Plain member chain like `name.family` or `birthDate`, applying the
    /// arrays-by-convention first-element index.
    fn transpile_simple(&self, path: &str, as_text: bool, context: Option<&str>) -> PathExpr {
        self.chain(path, as_text, context, true)
    }

    fn chain(
        &self,
        path: &str,
        as_text: bool,
        context: Option<&str>,
        array_convention: bool,
    ) -> PathExpr {
        let mut sql = self.base(context);
        let segments: Vec<&str> = path.split('.').collect();

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;

            let field = match segment.strip_suffix("()") {
                Some(name) => {
                    warn!(path, function = *segment, "unknown path function, treating as field");
                    name
                }
                None => segment,
            };

            // Arrays-by-convention get an implicit first-element index
            // before the member access.
            if array_convention && ARRAY_FIELDS.contains(&field) {
                sql.push_str("->0");
            }

            if is_last && as_text {
                sql.push_str(&format!("->>'{field}'"));
            } else {
                sql.push_str(&format!("->'{field}'"));
            }
        }

        PathExpr::plain(path, sql)
    }

    /// `arr.where(field='lit').tail` becomes a one-row unnest subquery.
    fn transpile_where(&mut self, path: &str, as_text: bool, context: Option<&str>) -> PathExpr {
        let re = Regex::new(r"^(.+?)\.where\((.+?)\)(?:\.(.+))?$").unwrap();
        let Some(caps) = re.captures(path) else {
            warn!(path, "could not parse where clause");
            return self.transpile_simple(path, as_text, context);
        };

        let array_path = caps.get(1).unwrap().as_str();
        let condition = caps.get(2).unwrap().as_str();
        let result_path = caps.get(3).map(|m| m.as_str());

        self.array_counter += 1;
        let alias = format!("elem_{}", self.array_counter);

        let mut array_sql = self.base(context);
        for part in array_path.split('.') {
            array_sql.push_str(&format!("->'{part}'"));
        }

        let condition_sql = parse_where_condition(condition, &alias);

        let select_expr = match result_path {
            Some(field) if as_text => format!("{alias}->>'{field}'"),
            Some(field) => format!("{alias}->'{field}'"),
            None => alias.clone(),
        };

        let sql = format!(
            "(SELECT {select_expr} FROM jsonb_array_elements({array_sql}) AS {alias} \
             WHERE {condition_sql} LIMIT 1)"
        );

        PathExpr {
            path: path.to_string(),
            sql,
            requires_subquery: true,
            array_alias: Some(alias),
        }
    }

    fn transpile_first(&self, path: &str, context: Option<&str>) -> PathExpr {
        let base_path = path.replace(".first()", "");
        let base = self.transpile_simple(&base_path, false, context);
        PathExpr::plain(path, format!("({})->0", base.sql))
    }

    fn transpile_exists(&self, path: &str, context: Option<&str>) -> PathExpr {
        let base_path = path.replace(".exists()", "");
        let base = self.transpile_simple(&base_path, false, context);
        PathExpr::plain(path, format!("({} IS NOT NULL)", base.sql))
    }

    fn transpile_count(&self, path: &str, context: Option<&str>) -> PathExpr {
        let base_path = path.replace(".count()", "");
        let base = self.transpile_simple(&base_path, false, context);
        PathExpr::plain(path, format!("jsonb_array_length({})", base.sql))
    }

    fn transpile_empty(&self, path: &str, context: Option<&str>) -> PathExpr {
        let base_path = path.replace(".empty()", "");
        let base = self.transpile_simple(&base_path, false, context);
        PathExpr::plain(
            path,
            format!("({sql} IS NULL OR {sql} = '[]'::jsonb)", sql = base.sql),
        )
    }

    /// `a + ' ' + b` becomes `||` concatenation; non-literal operands are
    /// coalesced to `''` so a missing field does not null the whole string.
    fn transpile_concatenation(&mut self, path: &str, context: Option<&str>) -> PathExpr {
        let mut parts = Vec::new();

        for part in path.split(" + ") {
            let part = part.trim();
            if part.starts_with('\'') && part.ends_with('\'') && part.len() >= 2 {
                parts.push(part.to_string());
            } else {
                let expr = self.transpile(part, true, context);
                parts.push(format!("COALESCE({}, '')", expr.sql));
            }
        }

        PathExpr::plain(path, parts.join(" || "))
    }
}

/// Parse a `where()` condition into a SQL predicate on the element alias.
///
/// Only single-field equality against a quoted literal is supported; anything
/// else emits `true` with a warning so the overall query still runs.
fn parse_where_condition(condition: &str, elem_alias: &str) -> String {
    let re = Regex::new(r"^(\w+)\s*=\s*'([^']+)'$").unwrap();
    match re.captures(condition.trim()) {
        Some(caps) => {
            let field = caps.get(1).unwrap().as_str();
            let value = caps.get(2).unwrap().as_str();
            format!("{elem_alias}->>'{field}' = '{value}'")
        }
        None => {
            warn!(condition, "unsupported where condition, emitting true");
            "true".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transpiler() -> PathTranspiler {
        PathTranspiler::default()
    }

    #[test]
    fn test_empty_path_is_document_root() {
        let mut t = transpiler();
        assert_eq!(t.transpile("", true, None).sql, "v.res_text_vc::jsonb");
        assert_eq!(t.transpile(".", true, None).sql, "v.res_text_vc::jsonb");
        assert_eq!(t.transpile("", true, Some("foreach_1")).sql, "foreach_1");
    }

    #[test]
    fn test_simple_field_as_text() {
        let mut t = transpiler();
        let expr = t.transpile("gender", true, None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->>'gender'");
        assert!(!expr.requires_subquery);
    }

    #[test]
    fn test_simple_field_as_jsonb() {
        let mut t = transpiler();
        let expr = t.transpile("gender", false, None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->'gender'");
    }

    #[test]
    fn test_nested_path() {
        let mut t = transpiler();
        let expr = t.transpile("subject.reference", true, None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->'subject'->>'reference'");
    }

    #[test]
    fn test_array_convention_indexes_first_element() {
        let mut t = transpiler();
        let expr = t.transpile("name.family", true, None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->0->'name'->>'family'");
    }

    #[test]
    fn test_context_path_replaces_root() {
        let mut t = transpiler();
        let expr = t.transpile("family", true, Some("foreach_1"));
        assert_eq!(expr.sql, "foreach_1->>'family'");
    }

    #[test]
    fn test_first() {
        let mut t = transpiler();
        let expr = t.transpile("given.first()", true, None);
        assert_eq!(expr.sql, "(v.res_text_vc::jsonb->'given')->0");
    }

    #[test]
    fn test_exists() {
        let mut t = transpiler();
        let expr = t.transpile("birthDate.exists()", true, None);
        assert_eq!(expr.sql, "(v.res_text_vc::jsonb->'birthDate' IS NOT NULL)");
    }

    #[test]
    fn test_count() {
        let mut t = transpiler();
        let expr = t.transpile("address.count()", true, None);
        assert_eq!(
            expr.sql,
            "jsonb_array_length(v.res_text_vc::jsonb->0->'address')"
        );
    }

    #[test]
    fn test_empty_function() {
        let mut t = transpiler();
        let expr = t.transpile("telecom.empty()", true, None);
        assert_eq!(
            expr.sql,
            "(v.res_text_vc::jsonb->0->'telecom' IS NULL OR \
             v.res_text_vc::jsonb->0->'telecom' = '[]'::jsonb)"
        );
    }

    #[test]
    fn test_where_clause_with_result_path() {
        let mut t = transpiler();
        let expr = t.transpile("coding.where(system='http://loinc.org').code", true, None);
        assert_eq!(
            expr.sql,
            "(SELECT elem_1->>'code' FROM jsonb_array_elements(v.res_text_vc::jsonb->'coding') \
             AS elem_1 WHERE elem_1->>'system' = 'http://loinc.org' LIMIT 1)"
        );
        assert!(expr.requires_subquery);
        assert_eq!(expr.array_alias.as_deref(), Some("elem_1"));
    }

    #[test]
    fn test_where_clause_nested_array_path() {
        let mut t = transpiler();
        let expr = t.transpile("code.coding.where(system='http://loinc.org').code", true, None);
        assert!(expr
            .sql
            .contains("jsonb_array_elements(v.res_text_vc::jsonb->'code'->'coding')"));
    }

    #[test]
    fn test_where_clause_without_result_path_returns_element() {
        let mut t = transpiler();
        let expr = t.transpile("coding.where(system='urn:x')", false, None);
        assert!(expr.sql.starts_with("(SELECT elem_1 FROM"));
    }

    #[test]
    fn test_where_aliases_are_unique() {
        let mut t = transpiler();
        let a = t.transpile("coding.where(system='a').code", true, None);
        let b = t.transpile("coding.where(system='b').code", true, None);
        assert_eq!(a.array_alias.as_deref(), Some("elem_1"));
        assert_eq!(b.array_alias.as_deref(), Some("elem_2"));
    }

    #[test]
    fn test_unsupported_where_condition_emits_true() {
        let mut t = transpiler();
        let expr = t.transpile("coding.where(system!='x').code", true, None);
        assert!(expr.sql.contains("WHERE true LIMIT 1"));
    }

    #[test]
    fn test_concatenation() {
        let mut t = transpiler();
        let expr = t.transpile("given.first() + ' ' + family", true, None);
        assert_eq!(
            expr.sql,
            "COALESCE((v.res_text_vc::jsonb->'given')->0, '') || ' ' || \
             COALESCE(v.res_text_vc::jsonb->>'family', '')"
        );
    }

    #[test]
    fn test_unknown_function_treated_as_field() {
        let mut t = transpiler();
        let expr = t.transpile("value.toInteger()", true, None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->'value'->>'toInteger'");
    }

    #[test]
    fn test_already_emitted_sql_passes_through() {
        let mut t = transpiler();
        let first = t.transpile("gender", true, None);
        let again = t.transpile(&first.sql, true, None);
        assert_eq!(again.sql, first.sql);
    }

    #[test]
    fn test_scope_path_skips_array_convention() {
        let mut t = transpiler();
        let expr = t.transpile_scope("address", None);
        assert_eq!(expr.sql, "v.res_text_vc::jsonb->'address'");

        let expr = t.transpile_scope("name.first()", None);
        assert_eq!(expr.sql, "(v.res_text_vc::jsonb->'name')->0");
    }

    #[test]
    fn test_scope_path_supports_where() {
        let mut t = transpiler();
        let expr = t.transpile_scope("name.where(use='official')", None);
        assert!(expr.requires_subquery);
        assert!(expr.sql.contains("elem_1->>'use' = 'official'"));
    }

    #[test]
    fn test_custom_alias_and_column() {
        let mut t = PathTranspiler::new("ver", "payload");
        assert_eq!(t.transpile("gender", true, None).sql, "ver.payload::jsonb->>'gender'");
    }
}
