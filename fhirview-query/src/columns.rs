//! Column extraction from the `select` tree.
//!
//! Walks a view definition's projection scopes, transpiling each leaf column
//! and generating one lateral unnest per `forEach` / `forEachOrNull` scope.
//! The output feeds the query plan: an ordered column list plus the lateral
//! joins the FROM clause needs.

use crate::error::{EngineError, EngineResult};
use crate::path::PathTranspiler;
use crate::viewdef::SelectNode;

/// A projected column with its emitted SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Output column name.
    pub name: String,
    /// SQL expression producing the value.
    pub sql: String,
    /// True when the column comes from a `forEachOrNull` scope.
    pub nullable: bool,
}

/// Join flavor for an array-iteration scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateralKind {
    /// `forEach`: an empty array yields zero rows.
    Cross,
    /// `forEachOrNull`: an empty array still yields one row of nulls.
    Left,
}

/// A lateral join produced by an array-iteration scope.
#[derive(Debug, Clone, PartialEq)]
pub struct LateralJoin {
    /// Cross (row-dropping) or left (row-preserving).
    pub kind: LateralKind,
    /// The join body: the unnest (or scalar subselect) with its alias.
    pub body: String,
    /// Alias the scope's columns are transpiled against.
    pub alias: String,
}

impl LateralJoin {
    /// Render the join clause.
    pub fn render(&self) -> String {
        match self.kind {
            LateralKind::Cross => format!("CROSS JOIN LATERAL {}", self.body),
            LateralKind::Left => format!("LEFT JOIN LATERAL {} ON true", self.body),
        }
    }
}

/// Result of walking a `select` tree.
#[derive(Debug, Clone, Default)]
pub struct ExtractedColumns {
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Lateral joins in scope order.
    pub lateral_joins: Vec<LateralJoin>,
}

/// Walks `select` trees and produces SQL columns plus lateral joins.
#[derive(Debug)]
pub struct ColumnExtractor {
    transpiler: PathTranspiler,
    lateral_counter: u32,
}

impl ColumnExtractor {
    /// Create an extractor around the given transpiler.
    pub fn new(transpiler: PathTranspiler) -> Self {
        Self {
            transpiler,
            lateral_counter: 0,
        }
    }

    /// Extract all columns and lateral joins from the select tree.
    ///
    /// Fails fast with `InvalidInput` on a duplicate column name.
    pub fn extract(&mut self, select: &[SelectNode]) -> EngineResult<ExtractedColumns> {
        let mut out = ExtractedColumns::default();
        for node in select {
            self.process_node(node, None, false, &mut out)?;
        }

        let mut seen = std::collections::HashSet::new();
        for col in &out.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(EngineError::invalid_input(format!(
                    "duplicate column name '{}' in projection",
                    col.name
                )));
            }
        }

        Ok(out)
    }

    /// Transpile the view's `where` paths into ANDable predicates.
    pub fn extract_predicates(
        &mut self,
        where_: &[crate::viewdef::WhereClause],
    ) -> Vec<String> {
        where_
            .iter()
            .map(|clause| {
                let expr = self.transpiler.transpile(&clause.path, false, None);
                match &clause.description {
                    Some(desc) => format!("({})  -- {}", expr.sql, desc),
                    None => format!("({})", expr.sql),
                }
            })
            .collect()
    }

    fn process_node(
        &mut self,
        node: &SelectNode,
        context: Option<&str>,
        nullable: bool,
        out: &mut ExtractedColumns,
    ) -> EngineResult<()> {
        let scope = node
            .for_each
            .as_deref()
            .map(|p| (LateralKind::Cross, p))
            .or_else(|| node.for_each_or_null.as_deref().map(|p| (LateralKind::Left, p)));

        if let Some((kind, for_each_path)) = scope {
            let (join, child_context) = self.build_lateral(kind, for_each_path, context);
            out.lateral_joins.push(join);

            let child_nullable = nullable || kind == LateralKind::Left;
            self.extract_node_columns(node, Some(child_context.as_str()), child_nullable, out);
            for nested in &node.select {
                self.process_node(nested, Some(child_context.as_str()), child_nullable, out)?;
            }
        } else {
            self.extract_node_columns(node, context, nullable, out);
            for nested in &node.select {
                self.process_node(nested, context, nullable, out)?;
            }
        }

        Ok(())
    }

    fn extract_node_columns(
        &mut self,
        node: &SelectNode,
        context: Option<&str>,
        nullable: bool,
        out: &mut ExtractedColumns,
    ) {
        for col in &node.column {
            let sql = if col.path == "getResourceKey()" {
                // The document id as text, regardless of iteration context.
                format!("{}->>'id'", self.transpiler.document_root())
            } else {
                self.transpiler.transpile(&col.path, true, context).sql
            };

            out.columns.push(ColumnDef {
                name: col.name.clone(),
                sql,
                nullable,
            });
        }
    }

    /// Build the lateral join for an iteration scope and return it with the
    /// context expression child columns transpile against.
    fn build_lateral(
        &mut self,
        kind: LateralKind,
        for_each_path: &str,
        context: Option<&str>,
    ) -> (LateralJoin, String) {
        self.lateral_counter += 1;
        let alias = format!("foreach_{}", self.lateral_counter);

        let base = self.transpiler.transpile_scope(for_each_path, context);

        // A single-valued scope path (first() or a where() subquery) is not
        // an array; wrap the scalar in a one-row subselect instead.
        if for_each_path.contains(".first()") || base.requires_subquery {
            let body = format!("(SELECT {} AS {alias}) AS {alias}_row", base.sql);
            let child_context = format!("{alias}_row.{alias}");
            (LateralJoin { kind, body, alias }, child_context)
        } else {
            let body = format!(
                "jsonb_array_elements(COALESCE({}, '[]'::jsonb)) AS {alias}",
                base.sql
            );
            let child_context = alias.clone();
            (LateralJoin { kind, body, alias }, child_context)
        }
    }
}

impl Default for ColumnExtractor {
    fn default() -> Self {
        Self::new(PathTranspiler::default())
    }
}
