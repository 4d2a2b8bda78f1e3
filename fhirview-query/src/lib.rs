//! # fhirview-query
//!
//! View-definition model and SQL planning for the fhirview analytics engine.
//!
//! This crate provides:
//! - The view-definition serde model and its filesystem registry
//! - A path-expression transpiler targeting PostgreSQL JSONB
//! - Column extraction with lateral array expansion
//! - A small query-plan algebra rendered to SQL exactly once
//! - A cross-view join planner for cohort queries
//! - The engine-wide error taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use fhirview_query::{QueryBuilder, ViewDefinition};
//!
//! let def: ViewDefinition = serde_json::from_str(json)?;
//! let plan = QueryBuilder::new().build(&def, &filters, Some(100))?;
//! let sql = plan.render();
//! ```

pub mod builder;
pub mod columns;
pub mod error;
pub mod join;
pub mod path;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod viewdef;

pub use builder::{FilterMap, FilterValue, QueryBuilder};
pub use columns::{ColumnDef, ColumnExtractor, ExtractedColumns, LateralJoin, LateralKind};
pub use error::{EngineError, EngineResult};
pub use join::{Aggregation, CodedFilter, JoinQuery, JoinQueryBuilder, MATERIALIZED_SCHEMA};
pub use path::{PathExpr, PathTranspiler, ARRAY_FIELDS};
pub use plan::{quote_identifier, quote_literal, QueryPlan};
pub use registry::ViewDefinitionRegistry;
pub use schema::infer_schema;
pub use viewdef::{ColumnSpec, ColumnType, SelectNode, ViewDefinition, WhereClause};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::{FilterMap, FilterValue, QueryBuilder};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::join::{CodedFilter, JoinQueryBuilder};
    pub use crate::registry::ViewDefinitionRegistry;
    pub use crate::viewdef::ViewDefinition;
}
