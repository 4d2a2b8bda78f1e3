//! Catalog and document queries against the store.
//!
//! Groups the fixed SQL the engine needs beyond generated view queries:
//! materialized-view existence and sizing, index inspection, resource
//! statistics, and single-document fetches.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::connection::StoreConnection;
use crate::error::{StoreError, StoreResult};

/// Check whether a materialized view exists in the given schema.
pub async fn matview_exists(
    conn: &StoreConnection,
    schema: &str,
    view_name: &str,
) -> StoreResult<bool> {
    let row = conn
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM pg_matviews
                WHERE schemaname = $1 AND matviewname = $2
            ) AS exists",
            &[&schema, &view_name],
        )
        .await?;
    Ok(row.try_get("exists")?)
}

/// A materialized view known to the catalog.
#[derive(Debug, Clone)]
pub struct MatviewInfo {
    /// View name.
    pub name: String,
    /// Human-readable size.
    pub size: String,
    /// Total relation size in bytes.
    pub size_bytes: i64,
}

/// List the materialized views in a schema, ordered by name.
pub async fn list_matviews(conn: &StoreConnection, schema: &str) -> StoreResult<Vec<MatviewInfo>> {
    let rows = conn
        .query(
            "SELECT
                matviewname AS view_name,
                pg_size_pretty(pg_total_relation_size(schemaname||'.'||matviewname)) AS size,
                pg_total_relation_size(schemaname||'.'||matviewname) AS size_bytes
             FROM pg_matviews
             WHERE schemaname = $1
             ORDER BY matviewname",
            &[&schema],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(MatviewInfo {
                name: row.try_get("view_name")?,
                size: row.try_get("size")?,
                size_bytes: row.try_get("size_bytes")?,
            })
        })
        .collect()
}

/// Count the rows of a relation.
pub async fn relation_row_count(
    conn: &StoreConnection,
    schema: &str,
    name: &str,
) -> StoreResult<i64> {
    let sql = format!(
        "SELECT COUNT(*) AS count FROM {}.{}",
        validate_name(schema)?,
        validate_name(name)?
    );
    let row = conn.query_one(&sql, &[]).await?;
    Ok(row.try_get("count")?)
}

/// Total relation size in bytes.
pub async fn relation_size_bytes(
    conn: &StoreConnection,
    schema: &str,
    name: &str,
) -> StoreResult<i64> {
    let row = conn
        .query_one(
            "SELECT pg_total_relation_size(($1::text)::regclass) AS size_bytes",
            &[&format!("{schema}.{name}")],
        )
        .await?;
    Ok(row.try_get("size_bytes")?)
}

/// Check whether any index on the table covers the given column.
pub async fn has_index_on(
    conn: &StoreConnection,
    schema: &str,
    table: &str,
    column: &str,
) -> StoreResult<bool> {
    let row = conn
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = $1 AND tablename = $2 AND indexdef ILIKE '%' || $3 || '%'
            ) AS exists",
            &[&schema, &table, &column],
        )
        .await?;
    Ok(row.try_get("exists")?)
}

/// Document-store statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Live resource counts by kind, largest first (top 10).
    pub resource_counts: IndexMap<String, i64>,
    /// Total live resources.
    pub total_resources: i64,
    /// Database size in megabytes.
    pub database_size_mb: i64,
}

/// Gather resource counts and database size.
pub async fn store_statistics(conn: &StoreConnection) -> StoreResult<StoreStats> {
    let rows = conn
        .query(
            "SELECT res_type, COUNT(*) AS count
             FROM hfj_resource
             WHERE res_deleted_at IS NULL
             GROUP BY res_type
             ORDER BY count DESC
             LIMIT 10",
            &[],
        )
        .await?;

    let mut resource_counts = IndexMap::new();
    for row in &rows {
        resource_counts.insert(row.try_get::<_, String>("res_type")?, row.try_get("count")?);
    }

    let total_resources: i64 = conn
        .query_one(
            "SELECT COUNT(*) AS count FROM hfj_resource WHERE res_deleted_at IS NULL",
            &[],
        )
        .await?
        .try_get("count")?;

    let database_size_mb: i64 = conn
        .query_one(
            "SELECT (pg_database_size(current_database()) / 1024 / 1024)::bigint AS mb",
            &[],
        )
        .await?
        .try_get("mb")?;

    Ok(StoreStats {
        resource_counts,
        total_resources,
        database_size_mb,
    })
}

/// Count live documents of one kind.
pub async fn resource_count(conn: &StoreConnection, kind: &str) -> StoreResult<i64> {
    let row = conn
        .query_one(
            "SELECT COUNT(*) AS count
             FROM hfj_resource
             WHERE res_type = $1 AND res_deleted_at IS NULL",
            &[&kind],
        )
        .await?;
    Ok(row.try_get("count")?)
}

/// Fetch the live version of a single document by kind and id.
pub async fn fetch_resource(
    conn: &StoreConnection,
    kind: &str,
    id: &str,
) -> StoreResult<Option<Value>> {
    let row = conn
        .query_opt(
            "SELECT v.res_text_vc AS resource
             FROM hfj_resource r
             JOIN hfj_res_ver v ON r.res_id = v.res_id AND r.res_ver = v.res_ver
             WHERE r.res_type = $1 AND r.res_id::text = $2 AND r.res_deleted_at IS NULL
             LIMIT 1",
            &[&kind, &id],
        )
        .await?;

    match row {
        Some(row) => {
            let text: String = row.try_get("resource")?;
            let value = serde_json::from_str(&text)
                .map_err(|e| StoreError::conversion(format!("document body: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Fetch documents of one kind updated after the watermark, newest first.
///
/// Bodies that fail to parse are skipped with a debug log so one corrupt
/// document cannot stall ingestion.
pub async fn recent_resources(
    conn: &StoreConnection,
    kind: &str,
    since: DateTime<Utc>,
    limit: i64,
) -> StoreResult<Vec<Value>> {
    let rows = conn
        .query(
            "SELECT v.res_text_vc AS resource
             FROM hfj_resource r
             JOIN hfj_res_ver v ON r.res_id = v.res_id AND r.res_ver = v.res_ver
             WHERE r.res_type = $1 AND r.res_updated > $2::timestamptz AND r.res_deleted_at IS NULL
             ORDER BY r.res_updated DESC
             LIMIT $3",
            &[&kind, &since, &limit],
        )
        .await?;

    let mut resources = Vec::with_capacity(rows.len());
    for row in &rows {
        let text: String = row.try_get("resource")?;
        match serde_json::from_str(&text) {
            Ok(value) => resources.push(value),
            Err(e) => debug!(kind, error = %e, "skipping unparsable document body"),
        }
    }
    Ok(resources)
}

fn validate_name(name: &str) -> StoreResult<&str> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::Internal(format!("invalid relation name '{name}'")));
    }
    Ok(name)
}
