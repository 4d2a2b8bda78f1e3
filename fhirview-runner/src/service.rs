//! Materialized-view lifecycle service.
//!
//! Owns the dedicated schema: creates views from definitions (materializing
//! the generated relational query), refreshes them, tracks per-view
//! metadata in a `view_metadata` table alongside the views, and evaluates
//! staleness for the refresh pipeline.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info};

use fhirview_query::{
    EngineError, EngineResult, FilterMap, QueryBuilder, ViewDefinition, MATERIALIZED_SCHEMA,
};
use fhirview_store::{catalog, StoreConnection, StorePool};

/// Default staleness threshold in hours.
pub const STALENESS_THRESHOLD_HOURS: i64 = 24;

/// Lifecycle state of a materialized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewStatus {
    /// Refreshed and serving.
    Active,
    /// A refresh is in progress.
    Refreshing,
    /// The last refresh failed.
    Failed,
    /// No metadata recorded yet.
    Unknown,
}

impl ViewStatus {
    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "refreshing" => Self::Refreshing,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Per-view metadata record.
#[derive(Debug, Clone, Serialize)]
pub struct ViewMetadata {
    /// View name.
    pub view_name: String,
    /// Document kind the view projects, when known.
    pub resource_type: Option<String>,
    /// Lifecycle status.
    pub status: ViewStatus,
    /// When the metadata record was created.
    pub created_at: Option<DateTime<Utc>>,
    /// Last successful refresh.
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Hours since the last refresh.
    pub staleness_hours: Option<f64>,
    /// Duration of the last refresh.
    pub refresh_duration_ms: Option<f64>,
    /// Row count at last refresh.
    pub row_count: Option<i64>,
    /// Size at last refresh.
    pub size_bytes: Option<i64>,
    /// Whether the view is past its staleness threshold.
    pub is_stale: bool,
    /// Whether the refresh pipeline may refresh this view.
    pub auto_refresh_enabled: bool,
    /// Per-view staleness threshold.
    pub refresh_interval_hours: i64,
    /// Error from the last failed refresh.
    pub error_message: Option<String>,
}

/// Staleness for a view: hours since refresh (none if never refreshed) and
/// whether the threshold is exceeded. A never-refreshed view is stale.
pub fn compute_staleness(
    last_refreshed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold_hours: i64,
) -> (Option<f64>, bool) {
    match last_refreshed_at {
        Some(last) => {
            let hours = (now - last).num_seconds() as f64 / 3600.0;
            (Some(hours), hours >= threshold_hours as f64)
        }
        None => (None, true),
    }
}

/// Listing entry combining catalog facts with metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ViewInfo {
    /// View name.
    pub view_name: String,
    /// Current row count.
    pub row_count: i64,
    /// Human-readable size.
    pub size: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Lifecycle status.
    pub status: ViewStatus,
    /// Last successful refresh.
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Whether the view is stale.
    pub is_stale: bool,
    /// Hours since last refresh.
    pub staleness_hours: Option<f64>,
    /// Document kind, when known.
    pub resource_type: Option<String>,
}

/// Detailed status for one view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewStatusReport {
    /// View name.
    pub view_name: String,
    /// Whether the materialized view exists in the catalog.
    pub exists: bool,
    /// Current row count (zero when absent).
    pub row_count: i64,
    /// Size in bytes (zero when absent).
    pub size_bytes: i64,
    /// Metadata record, when one exists.
    pub metadata: Option<ViewMetadata>,
    /// Whether the refresh pipeline would refresh this view now.
    pub needs_refresh: bool,
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    /// View name.
    pub view_name: String,
    /// Whether the refresh committed.
    pub success: bool,
    /// Wall-clock duration.
    pub refresh_duration_ms: f64,
    /// Row count after refresh.
    pub row_count: i64,
    /// Size after refresh.
    pub size_bytes: i64,
    /// Failure message when unsuccessful.
    pub error: Option<String>,
}

/// Summary over a batch of refreshes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    /// Views attempted.
    pub total: usize,
    /// Successful refreshes.
    pub refreshed: usize,
    /// Failed refreshes.
    pub failed: usize,
    /// Failure messages.
    pub errors: Vec<String>,
    /// Per-view outcomes.
    pub results: Vec<RefreshOutcome>,
}

impl RefreshSummary {
    fn from_outcomes(results: Vec<RefreshOutcome>) -> Self {
        let refreshed = results.iter().filter(|r| r.success).count();
        let errors = results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", r.view_name))
            })
            .collect();
        Self {
            total: results.len(),
            refreshed,
            failed: results.len() - refreshed,
            errors,
            results,
        }
    }
}

/// Summary of a staleness sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StaleCheckSummary {
    /// Metadata records examined.
    pub total_checked: usize,
    /// Views found stale and eligible.
    pub stale_views: usize,
    /// Successful refreshes.
    pub refreshed: usize,
    /// Failed refreshes.
    pub failed: usize,
    /// Per-view outcomes.
    pub results: Vec<RefreshOutcome>,
}

/// Service managing materialized views and their metadata.
pub struct MaterializedViewService {
    pool: StorePool,
    schema: String,
    schema_ready: OnceCell<()>,
    refreshing: Mutex<HashSet<String>>,
}

impl MaterializedViewService {
    /// Create a service over the default schema.
    pub fn new(pool: StorePool) -> Self {
        Self::with_schema(pool, MATERIALIZED_SCHEMA)
    }

    /// Create a service over an explicit schema.
    pub fn with_schema(pool: StorePool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
            schema_ready: OnceCell::new(),
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// The schema this service manages.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn conn(&self) -> EngineResult<StoreConnection> {
        Ok(self.pool.get().await?)
    }

    /// Create the schema and metadata table on first use.
    async fn ensure_schema(&self) -> EngineResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                let conn = self.conn().await?;
                conn.batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {schema};
                     CREATE TABLE IF NOT EXISTS {schema}.view_metadata (
                         view_name text PRIMARY KEY,
                         resource_type text,
                         status text NOT NULL DEFAULT 'unknown',
                         created_at timestamptz NOT NULL DEFAULT now(),
                         last_refreshed_at timestamptz,
                         staleness_hours double precision,
                         refresh_duration_ms double precision,
                         row_count bigint,
                         size_bytes bigint,
                         is_stale boolean NOT NULL DEFAULT true,
                         auto_refresh_enabled boolean NOT NULL DEFAULT true,
                         refresh_interval_hours bigint NOT NULL DEFAULT {threshold},
                         error_message text
                     )",
                    schema = self.schema,
                    threshold = STALENESS_THRESHOLD_HOURS,
                ))
                .await
                .map_err(EngineError::from)?;
                Ok::<_, EngineError>(())
            })
            .await?;
        Ok(())
    }

    fn validate_view_name<'a>(&self, name: &'a str) -> EngineResult<&'a str> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::invalid_input(format!(
                "invalid view name '{name}'"
            )));
        }
        Ok(name)
    }

    /// Materialize a view definition: drop any previous version, create the
    /// view from the generated relational query, and index `id` plus every
    /// subject id column.
    pub async fn create_view(&self, def: &ViewDefinition) -> EngineResult<RefreshOutcome> {
        self.ensure_schema().await?;
        let view_name = self.validate_view_name(&def.name)?;

        let plan = QueryBuilder::new().build(def, &FilterMap::new(), None)?;
        let started = Instant::now();
        let conn = self.conn().await?;

        conn.batch_execute(&format!(
            "DROP MATERIALIZED VIEW IF EXISTS {schema}.{view_name};
             CREATE MATERIALIZED VIEW {schema}.{view_name} AS\n{query}",
            schema = self.schema,
            query = plan.render(),
        ))
        .await?;

        for column in plan.column_names() {
            let indexable = (column == "id" || column.ends_with("_id"))
                && column
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if indexable {
                conn.batch_execute(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_{view_name}_{column} \
                     ON {schema}.{view_name} ({column})",
                    schema = self.schema,
                ))
                .await?;
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let row_count = catalog::relation_row_count(&conn, &self.schema, view_name).await?;
        let size_bytes = catalog::relation_size_bytes(&conn, &self.schema, view_name).await?;

        self.record_success(
            &conn,
            view_name,
            Some(def.resource_kind()),
            duration_ms,
            row_count,
            size_bytes,
        )
        .await?;

        info!(view = view_name, row_count, "materialized view created");
        Ok(RefreshOutcome {
            view_name: view_name.to_string(),
            success: true,
            refresh_duration_ms: duration_ms,
            row_count,
            size_bytes,
            error: None,
        })
    }

    /// Drop a materialized view and its metadata.
    pub async fn drop_view(&self, view_name: &str) -> EngineResult<()> {
        self.ensure_schema().await?;
        let view_name = self.validate_view_name(view_name)?;
        let conn = self.conn().await?;

        conn.batch_execute(&format!(
            "DROP MATERIALIZED VIEW IF EXISTS {}.{view_name}",
            self.schema
        ))
        .await?;
        conn.execute(
            &format!("DELETE FROM {}.view_metadata WHERE view_name = $1", self.schema),
            &[&view_name],
        )
        .await?;

        info!(view = view_name, "materialized view dropped");
        Ok(())
    }

    /// Refresh one view, updating its metadata atomically around the
    /// underlying refresh. A view already refreshing rejects the request.
    pub async fn refresh_view(&self, view_name: &str) -> EngineResult<RefreshOutcome> {
        self.ensure_schema().await?;
        let view_name = self.validate_view_name(view_name)?.to_string();

        if !self.refreshing.lock().insert(view_name.clone()) {
            return Err(EngineError::transient(format!(
                "view '{view_name}' is already refreshing"
            )));
        }

        let outcome = self.refresh_view_inner(&view_name).await;
        self.refreshing.lock().remove(&view_name);
        outcome
    }

    async fn refresh_view_inner(&self, view_name: &str) -> EngineResult<RefreshOutcome> {
        info!(view = view_name, "refreshing materialized view");
        let started = Instant::now();

        let conn = self.conn().await?;
        self.set_status(&conn, view_name, ViewStatus::Refreshing, None)
            .await?;

        let refresh_result = conn
            .batch_execute(&format!(
                "REFRESH MATERIALIZED VIEW {}.{view_name}",
                self.schema
            ))
            .await;

        match refresh_result {
            Ok(()) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                let row_count =
                    catalog::relation_row_count(&conn, &self.schema, view_name).await?;
                let size_bytes =
                    catalog::relation_size_bytes(&conn, &self.schema, view_name).await?;

                self.record_success(&conn, view_name, None, duration_ms, row_count, size_bytes)
                    .await?;

                info!(
                    view = view_name,
                    duration_ms = format!("{duration_ms:.1}"),
                    row_count,
                    "refreshed materialized view"
                );
                Ok(RefreshOutcome {
                    view_name: view_name.to_string(),
                    success: true,
                    refresh_duration_ms: duration_ms,
                    row_count,
                    size_bytes,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                error!(view = view_name, error = %message, "refresh failed");
                self.set_status(&conn, view_name, ViewStatus::Failed, Some(message.as_str()))
                    .await?;

                Ok(RefreshOutcome {
                    view_name: view_name.to_string(),
                    success: false,
                    refresh_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    row_count: 0,
                    size_bytes: 0,
                    error: Some(message),
                })
            }
        }
    }

    /// Refresh every materialized view in the schema.
    pub async fn refresh_all_views(&self) -> EngineResult<RefreshSummary> {
        self.ensure_schema().await?;
        let conn = self.conn().await?;
        let views = catalog::list_matviews(&conn, &self.schema).await?;
        drop(conn);

        let mut results = Vec::with_capacity(views.len());
        for view in &views {
            match self.refresh_view(&view.name).await {
                Ok(outcome) => results.push(outcome),
                Err(e) => results.push(RefreshOutcome {
                    view_name: view.name.clone(),
                    success: false,
                    refresh_duration_ms: 0.0,
                    row_count: 0,
                    size_bytes: 0,
                    error: Some(e.to_string()),
                }),
            }
        }

        let summary = RefreshSummary::from_outcomes(results);
        info!(
            total = summary.total,
            refreshed = summary.refreshed,
            failed = summary.failed,
            "refresh-all completed"
        );
        Ok(summary)
    }

    /// Recompute staleness for auto-refreshable views and refresh the stale
    /// ones.
    pub async fn check_and_refresh_stale_views(&self) -> EngineResult<StaleCheckSummary> {
        self.ensure_schema().await?;
        let conn = self.conn().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT * FROM {}.view_metadata WHERE auto_refresh_enabled",
                    self.schema
                ),
                &[],
            )
            .await?;

        let now = Utc::now();
        let mut needs_refresh = Vec::new();
        let total_checked = rows.len();

        for row in &rows {
            let metadata = parse_metadata(row)?;
            let (staleness_hours, is_stale) = compute_staleness(
                metadata.last_refreshed_at,
                now,
                metadata.refresh_interval_hours,
            );

            conn.execute(
                &format!(
                    "UPDATE {}.view_metadata \
                     SET staleness_hours = $2, is_stale = $3 WHERE view_name = $1",
                    self.schema
                ),
                &[&metadata.view_name, &staleness_hours, &is_stale],
            )
            .await?;

            if is_stale {
                needs_refresh.push(metadata.view_name);
            }
        }
        drop(conn);

        if needs_refresh.is_empty() {
            info!(total_checked, "no stale views found");
            return Ok(StaleCheckSummary {
                total_checked,
                ..Default::default()
            });
        }

        info!(stale = needs_refresh.len(), "refreshing stale views");
        let mut results = Vec::with_capacity(needs_refresh.len());
        for view_name in &needs_refresh {
            match self.refresh_view(view_name).await {
                Ok(outcome) => results.push(outcome),
                Err(e) => results.push(RefreshOutcome {
                    view_name: view_name.clone(),
                    success: false,
                    refresh_duration_ms: 0.0,
                    row_count: 0,
                    size_bytes: 0,
                    error: Some(e.to_string()),
                }),
            }
        }

        let refreshed = results.iter().filter(|r| r.success).count();
        Ok(StaleCheckSummary {
            total_checked,
            stale_views: needs_refresh.len(),
            refreshed,
            failed: results.len() - refreshed,
            results,
        })
    }

    /// List all materialized views with their metadata.
    pub async fn list_views(&self) -> EngineResult<Vec<ViewInfo>> {
        self.ensure_schema().await?;
        let conn = self.conn().await?;

        let catalog_views = catalog::list_matviews(&conn, &self.schema).await?;
        let mut views = Vec::with_capacity(catalog_views.len());

        for info in catalog_views {
            let row_count = catalog::relation_row_count(&conn, &self.schema, &info.name).await?;
            let metadata = self.load_metadata(&conn, &info.name).await?;

            let (status, last_refreshed_at, is_stale, staleness_hours, resource_type) =
                match metadata {
                    Some(m) => (
                        m.status,
                        m.last_refreshed_at,
                        m.is_stale,
                        m.staleness_hours,
                        m.resource_type,
                    ),
                    None => (ViewStatus::Unknown, None, false, None, None),
                };

            views.push(ViewInfo {
                view_name: info.name,
                row_count,
                size: info.size,
                size_bytes: info.size_bytes,
                status,
                last_refreshed_at,
                is_stale,
                staleness_hours,
                resource_type,
            });
        }

        info!(count = views.len(), "listed materialized views");
        Ok(views)
    }

    /// Detailed status for one view.
    pub async fn get_view_status(&self, view_name: &str) -> EngineResult<ViewStatusReport> {
        self.ensure_schema().await?;
        let view_name = self.validate_view_name(view_name)?;
        let conn = self.conn().await?;

        if !catalog::matview_exists(&conn, &self.schema, view_name).await? {
            return Ok(ViewStatusReport {
                view_name: view_name.to_string(),
                exists: false,
                row_count: 0,
                size_bytes: 0,
                metadata: None,
                needs_refresh: false,
            });
        }

        let row_count = catalog::relation_row_count(&conn, &self.schema, view_name).await?;
        let size_bytes = catalog::relation_size_bytes(&conn, &self.schema, view_name).await?;
        let metadata = self.load_metadata(&conn, view_name).await?;

        let needs_refresh = metadata
            .as_ref()
            .map(|m| {
                let (_, is_stale) = compute_staleness(
                    m.last_refreshed_at,
                    Utc::now(),
                    m.refresh_interval_hours,
                );
                m.auto_refresh_enabled && is_stale
            })
            .unwrap_or(false);

        Ok(ViewStatusReport {
            view_name: view_name.to_string(),
            exists: true,
            row_count,
            size_bytes,
            metadata,
            needs_refresh,
        })
    }

    async fn load_metadata(
        &self,
        conn: &StoreConnection,
        view_name: &str,
    ) -> EngineResult<Option<ViewMetadata>> {
        let row = conn
            .query_opt(
                &format!(
                    "SELECT * FROM {}.view_metadata WHERE view_name = $1",
                    self.schema
                ),
                &[&view_name],
            )
            .await?;
        row.map(|row| parse_metadata(&row)).transpose()
    }

    async fn set_status(
        &self,
        conn: &StoreConnection,
        view_name: &str,
        status: ViewStatus,
        error_message: Option<&str>,
    ) -> EngineResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO {schema}.view_metadata (view_name, status, error_message)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (view_name) DO UPDATE
                 SET status = EXCLUDED.status, error_message = EXCLUDED.error_message",
                schema = self.schema
            ),
            &[&view_name, &status.as_str(), &error_message],
        )
        .await?;
        Ok(())
    }

    async fn record_success(
        &self,
        conn: &StoreConnection,
        view_name: &str,
        resource_type: Option<&str>,
        duration_ms: f64,
        row_count: i64,
        size_bytes: i64,
    ) -> EngineResult<()> {
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {schema}.view_metadata
                     (view_name, resource_type, status, last_refreshed_at,
                      refresh_duration_ms, row_count, size_bytes,
                      is_stale, staleness_hours, error_message)
                 VALUES ($1, $2, 'active', $3, $4, $5, $6, false, 0.0, NULL)
                 ON CONFLICT (view_name) DO UPDATE
                 SET resource_type = COALESCE(EXCLUDED.resource_type, \
                         {schema}.view_metadata.resource_type),
                     status = 'active',
                     last_refreshed_at = EXCLUDED.last_refreshed_at,
                     refresh_duration_ms = EXCLUDED.refresh_duration_ms,
                     row_count = EXCLUDED.row_count,
                     size_bytes = EXCLUDED.size_bytes,
                     is_stale = false,
                     staleness_hours = 0.0,
                     error_message = NULL",
                schema = self.schema
            ),
            &[
                &view_name,
                &resource_type,
                &now,
                &duration_ms,
                &row_count,
                &size_bytes,
            ],
        )
        .await?;
        Ok(())
    }
}

fn parse_metadata(row: &tokio_postgres::Row) -> EngineResult<ViewMetadata> {
    let get = |e: tokio_postgres::Error| EngineError::fatal(format!("view metadata row: {e}"));

    let status: String = row.try_get("status").map_err(get)?;
    Ok(ViewMetadata {
        view_name: row.try_get("view_name").map_err(get)?,
        resource_type: row.try_get("resource_type").map_err(get)?,
        status: ViewStatus::parse(&status),
        created_at: row.try_get("created_at").map_err(get)?,
        last_refreshed_at: row.try_get("last_refreshed_at").map_err(get)?,
        staleness_hours: row.try_get("staleness_hours").map_err(get)?,
        refresh_duration_ms: row.try_get("refresh_duration_ms").map_err(get)?,
        row_count: row.try_get("row_count").map_err(get)?,
        size_bytes: row.try_get("size_bytes").map_err(get)?,
        is_stale: row.try_get("is_stale").map_err(get)?,
        auto_refresh_enabled: row.try_get("auto_refresh_enabled").map_err(get)?,
        refresh_interval_hours: row.try_get("refresh_interval_hours").map_err(get)?,
        error_message: row.try_get("error_message").map_err(get)?,
    })
}
