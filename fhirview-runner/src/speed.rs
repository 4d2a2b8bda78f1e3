//! Recent-writes (speed layer) runner.
//!
//! Reads documents from the recent-writes cache that have not yet reached
//! the batch layer, applies a small fixed filter subset, and reports the
//! matching subject ids. The serving layer treats this output as
//! observability alongside the authoritative batch rows.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use fhirview_cache::CacheClient;
use fhirview_query::{EngineResult, FilterMap, FilterValue, ViewDefinition};
use fhirview_store::JsonRow;

use crate::runner::Rows;
use crate::stats::{RunnerStats, StatsRecorder};

/// Result of a speed-layer query.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedResult {
    /// The queried view.
    pub view_name: String,
    /// Always `"speed_layer"`.
    pub source: &'static str,
    /// Number of distinct subjects matched.
    pub total_count: usize,
    /// Matched subject ids.
    pub patient_ids: Vec<String>,
    /// The matching documents, capped by the caller's row cap.
    pub resources: Vec<Value>,
    /// When the query ran.
    pub query_timestamp: DateTime<Utc>,
    /// Lower bound on write timestamps considered.
    pub since: DateTime<Utc>,
}

/// Runner over the recent-writes cache.
pub struct SpeedLayerRunner {
    cache: CacheClient,
    stats: StatsRecorder,
}

impl SpeedLayerRunner {
    /// Create a runner over the given cache client.
    pub fn new(cache: CacheClient) -> Self {
        Self {
            cache,
            stats: StatsRecorder::default(),
        }
    }

    /// Query recent writes for the view's kind.
    ///
    /// `since` defaults to 24 hours ago.
    pub async fn execute(
        &self,
        def: &ViewDefinition,
        filters: &FilterMap,
        cap: Option<u64>,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<SpeedResult> {
        let started = std::time::Instant::now();
        let kind = def.resource_kind();
        let since = since.unwrap_or_else(|| Utc::now() - Duration::hours(24));

        debug!(kind, view = %def.name, "querying recent-writes cache");
        let mut resources = self.cache.scan_recent(kind, Some(since)).await?;
        info!(kind, found = resources.len(), "recent writes scanned");

        resources = apply_filters(resources, kind, filters);

        if let Some(cap) = cap {
            resources.truncate(cap as usize);
        }

        let patient_ids = extract_subject_ids(&resources);
        self.stats.record(started.elapsed().as_secs_f64() * 1000.0);

        Ok(SpeedResult {
            view_name: def.name.clone(),
            source: "speed_layer",
            total_count: patient_ids.len(),
            patient_ids,
            resources,
            query_timestamp: Utc::now(),
            since,
        })
    }

    /// Execution statistics.
    pub fn statistics(&self) -> RunnerStats {
        self.stats.snapshot("speed_layer")
    }
}

/// Apply the supported filter subset: `gender` for the Patient kind,
/// `code` for everything else.
fn apply_filters(resources: Vec<Value>, kind: &str, filters: &FilterMap) -> Vec<Value> {
    let mut filtered = resources;

    if kind == "Patient" {
        if let Some(FilterValue::Text(gender)) = filters.get("gender") {
            let wanted = gender.to_lowercase();
            filtered.retain(|r| {
                r.get("gender")
                    .and_then(Value::as_str)
                    .is_some_and(|g| g.to_lowercase() == wanted)
            });
        }
    } else if let Some(FilterValue::Text(code)) = filters.get("code") {
        filtered.retain(|r| matches_code(r, code));
    }

    filtered
}

/// Check whether a document's `code` matches: any coding element's `code`
/// equals the value, or the value appears in `code.text` case-insensitively.
fn matches_code(resource: &Value, code_value: &str) -> bool {
    let Some(code) = resource.get("code") else {
        return false;
    };

    if let Some(codings) = code.get("coding").and_then(Value::as_array) {
        for coding in codings {
            if coding.get("code").and_then(Value::as_str) == Some(code_value) {
                return true;
            }
        }
    }

    code.get("text")
        .and_then(Value::as_str)
        .is_some_and(|text| text.to_lowercase().contains(&code_value.to_lowercase()))
}

/// Extract subject ids: the document id for Patient documents, the suffix of
/// `subject.reference` after `Patient/` for everything else. Order of first
/// appearance is preserved; duplicates are dropped.
fn extract_subject_ids(resources: &[Value]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();

    for resource in resources {
        let id = match resource.get("resourceType").and_then(Value::as_str) {
            Some("Patient") => resource.get("id").and_then(Value::as_str).map(String::from),
            _ => resource
                .get("subject")
                .and_then(|s| s.get("reference"))
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("Patient/"))
                .map(String::from),
        };

        if let Some(id) = id {
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }

    ids
}

/// Project cached documents into rows for the recent-writes-only runner
/// mode.
///
/// Only trivially simple columns resolve: `getResourceKey()` takes the
/// document id, a bare root field takes that field as text. Anything deeper
/// yields null; full projection belongs to the relational path.
pub fn project_rows(def: &ViewDefinition, resources: &[Value]) -> Rows {
    let columns = def.flattened_columns();
    let mut rows = Vec::with_capacity(resources.len());

    for resource in resources {
        let mut row = JsonRow::with_capacity(columns.len());
        for col in &columns {
            let value = if col.path == "getResourceKey()" {
                resource.get("id").cloned().unwrap_or(Value::Null)
            } else if !col.path.contains('.') && !col.path.contains('(') {
                resource.get(&col.path).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            row.insert(col.name.clone(), value);
        }
        rows.push(row);
    }

    rows
}
