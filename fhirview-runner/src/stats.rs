//! Runner statistics.
//!
//! Counters are monotonic per runner instance and reset only when the
//! runner is dropped.

use parking_lot::Mutex;
use serde::Serialize;

/// Execution statistics for one runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerStats {
    /// Runner flavor label.
    pub runner_type: String,
    /// Queries executed.
    pub total_queries: u64,
    /// Cumulative execution time.
    pub total_execution_time_ms: f64,
    /// Mean execution time.
    pub average_execution_time_ms: f64,
}

/// Result-cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Configured TTL.
    pub ttl_seconds: u64,
    /// Live entries (including not-yet-evicted expired ones).
    pub size: usize,
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses.
    pub misses: u64,
    /// Hit rate percentage over all lookups.
    pub hit_rate_percent: f64,
}

/// Serving-layer statistics across both layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServingStats {
    /// Always `"hybrid"`.
    pub runner_type: String,
    /// Batch queries across both batch runners.
    pub total_queries: u64,
    /// Queries answered by the materialized runner.
    pub materialized_queries: u64,
    /// Queries answered by the relational runner.
    pub relational_queries: u64,
    /// Recent-writes queries issued.
    pub speed_layer_queries: u64,
    /// Times the materialized path failed over to the relational path.
    pub fallbacks: u64,
    /// Share of batch queries served from materialized views.
    pub materialized_percentage: f64,
    /// Whether the recent-writes layer is enabled.
    pub speed_layer_enabled: bool,
    /// Entries in the view-existence cache.
    pub views_cached: usize,
    /// Materialized runner detail.
    pub materialized: RunnerStats,
    /// Relational runner detail.
    pub relational: RunnerStats,
    /// Relational result-cache detail.
    pub relational_cache: CacheStats,
}

/// Internal mutable counter pair behind the public snapshots.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<RecorderInner>,
}

#[derive(Debug, Default)]
struct RecorderInner {
    total_queries: u64,
    total_execution_time_ms: f64,
}

impl StatsRecorder {
    /// Record one completed query.
    pub fn record(&self, elapsed_ms: f64) {
        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        inner.total_execution_time_ms += elapsed_ms;
    }

    /// Snapshot the counters under a runner label.
    pub fn snapshot(&self, runner_type: &str) -> RunnerStats {
        let inner = self.inner.lock();
        let average = if inner.total_queries > 0 {
            inner.total_execution_time_ms / inner.total_queries as f64
        } else {
            0.0
        };
        RunnerStats {
            runner_type: runner_type.to_string(),
            total_queries: inner.total_queries,
            total_execution_time_ms: inner.total_execution_time_ms,
            average_execution_time_ms: average,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_accumulates() {
        let recorder = StatsRecorder::default();
        recorder.record(10.0);
        recorder.record(30.0);

        let stats = recorder.snapshot("relational");
        assert_eq!(stats.runner_type, "relational");
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.total_execution_time_ms, 40.0);
        assert_eq!(stats.average_execution_time_ms, 20.0);
    }

    #[test]
    fn test_empty_recorder_has_zero_average() {
        let stats = StatsRecorder::default().snapshot("materialized");
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.average_execution_time_ms, 0.0);
    }
}
