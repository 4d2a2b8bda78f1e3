//! Periodic refresh pipeline.
//!
//! Drives `refresh_all_views` on an interval (or once, for the CLI) and is
//! the only component that advances `last_refreshed_at` in batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use fhirview_query::EngineResult;

use crate::service::{MaterializedViewService, RefreshSummary};

/// Driver around the materialized-view service.
pub struct RefreshPipeline {
    service: Arc<MaterializedViewService>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl RefreshPipeline {
    /// Create a pipeline refreshing on the given interval.
    pub fn new(service: Arc<MaterializedViewService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that cancels the running pipeline.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run one refresh sweep and return its summary.
    pub async fn run_once(&self) -> EngineResult<RefreshSummary> {
        info!("refresh pipeline sweep starting");
        let summary = self.service.refresh_all_views().await?;

        if summary.failed > 0 {
            error!(
                refreshed = summary.refreshed,
                failed = summary.failed,
                "refresh sweep finished with failures"
            );
            for message in &summary.errors {
                error!(error = %message, "refresh failure");
            }
        } else {
            info!(refreshed = summary.refreshed, "refresh sweep finished");
        }

        Ok(summary)
    }

    /// Run one stale-only sweep: refresh views past their threshold.
    pub async fn run_stale_sweep(&self) -> EngineResult<RefreshSummary> {
        let stale = self.service.check_and_refresh_stale_views().await?;
        let refreshed = stale.refreshed;
        let failed = stale.failed;
        let errors = stale
            .results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.view_name)))
            .collect();

        Ok(RefreshSummary {
            total: stale.stale_views,
            refreshed,
            failed,
            errors,
            results: stale.results,
        })
    }

    /// Run sweeps until the shutdown handle is notified. Errors are logged
    /// and the loop continues; cancellation exits after the current sweep.
    pub async fn run_periodic(&self) {
        info!(interval_secs = self.interval.as_secs(), "refresh pipeline started");

        loop {
            if let Err(e) = self.run_stale_sweep().await {
                error!(error = %e, "refresh sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => {
                    info!("refresh pipeline stopping");
                    break;
                }
            }
        }
    }
}
