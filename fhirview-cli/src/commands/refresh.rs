//! `fhirview refresh` - the batch refresh pipeline.

use fhirview_runner::{AnalyticsEngine, EngineConfig, RefreshSummary};

use crate::cli::RefreshArgs;
use crate::error::{CliError, CliResult};
use crate::output;

/// Refresh materialized views and exit non-zero if any refresh failed.
pub async fn run(args: RefreshArgs) -> CliResult<()> {
    output::section("MATERIALIZED VIEW REFRESH PIPELINE");

    let engine = AnalyticsEngine::new(EngineConfig::from_env()?).await?;

    let summary: RefreshSummary = if args.stale_only {
        let stale = engine.refresh_stale_views().await?;
        output::info(&format!(
            "checked {} views, {} stale",
            stale.total_checked, stale.stale_views
        ));
        RefreshSummary {
            total: stale.stale_views,
            refreshed: stale.refreshed,
            failed: stale.failed,
            errors: stale
                .results
                .iter()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.view_name)))
                .collect(),
            results: stale.results,
        }
    } else {
        engine.refresh_all_views().await?
    };

    for result in &summary.results {
        if result.success {
            output::success(&format!(
                "{} refreshed in {:.1}ms ({} rows)",
                result.view_name, result.refresh_duration_ms, result.row_count
            ));
        } else {
            output::error(&format!(
                "{} failed: {}",
                result.view_name,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    output::newline();
    output::info(&format!(
        "refreshed {}/{} views ({} failed)",
        summary.refreshed, summary.total, summary.failed
    ));

    if !args.skip_validation {
        output::section("INTEGRITY VALIDATION");
        let report = engine.validate_integrity().await?;
        crate::commands::validate::print_report(&report);

        if !report.overall_passed {
            engine.close();
            return Err(CliError::failed("integrity validation failed"));
        }
    }

    engine.close();

    if summary.failed > 0 {
        return Err(CliError::failed(format!(
            "{} of {} refreshes failed",
            summary.failed, summary.total
        )));
    }
    Ok(())
}
