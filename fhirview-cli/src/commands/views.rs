//! `fhirview views` - view inspection and management.

use fhirview_runner::{AnalyticsEngine, EngineConfig};

use crate::cli::ViewsAction;
use crate::error::{CliError, CliResult};
use crate::output;

/// Dispatch a views action.
pub async fn run(action: ViewsAction) -> CliResult<()> {
    let engine = AnalyticsEngine::new(EngineConfig::from_env()?).await?;
    let result = run_action(&engine, action).await;
    engine.close();
    result
}

async fn run_action(engine: &AnalyticsEngine, action: ViewsAction) -> CliResult<()> {
    match action {
        ViewsAction::List => {
            let views = engine.list_materialized_views().await?;
            output::section("MATERIALIZED VIEWS");

            if views.is_empty() {
                output::info("no materialized views found");
                return Ok(());
            }

            for view in views {
                let staleness = view
                    .staleness_hours
                    .map(|h| format!("{h:.1}h old"))
                    .unwrap_or_else(|| "never refreshed".to_string());
                output::info(&format!(
                    "{:<28} {:>10} rows  {:>10}  {:<10} {}{}",
                    view.view_name,
                    view.row_count,
                    view.size,
                    view.status.as_str(),
                    staleness,
                    if view.is_stale { " (stale)" } else { "" },
                ));
            }
        }

        ViewsAction::Status { name } => {
            let status = engine.materialized_view_status(&name).await?;
            output::section(&format!("VIEW STATUS: {name}"));

            if !status.exists {
                return Err(CliError::failed(format!(
                    "materialized view '{name}' does not exist"
                )));
            }

            output::info(&format!("rows: {}", status.row_count));
            output::info(&format!("size: {} bytes", status.size_bytes));
            output::info(&format!("needs refresh: {}", status.needs_refresh));

            if let Some(metadata) = status.metadata {
                output::info(&format!("status: {}", metadata.status.as_str()));
                if let Some(refreshed) = metadata.last_refreshed_at {
                    output::info(&format!("last refreshed: {refreshed}"));
                }
                if let Some(duration) = metadata.refresh_duration_ms {
                    output::info(&format!("last refresh took: {duration:.1}ms"));
                }
                if let Some(error) = metadata.error_message {
                    output::info(&format!("last error: {error}"));
                }
            }
        }

        ViewsAction::Show { name } => {
            let def = engine.get_view_definition(&name)?;
            output::info(&def.describe_sql());
        }

        ViewsAction::Materialize { name } => {
            let outcome = engine.materialize_view(&name).await?;
            output::success(&format!(
                "materialized '{}' in {:.1}ms ({} rows)",
                outcome.view_name, outcome.refresh_duration_ms, outcome.row_count
            ));
        }

        ViewsAction::Drop { name } => {
            engine.drop_materialized_view(&name).await?;
            output::success(&format!("dropped materialized view '{name}'"));
        }
    }

    Ok(())
}
