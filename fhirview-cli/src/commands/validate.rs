//! `fhirview validate` - referential integrity checks.

use fhirview_runner::{AnalyticsEngine, EngineConfig, IntegrityReport};

use crate::cli::ValidateArgs;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the validator suite and exit non-zero if any check fails.
pub async fn run(args: ValidateArgs) -> CliResult<()> {
    output::section("REFERENTIAL INTEGRITY VALIDATION");

    let engine = AnalyticsEngine::new(EngineConfig::from_env()?).await?;
    let validator = engine
        .integrity_validator()
        .with_join_latency_ms(args.join_latency_ms);
    let report = validator.validate_all().await?;
    engine.close();

    print_report(&report);

    if report.overall_passed {
        Ok(())
    } else {
        Err(CliError::failed("integrity validation failed"))
    }
}

/// Print a report in the fixed console format.
pub fn print_report(report: &IntegrityReport) {
    output::info(&format!("schema: {}", report.schema_name));
    output::info(&format!(
        "overall: {}",
        if report.overall_passed { "PASSED" } else { "FAILED" }
    ));
    output::newline();

    for result in &report.results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        output::info(&format!("[{status}] {}", result.test_name));
        output::info(&format!(
            "  total: {}, valid: {} ({:.2}%)",
            result.total_count,
            result.valid_count,
            result.success_rate()
        ));

        if result.orphaned_count > 0 {
            output::info(&format!("  orphaned: {}", result.orphaned_count));
        }
        if result.invalid_count > 0 {
            output::info(&format!("  invalid: {}", result.invalid_count));
        }
        for error in result.errors.iter().take(3) {
            output::info(&format!("  error: {error}"));
        }
        for warning in result.warnings.iter().take(2) {
            output::info(&format!("  warning: {warning}"));
        }
        output::info(&format!("  time: {:.2}ms", result.execution_time_ms));
    }

    output::newline();
    output::info(&format!(
        "{}/{} checks passed",
        report.passed_count(),
        report.results.len()
    ));
}
