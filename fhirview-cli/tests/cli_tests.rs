//! Integration tests for the fhirview CLI
//!
//! These exercise argument parsing and help output only; clap answers them
//! before any engine or database connection is attempted.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get the fhirview binary
#[allow(deprecated)]
fn fhirview_cmd() -> Command {
    Command::cargo_bin("fhirview").unwrap()
}

#[test]
fn test_help_command() {
    fhirview_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Administer the fhirview analytics engine"))
        .stdout(predicate::str::contains("Usage: fhirview <COMMAND>"))
        .stdout(predicate::str::contains("refresh"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("views"));
}

#[test]
fn test_version_command() {
    fhirview_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fhirview"))
        .stdout(predicate::str::contains("0.3.0"));
}

#[test]
fn test_refresh_help() {
    fhirview_cmd()
        .args(["refresh", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Refresh materialized views"))
        .stdout(predicate::str::contains("--stale-only"))
        .stdout(predicate::str::contains("--skip-validation"));
}

#[test]
fn test_validate_help() {
    fhirview_cmd()
        .args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("referential integrity"))
        .stdout(predicate::str::contains("--join-latency-ms"));
}

#[test]
fn test_views_help() {
    fhirview_cmd()
        .args(["views", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("manage materialized views"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("materialize"))
        .stdout(predicate::str::contains("drop"));
}

#[test]
fn test_views_status_help() {
    fhirview_cmd()
        .args(["views", "status", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("detailed status"))
        .stdout(predicate::str::contains("View name"));
}

#[test]
fn test_views_show_help() {
    fhirview_cmd()
        .args(["views", "show", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pseudo-SQL"));
}

#[test]
fn test_unknown_subcommand_fails() {
    fhirview_cmd()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_views_status_requires_name() {
    fhirview_cmd()
        .args(["views", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
