//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};

/// fhirview - SQL-on-FHIR analytics engine administration
#[derive(Parser, Debug)]
#[command(name = "fhirview")]
#[command(version)]
#[command(about = "Administer the fhirview analytics engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Refresh materialized views (the batch pipeline)
    Refresh(RefreshArgs),

    /// Validate referential integrity across materialized views
    Validate(ValidateArgs),

    /// Inspect and manage materialized views and view definitions
    Views(ViewsArgs),
}

/// Arguments for the `refresh` command
#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Refresh only views past their staleness threshold
    #[arg(long)]
    pub stale_only: bool,

    /// Skip the integrity validation that follows the refresh
    #[arg(long)]
    pub skip_validation: bool,
}

/// Arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Maximum join latency in milliseconds before the performance check
    /// fails
    #[arg(long, default_value_t = 100.0)]
    pub join_latency_ms: f64,
}

/// Arguments for the `views` command
#[derive(Args, Debug)]
pub struct ViewsArgs {
    #[command(subcommand)]
    pub action: ViewsAction,
}

/// View management actions
#[derive(Subcommand, Debug)]
pub enum ViewsAction {
    /// List materialized views with their metadata
    List,

    /// Show detailed status for one materialized view
    Status {
        /// View name
        name: String,
    },

    /// Show a view definition as readable pseudo-SQL
    Show {
        /// View definition name
        name: String,
    },

    /// Materialize a view from its definition
    Materialize {
        /// View definition name
        name: String,
    },

    /// Drop a materialized view
    Drop {
        /// View name
        name: String,
    },
}
