use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "azpolicy-checker",
    about = "Check that Azure policy assignments allow and deny what they should",
    version
)]
pub struct Cli {
    /// Where requests go: Azure Resource Manager, or an in-memory simulation.
    #[arg(long, value_enum, default_value = "azure", global = true)]
    pub cloud: CloudArg,

    #[arg(long, env = "AZURE_SUBSCRIPTION_ID", global = true)]
    pub subscription_id: Option<String>,

    /// Base name for the resource group and network security group.
    #[arg(long, default_value = "daily_policies_tests", global = true)]
    pub name: String,

    /// Suffix that makes resource names unique to this run. Defaults to a fresh id.
    #[arg(long, global = true)]
    pub run_id: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a resource group and an SSH-open security group, then clean up.
    Smoke {
        #[arg(long, default_value = "West Europe")]
        location: String,
    },

    /// Run the expectation matrix and report every case.
    Check {
        #[arg(long, value_enum, default_value = "all")]
        suite: SuiteArg,

        /// YAML expectation matrix. Defaults to the built-in baseline.
        #[arg(long)]
        matrix: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Delete the run's resource group.
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CloudArg {
    Azure,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SuiteArg {
    Regions,
    Network,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
