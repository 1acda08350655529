//! Command-line interface definitions for the `kiln` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `kiln` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    about = "Find or create a compute template and environment, then wait for a usable build",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Resolve the compute template and environment and wait for a build.
    #[command(
        name = "prepare",
        about = "Resolve the compute template and environment and wait for a build"
    )]
    Prepare(PrepareCommand),
}

/// Arguments for the `kiln prepare` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PrepareCommand {
    /// Name the environment is looked up and created under.
    #[arg(long, value_name = "NAME", requires = "environment_spec")]
    pub(crate) environment_name: Option<String>,
    /// JSON file holding the environment configuration.
    ///
    /// Without it the environment and its build are skipped.
    #[arg(long, value_name = "PATH", requires = "environment_name")]
    pub(crate) environment_spec: Option<String>,
    /// Name the compute template is looked up and created under.
    #[arg(long, value_name = "NAME", requires = "compute_spec")]
    pub(crate) compute_name: Option<String>,
    /// JSON file holding the compute template configuration.
    ///
    /// Without it the compute template is skipped.
    #[arg(long, value_name = "PATH", requires = "compute_name")]
    pub(crate) compute_spec: Option<String>,
    /// Seconds to wait for the environment build, overriding configuration.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
    /// Delete everything that was resolved once the run finishes.
    #[arg(long)]
    pub(crate) teardown: bool,
}
