//! Command-line interface definitions for the `bootstrap-gather` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `bootstrap-gather` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bootstrap-gather",
    about = "Gather debugging data for a failed cluster bootstrap",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Install directory holding the persisted provisioning state.
    ///
    /// Bundles and the `.bootstrap_gather.log` file are written here.
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub(crate) dir: String,
    /// Log filter, either a level (`debug`) or a full directive list.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    pub(crate) log_level: String,
    /// Gather to run.
    #[command(subcommand)]
    pub(crate) command: GatherCommand,
}

/// Gather subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum GatherCommand {
    /// Gather debugging data for a failing-to-bootstrap control plane.
    #[command(name = "bootstrap")]
    Bootstrap(BootstrapCommand),
}

/// Arguments for the `bootstrap-gather bootstrap` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BootstrapCommand {
    /// Hostname or IP of the bootstrap host.
    ///
    /// When omitted together with `--master`, the addresses are read from
    /// the install directory.
    #[arg(long, value_name = "HOST")]
    pub(crate) bootstrap: Option<String>,
    /// Hostname or IP of a control-plane host. Repeat for each host.
    #[arg(long = "master", value_name = "HOST")]
    pub(crate) masters: Vec<String>,
    /// Private SSH key offered before the bootstrap key. Repeat as needed.
    #[arg(long = "key", value_name = "PATH")]
    pub(crate) keys: Vec<String>,
    /// Skip the analysis of the combined bundle.
    #[arg(long)]
    pub(crate) skip_analysis: bool,
}
