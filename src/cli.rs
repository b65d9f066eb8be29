// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Build, place, and verify deployments with rollback on failure")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: rollout.yml, rollout.yaml, or .rollout/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new rollout.yml configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run the pipeline for one or more targets
    Deploy {
        /// Targets to deploy (run in parallel)
        #[arg(required = true)]
        targets: Vec<String>,

        /// Environment overrides to apply (defined in config)
        #[arg(short, long, default_value = rollout::config::DEFAULT_ENVIRONMENT)]
        environment: String,

        /// Do not snapshot the current deployment (disables rollback)
        #[arg(long)]
        skip_backup: bool,

        /// Print the plan without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Fail instead of waiting when another run holds the lock
        #[arg(long)]
        no_wait: bool,
    },

    /// Restore a target from a backup
    Rollback {
        target: String,

        #[arg(short, long, default_value = rollout::config::DEFAULT_ENVIRONMENT)]
        environment: String,

        /// Backup directory to restore (default: newest)
        #[arg(long)]
        backup: Option<PathBuf>,

        /// Fail instead of waiting when another run holds the lock
        #[arg(long)]
        no_wait: bool,
    },

    /// Show the latest run and backups
    Status {
        /// Limit to one target
        target: Option<String>,
    },
}
