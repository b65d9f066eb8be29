// ABOUTME: Entry point for the rollout CLI application.
// ABOUTME: Parses arguments, sets up logging, and maps outcomes onto exit codes.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use rollout::config::{self, Config};
use rollout::error::Result;
use rollout::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let output = Output::new(mode);

    match run(cli, output.clone()).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output.error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli, output: Output) -> Result<i32> {
    let cwd = env::current_dir()?;

    match cli.command {
        Commands::Init { force } => {
            config::init_config(&cwd, force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(0)
        }
        Commands::Deploy {
            targets,
            environment,
            skip_backup,
            dry_run,
            no_wait,
        } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            let args = commands::DeployArgs {
                targets: &targets,
                environment: &environment,
                skip_backup,
                dry_run,
                no_wait,
            };
            commands::deploy(&config, args, output).await
        }
        Commands::Rollback {
            target,
            environment,
            backup,
            no_wait,
        } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            commands::rollback(
                &config,
                &target,
                &environment,
                backup.as_deref(),
                no_wait,
                output,
            )
            .await?;
            Ok(0)
        }
        Commands::Status { target } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            commands::status(&config, target.as_deref(), &output)?;
            Ok(0)
        }
    }
}

fn load_config(path: Option<&std::path::Path>, cwd: &std::path::Path) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(cwd),
    }
}
