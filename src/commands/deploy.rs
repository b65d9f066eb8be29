// ABOUTME: Deploy command implementation.
// ABOUTME: Resolves targets, then runs one pipeline task per target in parallel.

use parking_lot::Mutex;
use rollout::config::Config;
use rollout::deploy::{DeploymentTarget, Orchestrator, RunOptions, RunReport};
use rollout::diagnostics::Diagnostics;
use rollout::error::{EXIT_FAILED, Result};
use rollout::output::Output;
use std::sync::Arc;

pub struct DeployArgs<'a> {
    pub targets: &'a [String],
    pub environment: &'a str,
    pub skip_backup: bool,
    pub dry_run: bool,
    pub no_wait: bool,
}

/// Deploy the named targets. Returns the most severe per-target exit code.
pub async fn deploy(config: &Config, args: DeployArgs<'_>, mut output: Output) -> Result<i32> {
    let config = config.for_environment(args.environment)?;

    let mut targets: Vec<Arc<DeploymentTarget>> = Vec::new();
    for name in args.targets {
        if targets.iter().any(|t| t.name.as_str() == name) {
            continue;
        }
        targets.push(Arc::new(DeploymentTarget::from_config(
            &config,
            name,
            args.environment,
        )?));
    }

    let orchestrator = Orchestrator::from_config(&config);
    let options = RunOptions {
        skip_backup: args.skip_backup,
        wait_for_lock: !args.no_wait,
    };

    if args.dry_run {
        for target in &targets {
            output.plan(target.name.as_str(), &orchestrator.plan(target, options));
        }
        return Ok(0);
    }

    output.start_timer();
    output.progress(&format!(
        "Deploying {} to {}",
        targets
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        args.environment
    ));

    let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));
    let handles: Vec<_> = targets
        .iter()
        .map(|target| {
            let orchestrator = orchestrator.clone();
            let target = target.clone();
            let diagnostics = diagnostics.clone();
            tokio::spawn(async move {
                let mut diag = Diagnostics::default();
                let report = orchestrator.run(target, options, &mut diag).await;
                diagnostics.lock().absorb(diag);
                report
            })
        })
        .collect();

    let mut exit_code = 0;
    for (target, joined) in targets.iter().zip(futures::future::join_all(handles).await) {
        let code = match joined {
            Ok(report) => report_run(&report, &output),
            Err(e) => {
                output.error(&format!("{}: pipeline task failed: {e}", target.name));
                EXIT_FAILED
            }
        };
        exit_code = exit_code.max(code);
    }

    for warning in diagnostics.lock().warnings() {
        output.warning(&warning.message);
    }

    Ok(exit_code)
}

fn report_run(report: &RunReport, output: &Output) -> i32 {
    output.run_summary(&report.run);
    if let Some(err) = &report.error
        && let Some(backup) = err.backup_location()
    {
        output.error(&format!(
            "{}: restore manually from {}",
            report.run.target,
            backup.display()
        ));
    }
    report.exit_code()
}
