// ABOUTME: Status command implementation.
// ABOUTME: Shows each target's latest recorded run, backups, and current lock holder.

use chrono::{DateTime, Utc};
use rollout::config::Config;
use rollout::deploy::{BackupHandle, DeployLock, LockHolderInfo, RunStatus, audit};
use rollout::error::Result;
use rollout::output::{Output, OutputMode};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct TargetStatus {
    target: String,
    deploy_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_failure: Option<String>,
    backups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_backup: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_by: Option<String>,
}

pub fn status(config: &Config, target: Option<&str>, output: &Output) -> Result<()> {
    let names: Vec<_> = match target {
        Some(name) => vec![config.target(name)?.0.clone()],
        None => config.targets.keys().cloned().collect(),
    };

    let state_dir = config.state_dir();
    let backup_root = config.backup_root();

    for name in names {
        let (_, target) = config.target(name.as_str())?;
        let last = audit::latest(&state_dir, &name)?;
        let backups = BackupHandle::list(&backup_root, &name)?;
        let locked_by = match DeployLock::try_acquire(&state_dir, &name, &target.deploy_path) {
            Ok(lock) => {
                let _ = lock.release();
                None
            }
            Err(e) => e.lock_holder_info().map(describe_holder),
        };

        let status = TargetStatus {
            target: name.to_string(),
            deploy_path: target.deploy_path.clone(),
            last_status: last.as_ref().map(|r| r.status),
            last_run_at: last.as_ref().map(|r| r.started_at),
            last_failure: last.as_ref().and_then(|r| r.failure.clone()),
            backups: backups.len(),
            latest_backup: backups.last().map(|b| b.location.clone()),
            locked_by,
        };
        print_status(&status, output);
    }

    Ok(())
}

fn describe_holder(info: &LockHolderInfo) -> String {
    format!("{} (pid {}) since {}", info.holder, info.pid, info.started_at)
}

fn print_status(status: &TargetStatus, output: &Output) {
    match output.mode() {
        OutputMode::Json => {
            if let Ok(json) = serde_json::to_string(status) {
                println!("{json}");
            }
        }
        OutputMode::Quiet => println!(
            "{}: {}",
            status.target,
            status
                .last_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "never deployed".to_string())
        ),
        OutputMode::Normal => {
            println!("{} → {}", status.target, status.deploy_path.display());
            match (status.last_status, status.last_run_at) {
                (Some(s), Some(at)) => println!("  last run: {s} at {at}"),
                _ => println!("  last run: none recorded"),
            }
            if let Some(failure) = &status.last_failure {
                println!("  failure:  {}", failure.lines().next().unwrap_or(""));
            }
            match &status.latest_backup {
                Some(latest) => println!(
                    "  backups:  {} (newest {})",
                    status.backups,
                    latest.display()
                ),
                None => println!("  backups:  none"),
            }
            if let Some(holder) = &status.locked_by {
                println!("  locked by {holder}");
            }
        }
    }
}
