// ABOUTME: Rollback command implementation.
// ABOUTME: Restores a target's deploy path from its newest or a chosen backup.

use rollout::config::Config;
use rollout::deploy::{DeploymentTarget, Orchestrator, RunOptions};
use rollout::diagnostics::Diagnostics;
use rollout::error::Result;
use rollout::output::Output;
use std::path::Path;

pub async fn rollback(
    config: &Config,
    target: &str,
    environment: &str,
    backup: Option<&Path>,
    no_wait: bool,
    mut output: Output,
) -> Result<()> {
    let config = config.for_environment(environment)?;
    let target = DeploymentTarget::from_config(&config, target, environment)?;
    let orchestrator = Orchestrator::from_config(&config);
    let options = RunOptions {
        skip_backup: false,
        wait_for_lock: !no_wait,
    };

    output.start_timer();
    output.progress(&format!(
        "Rolling back {} ({})",
        target.name,
        target.deploy_path.display()
    ));

    let mut diag = Diagnostics::default();
    let result = orchestrator
        .rollback(&target, backup, options, &mut diag)
        .await;

    // Emit collected warnings
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    let rollback = result?;
    if let Some(saved) = &rollback.saved {
        output.progress(&format!(
            "  → previous content saved to {}",
            saved.location.display()
        ));
    }
    if let Some(service) = &rollback.restarted {
        output.progress(&format!("  → restarted {service}"));
    }
    output.success(&format!(
        "{} restored from {}",
        target.name,
        rollback.restored.location.display()
    ));
    Ok(())
}
