// ABOUTME: Manual rollback: restore a target's deploy path from a backup on request.
// ABOUTME: The current content is backed up first, so a second rollback swaps back.

use std::path::Path;

use crate::supervisor::{self, Supervisor};

use super::DeployError;
use super::backup::BackupHandle;
use super::fs::replace_dir_atomically;
use super::target::DeploymentTarget;

/// What a manual rollback did.
#[derive(Debug, Clone)]
pub struct ManualRollback {
    /// The backup that is now live.
    pub restored: BackupHandle,
    /// Snapshot of what was live before, if anything was.
    pub saved: Option<BackupHandle>,
    pub restarted: Option<String>,
}

/// Restore `backup` into the target's deploy path and restart its service.
///
/// This function:
/// 1. Backs up the current deploy path (if it exists)
/// 2. Replaces the deploy path with the backup via staging and rename
/// 3. Restarts the service, if the target has one, and waits for it
///
/// After rollback the previously live content is the newest backup, so
/// rolling back again without naming a backup returns to it.
///
/// # Errors
///
/// Returns `DeployError::Backup` if the current content cannot be saved
/// (nothing changed), or `DeployError::Rollback` naming `backup` if the
/// restore or restart fails.
pub async fn manual_rollback(
    target: &DeploymentTarget,
    backup: &BackupHandle,
    backup_root: &Path,
    supervisor: &dyn Supervisor,
) -> Result<ManualRollback, DeployError> {
    let failed = |reason: String| DeployError::Rollback {
        reason,
        backup: backup.location.clone(),
    };

    let root = backup_root.to_path_buf();
    let name = target.name.clone();
    let deploy_path = target.deploy_path.clone();
    let saved = tokio::task::spawn_blocking(move || BackupHandle::create(&root, &name, &deploy_path))
        .await
        .map_err(|e| DeployError::Backup(e.to_string()))?
        .map_err(|e| DeployError::Backup(e.to_string()))?;

    let source = backup.location.clone();
    let dest = target.deploy_path.clone();
    tokio::task::spawn_blocking(move || replace_dir_atomically(&source, &dest))
        .await
        .map_err(|e| failed(format!("restore task failed: {e}")))?
        .map_err(|e| failed(format!("restoring {}: {e}", target.deploy_path.display())))?;

    tracing::info!(
        target_name = %target.name,
        backup = %backup.location.display(),
        "deploy path restored"
    );

    let restarted = match &target.service {
        Some(service) => {
            supervisor
                .stop(service)
                .await
                .map_err(|e| failed(format!("stopping {}: {e}", service.name)))?;
            supervisor
                .start(service, &target.environment)
                .await
                .map_err(|e| failed(format!("starting {}: {e}", service.name)))?;
            supervisor::wait_until_running(
                supervisor,
                service,
                target.restart_timeout,
                supervisor::POLL_INTERVAL,
            )
            .await
            .map_err(|e| failed(format!("waiting for {}: {e}", service.name)))?;
            Some(service.name.clone())
        }
        None => None,
    };

    Ok(ManualRollback {
        restored: backup.clone(),
        saved,
        restarted,
    })
}
