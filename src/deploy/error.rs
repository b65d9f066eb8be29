// ABOUTME: Error types for pipeline runs.
// ABOUTME: Precondition, backup, build, deploy, health check, rollback, and lock failures.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Information about the process holding a deploy lock.
#[derive(Debug, Clone)]
pub struct LockHolderInfo {
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub target: String,
}

/// Errors that end a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Refused before any mutation (privilege check, missing source, pre-deploy hook).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Snapshot of the current deployment could not be taken; nothing was changed.
    #[error("backup failed: {0}")]
    Backup(String),

    /// Dependency install or every build variant failed; deploy path untouched.
    #[error("build failed: {0}")]
    Build(String),

    /// Placement, proxy activation, or service restart failed after mutation began.
    #[error("{stage} failed: {message}")]
    Deploy {
        stage: &'static str,
        message: String,
    },

    /// Deployment completed but the target does not respond.
    #[error("health check failed: {0}")]
    HealthCheck(String),

    /// Restoring the previous deployment failed. Manual recovery required.
    #[error("rollback failed: {reason} (restore manually from {})", .backup.display())]
    Rollback { reason: String, backup: PathBuf },

    /// Another run holds the target lock.
    #[error("deploy lock held by {} (pid {}) since {}", .0.holder, .0.pid, .0.started_at)]
    LockHeld(Box<LockHolderInfo>),

    /// Lock file could not be created or locked.
    #[error("deploy lock error: {0}")]
    Lock(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Precondition,
    Backup,
    Build,
    Deploy,
    HealthCheck,
    Rollback,
    LockHeld,
    Lock,
}

impl DeployError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Precondition(_) => DeployErrorKind::Precondition,
            DeployError::Backup(_) => DeployErrorKind::Backup,
            DeployError::Build(_) => DeployErrorKind::Build,
            DeployError::Deploy { .. } => DeployErrorKind::Deploy,
            DeployError::HealthCheck(_) => DeployErrorKind::HealthCheck,
            DeployError::Rollback { .. } => DeployErrorKind::Rollback,
            DeployError::LockHeld(_) => DeployErrorKind::LockHeld,
            DeployError::Lock(_) => DeployErrorKind::Lock,
        }
    }

    /// Returns lock holder info if this is a LockHeld error.
    pub fn lock_holder_info(&self) -> Option<&LockHolderInfo> {
        match self {
            DeployError::LockHeld(info) => Some(&**info),
            _ => None,
        }
    }

    /// Backup location to restore from by hand, if this is a rollback failure.
    pub fn backup_location(&self) -> Option<&PathBuf> {
        match self {
            DeployError::Rollback { backup, .. } => Some(backup),
            _ => None,
        }
    }

    pub(crate) fn lock_held(
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
        target: String,
    ) -> Self {
        DeployError::LockHeld(Box::new(LockHolderInfo {
            holder,
            pid,
            started_at,
            target,
        }))
    }

    pub(crate) fn place(message: impl Into<String>) -> Self {
        DeployError::Deploy {
            stage: "place_artifacts",
            message: message.into(),
        }
    }

    pub(crate) fn proxy(message: impl Into<String>) -> Self {
        DeployError::Deploy {
            stage: "activate_proxy_config",
            message: message.into(),
        }
    }

    pub(crate) fn restart(message: impl Into<String>) -> Self {
        DeployError::Deploy {
            stage: "restart_service",
            message: message.into(),
        }
    }
}
