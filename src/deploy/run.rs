// ABOUTME: Pipeline run records: stage results, run status, and rollback outcome.
// ABOUTME: A PipelineRun is owned by one run and serialized for audit when it ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::BackupHandle;
use crate::types::TargetName;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Backup,
    InstallDependencies,
    Build,
    PlaceArtifacts,
    ActivateProxyConfig,
    RestartService,
    HealthCheck,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Backup,
        StageName::InstallDependencies,
        StageName::Build,
        StageName::PlaceArtifacts,
        StageName::ActivateProxyConfig,
        StageName::RestartService,
        StageName::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Backup => "backup",
            StageName::InstallDependencies => "install_dependencies",
            StageName::Build => "build",
            StageName::PlaceArtifacts => "place_artifacts",
            StageName::ActivateProxyConfig => "activate_proxy_config",
            StageName::RestartService => "restart_service",
            StageName::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageOutcome::Success => "success",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    /// Captured command output excerpt or a short explanation.
    pub message: String,
    /// For retrying stages: 1-based index of the variant or probe that decided the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::RolledBack
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled back",
        })
    }
}

/// What rollback did, recorded separately from the failure that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Steps that completed, in order.
    pub steps: Vec<String>,
    /// Set when restoration failed and the operator must intervene.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One execution of the pipeline against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub target: TargetName,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupHandle>,
    /// The error that ended the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackRecord>,
}

/// Start time of a stage in progress.
#[derive(Debug)]
#[must_use = "a started stage must be completed"]
pub struct StageTimer {
    stage: StageName,
    started_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(target: TargetName, environment: impl Into<String>) -> Self {
        Self {
            target,
            environment: environment.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Pending,
            stages: Vec::new(),
            backup: None,
            failure: None,
            rollback: None,
        }
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Whether rollback ran but could not restore the previous deployment.
    pub fn rollback_failed(&self) -> bool {
        self.rollback.as_ref().is_some_and(|r| r.error.is_some())
    }

    pub(crate) fn mark_running(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
            tracing::info!(
                target_name = %self.target,
                environment = %self.environment,
                "pipeline started"
            );
        }
    }

    pub(crate) fn begin_stage(&self, stage: StageName) -> StageTimer {
        tracing::info!(
            target_name = %self.target,
            stage = %stage,
            "stage started"
        );
        StageTimer {
            stage,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn complete_stage(
        &mut self,
        timer: StageTimer,
        outcome: StageOutcome,
        message: impl Into<String>,
        attempt: Option<u32>,
    ) {
        let result = StageResult {
            stage: timer.stage,
            started_at: timer.started_at,
            ended_at: Utc::now(),
            outcome,
            message: message.into(),
            attempt,
        };

        match outcome {
            StageOutcome::Failed => tracing::error!(
                target_name = %self.target,
                stage = %result.stage,
                outcome = %outcome,
                attempt = ?attempt,
                message = %result.message,
                "stage finished"
            ),
            _ => tracing::info!(
                target_name = %self.target,
                stage = %result.stage,
                outcome = %outcome,
                attempt = ?attempt,
                "stage finished"
            ),
        }

        self.stages.push(result);
    }

    pub(crate) fn finish(&mut self, status: RunStatus, failure: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.failure = failure;
        self.finished_at = Some(Utc::now());
        tracing::info!(
            target_name = %self.target,
            status = %status,
            "pipeline finished"
        );
    }
}
