// ABOUTME: Runs the full pipeline for one target: preconditions, lock, stages, rollback, audit.
// ABOUTME: Also plans dry runs and performs manual rollbacks under the same lock.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{EXIT_FAILED, EXIT_ROLLBACK_FAILED, EXIT_ROLLED_BACK};
use crate::exec::{CommandRunner, CommandSpec, SystemRunner};
use crate::hooks::{HookContext, HookPoint, HookRunner};
use crate::proxy::{NginxProxy, Proxy};
use crate::supervisor::{self, Supervisor};

use super::audit;
use super::backup::BackupHandle;
use super::deployment::Deployment;
use super::error::DeployError;
use super::fs::{SwapRecovery, recover_interrupted_swap};
use super::lock::DeployLock;
use super::rollback::{ManualRollback, manual_rollback};
use super::run::{PipelineRun, RunStatus, StageName};
use super::state::{Initialized, Mutating};
use super::target::DeploymentTarget;

/// Per-invocation switches.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub skip_backup: bool,
    /// Queue behind a run holding the lock instead of failing.
    pub wait_for_lock: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            skip_backup: false,
            wait_for_lock: true,
        }
    }
}

/// A finished run and the error that ended it, if any.
#[derive(Debug)]
pub struct RunReport {
    pub run: PipelineRun,
    pub error: Option<DeployError>,
    /// Where the run was recorded, if writing the record succeeded.
    pub audit_path: Option<PathBuf>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match self.run.status {
            RunStatus::Succeeded => 0,
            RunStatus::RolledBack => EXIT_ROLLED_BACK,
            _ if self.run.rollback_failed() => EXIT_ROLLBACK_FAILED,
            _ => EXIT_FAILED,
        }
    }
}

/// One stage of a dry-run plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStage {
    pub stage: StageName,
    pub action: String,
    /// Commands as they would be executed, escalation prefix included.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

/// Drives pipelines. Cheap to clone; one per process is shared by all targets.
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    supervisor: Arc<dyn Supervisor>,
    proxy: Arc<dyn Proxy>,
    hooks: Option<Arc<HookRunner>>,
    state_dir: PathBuf,
    backup_root: PathBuf,
    effective_uid: Option<u32>,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        supervisor: Arc<dyn Supervisor>,
        proxy: Arc<dyn Proxy>,
        state_dir: PathBuf,
        backup_root: PathBuf,
    ) -> Self {
        Self {
            runner,
            supervisor,
            proxy,
            hooks: None,
            state_dir,
            backup_root,
            effective_uid: current_effective_uid(),
        }
    }

    /// Wire up the real runner, supervisor, proxy, and hooks from config.
    pub fn from_config(config: &Config) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::new(config.privilege.escalate.clone()));
        let state_dir = config.state_dir();
        let supervisor = supervisor::from_config(&config.supervisor, runner.clone());
        let proxy = Arc::new(NginxProxy::new(&config.proxy, runner.clone(), &state_dir));
        let hooks = HookRunner::new(&config.hooks_dir(), runner.clone());

        Self::new(runner, supervisor, proxy, state_dir, config.backup_root()).with_hooks(hooks)
    }

    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Override the detected effective uid (`None` disables the root check).
    pub fn with_effective_uid(mut self, uid: Option<u32>) -> Self {
        self.effective_uid = uid;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Run the pipeline for `target` to a terminal state and record it.
    pub async fn run(
        &self,
        target: Arc<DeploymentTarget>,
        options: RunOptions,
        diagnostics: &mut Diagnostics,
    ) -> RunReport {
        let deployment = Deployment::new(target.clone());

        let (run, error) = match self.prepare(&target, options, diagnostics).await {
            Ok(lock) => {
                let (run, error) = self.pipeline(deployment, options).await;
                self.after_run(&target, &run, diagnostics).await;
                if let Err(e) = lock.release() {
                    diagnostics.warn(Warning::lock_release(e.to_string()));
                }
                (run, error)
            }
            Err(e) => {
                let (run, error) = deployment.fail(e);
                (run, Some(error))
            }
        };

        let audit_path = match audit::record(&self.state_dir, &run) {
            Ok(path) => Some(path),
            Err(e) => {
                diagnostics.warn(Warning::audit(format!(
                    "failed to record run for {}: {e}",
                    target.name
                )));
                None
            }
        };

        RunReport {
            run,
            error,
            audit_path,
        }
    }

    /// Checks that must pass before anything is touched. Returns the held lock.
    async fn prepare(
        &self,
        target: &DeploymentTarget,
        options: RunOptions,
        diagnostics: &mut Diagnostics,
    ) -> Result<DeployLock, DeployError> {
        self.check_not_root()?;
        check_source_readable(target)?;

        let lock = if options.wait_for_lock {
            DeployLock::acquire(&self.state_dir, &target.name, &target.deploy_path).await?
        } else {
            DeployLock::try_acquire(&self.state_dir, &target.name, &target.deploy_path)?
        };

        match recover_interrupted_swap(&target.deploy_path) {
            Ok(SwapRecovery::Clean) => {}
            Ok(SwapRecovery::RemovedLeftovers) => diagnostics.warn(Warning::swap_recovery(format!(
                "removed leftovers of an interrupted placement next to {}",
                target.deploy_path.display()
            ))),
            Ok(SwapRecovery::RestoredPrevious) => diagnostics.warn(Warning::swap_recovery(format!(
                "restored {} from an interrupted placement",
                target.deploy_path.display()
            ))),
            Err(e) => {
                return Err(DeployError::Precondition(format!(
                    "recovering interrupted placement at {}: {e}",
                    target.deploy_path.display()
                )));
            }
        }

        if let Some(hooks) = &self.hooks
            && let Some(result) = hooks
                .run(HookPoint::PreDeploy, &hook_context(target, None))
                .await
            && !result.success
        {
            return Err(DeployError::Precondition(format!(
                "pre-deploy hook failed (exit code {:?}): {}",
                result.exit_code,
                result.stderr.trim()
            )));
        }

        Ok(lock)
    }

    async fn pipeline(
        &self,
        deployment: Deployment<Initialized>,
        options: RunOptions,
    ) -> (PipelineRun, Option<DeployError>) {
        let runner = self.runner.as_ref();
        let proxy = self.proxy.as_ref();
        let supervisor = self.supervisor.as_ref();

        let d = match deployment.backup(&self.backup_root, options.skip_backup).await {
            Ok(d) => d,
            Err((d, e)) => return failed(d, e),
        };
        let d = match d.install_dependencies(runner).await {
            Ok(d) => d,
            Err((d, e)) => return failed(d, e),
        };
        let d = match d.build(runner).await {
            Ok(d) => d,
            Err((d, e)) => return failed(d, e),
        };
        let d = match d.place_artifacts().await {
            Ok(d) => d,
            Err((d, e)) => return rolled_back(d, e, proxy, supervisor).await,
        };
        let d = match d.activate_proxy_config(proxy).await {
            Ok(d) => d,
            Err((d, e)) => return rolled_back(d, e, proxy, supervisor).await,
        };
        let d = match d.restart_service(supervisor).await {
            Ok(d) => d,
            Err((d, e)) => return rolled_back(d, e, proxy, supervisor).await,
        };
        let d = match d.health_check().await {
            Ok(d) => d,
            Err((d, e)) => return rolled_back(d, e, proxy, supervisor).await,
        };

        (d.finish(), None)
    }

    async fn after_run(
        &self,
        target: &DeploymentTarget,
        run: &PipelineRun,
        diagnostics: &mut Diagnostics,
    ) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        let point = if run.status == RunStatus::Succeeded {
            HookPoint::PostDeploy
        } else {
            HookPoint::OnError
        };
        let backup = run.backup.as_ref().map(|b| b.location.clone());
        if let Some(result) = hooks.run(point, &hook_context(target, backup)).await
            && !result.success
        {
            diagnostics.warn(Warning::hook(format!(
                "{} hook for {} failed (exit code {:?})",
                point.filename(),
                target.name,
                result.exit_code
            )));
        }
    }

    fn check_not_root(&self) -> Result<(), DeployError> {
        if self.effective_uid == Some(0) {
            return Err(DeployError::Precondition(
                "refusing to run as root; configure privilege.escalate for privileged steps"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Describe what a run would do without doing any of it.
    pub fn plan(&self, target: &DeploymentTarget, options: RunOptions) -> Vec<PlannedStage> {
        let argv = |spec: &CommandSpec| self.runner.effective_argv(spec).to_string();
        let build_spec = |a: &crate::types::Argv| {
            CommandSpec::new(a.clone(), target.build_timeout).cwd(&target.source_path)
        };
        let mut plan = Vec::with_capacity(StageName::ALL.len());

        let backup = if options.skip_backup {
            "skip (requested)".to_string()
        } else if target.deploy_path.exists() {
            format!(
                "copy {} to {}",
                target.deploy_path.display(),
                BackupHandle::target_dir(&self.backup_root, &target.name)
                    .join("<timestamp>")
                    .display()
            )
        } else {
            format!("skip (nothing deployed at {})", target.deploy_path.display())
        };
        plan.push(PlannedStage {
            stage: StageName::Backup,
            action: backup,
            commands: Vec::new(),
        });

        plan.push(PlannedStage {
            stage: StageName::InstallDependencies,
            action: if target.install.is_empty() {
                "skip (no install commands)".to_string()
            } else {
                format!("first of {} variant(s) to exit 0", target.install.len())
            },
            commands: target
                .install
                .iter()
                .map(|a| argv(&build_spec(a)))
                .collect(),
        });

        plan.push(PlannedStage {
            stage: StageName::Build,
            action: if target.build.is_empty() {
                format!("use existing {}", target.artifact_dir.display())
            } else {
                format!(
                    "first of {} variant(s) to exit 0 and fill {}",
                    target.build.len(),
                    target.artifact_dir.display()
                )
            },
            commands: target.build.iter().map(|a| argv(&build_spec(a))).collect(),
        });

        plan.push(PlannedStage {
            stage: StageName::PlaceArtifacts,
            action: format!(
                "replace {} with {}",
                target.deploy_path.display(),
                target.artifact_dir.display()
            ),
            commands: Vec::new(),
        });

        plan.push(match &target.proxy_template {
            Some(template) => PlannedStage {
                stage: StageName::ActivateProxyConfig,
                action: format!(
                    "render {} to {}",
                    template.display(),
                    self.proxy.config_path(&target.name).display()
                ),
                commands: self
                    .proxy
                    .activation_commands()
                    .iter()
                    .map(argv)
                    .collect(),
            },
            None => PlannedStage {
                stage: StageName::ActivateProxyConfig,
                action: "skip (no proxy template)".to_string(),
                commands: Vec::new(),
            },
        });

        plan.push(match &target.service {
            Some(service) => PlannedStage {
                stage: StageName::RestartService,
                action: format!(
                    "restart {} via {} (timeout {}s)",
                    service.name,
                    self.supervisor.name(),
                    target.restart_timeout.as_secs()
                ),
                commands: self
                    .supervisor
                    .restart_commands(service, &target.environment)
                    .iter()
                    .map(argv)
                    .collect(),
            },
            None => PlannedStage {
                stage: StageName::RestartService,
                action: "skip (no service)".to_string(),
                commands: Vec::new(),
            },
        });

        plan.push(PlannedStage {
            stage: StageName::HealthCheck,
            action: format!(
                "{} up to {} time(s), {}s apart",
                target.health.probe,
                target.health.retries,
                target.health.interval.as_secs_f64()
            ),
            commands: Vec::new(),
        });

        plan
    }

    /// Restore a backup (the newest unless `backup` names one) under the target lock.
    pub async fn rollback(
        &self,
        target: &DeploymentTarget,
        backup: Option<&Path>,
        options: RunOptions,
        diagnostics: &mut Diagnostics,
    ) -> Result<ManualRollback, DeployError> {
        self.check_not_root()?;

        let lock = if options.wait_for_lock {
            DeployLock::acquire(&self.state_dir, &target.name, &target.deploy_path).await?
        } else {
            DeployLock::try_acquire(&self.state_dir, &target.name, &target.deploy_path)?
        };

        let result = async {
            if let SwapRecovery::RestoredPrevious = recover_interrupted_swap(&target.deploy_path)
                .map_err(|e| DeployError::Precondition(e.to_string()))?
            {
                diagnostics.warn(Warning::swap_recovery(format!(
                    "restored {} from an interrupted placement",
                    target.deploy_path.display()
                )));
            }

            let handle = match backup {
                Some(path) => BackupHandle::from_location(&target.name, path)
                    .map_err(|e| DeployError::Precondition(e.to_string()))?,
                None => BackupHandle::latest(&self.backup_root, &target.name)
                    .map_err(|e| DeployError::Precondition(e.to_string()))?
                    .ok_or_else(|| {
                        DeployError::Precondition(format!(
                            "no backups for {} under {}",
                            target.name,
                            self.backup_root.display()
                        ))
                    })?,
            };

            manual_rollback(target, &handle, &self.backup_root, self.supervisor.as_ref()).await
        }
        .await;

        if let Err(e) = lock.release() {
            diagnostics.warn(Warning::lock_release(e.to_string()));
        }
        result
    }
}

fn failed<S>(d: Deployment<S>, e: DeployError) -> (PipelineRun, Option<DeployError>) {
    let (run, error) = d.fail(e);
    (run, Some(error))
}

async fn rolled_back<S: Mutating>(
    d: Deployment<S>,
    e: DeployError,
    proxy: &dyn Proxy,
    supervisor: &dyn Supervisor,
) -> (PipelineRun, Option<DeployError>) {
    let (run, error) = d.rollback(e, proxy, supervisor).await;
    (run, Some(error))
}

fn hook_context(target: &DeploymentTarget, backup: Option<PathBuf>) -> HookContext {
    HookContext {
        target: target.name.clone(),
        environment: target.environment.clone(),
        deploy_path: target.deploy_path.clone(),
        backup,
    }
}

fn check_source_readable(target: &DeploymentTarget) -> Result<(), DeployError> {
    std::fs::read_dir(&target.source_path)
        .map(|_| ())
        .map_err(|e| {
            DeployError::Precondition(format!(
                "source {} is not readable: {e}",
                target.source_path.display()
            ))
        })
}

/// Effective uid of this process, from `/proc/self/status`.
pub fn current_effective_uid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_effective_uid(&status)
}

fn parse_effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}
