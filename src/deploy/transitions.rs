// ABOUTME: Stage transition methods for the deployment pipeline.
// ABOUTME: Each method records its StageResult, consumes self, and returns the next state.

use chrono::Utc;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::health;
use crate::proxy::{self, Proxy};
use crate::supervisor::{self, Supervisor};
use crate::types::Argv;

use super::Deployment;
use super::backup::BackupHandle;
use super::error::DeployError;
use super::fs::{is_non_empty_dir, replace_dir_atomically};
use super::run::{PipelineRun, RollbackRecord, RunStatus, StageName, StageOutcome, StageTimer};
use super::state::{
    BackedUp, Built, DependenciesInstalled, Initialized, Mutating, Placed, ProxyActivated,
    ServiceRestarted, Verified,
};

/// Result type for transitions that may need rollback on failure.
pub type TransitionResult<T, S> = Result<Deployment<T>, (Deployment<S>, DeployError)>;

// =============================================================================
// Internal Helpers
// =============================================================================

impl<S> Deployment<S> {
    fn transition<T>(self) -> Deployment<T> {
        Deployment {
            target: self.target,
            run: self.run,
            changes: self.changes,
            _state: PhantomData,
        }
    }

    fn begin(&self, stage: StageName) -> StageTimer {
        self.run.begin_stage(stage)
    }

    fn advance<T>(
        mut self,
        timer: StageTimer,
        outcome: StageOutcome,
        message: impl Into<String>,
        attempt: Option<u32>,
    ) -> Deployment<T> {
        self.run.complete_stage(timer, outcome, message, attempt);
        self.transition()
    }

    fn stage_failed<T>(
        mut self,
        timer: StageTimer,
        error: DeployError,
        attempt: Option<u32>,
    ) -> TransitionResult<T, S> {
        self.run
            .complete_stage(timer, StageOutcome::Failed, error.to_string(), attempt);
        Err((self, error))
    }

    fn command(&self, argv: &Argv) -> CommandSpec {
        CommandSpec::new(argv.clone(), self.target.build_timeout)
            .cwd(&self.target.source_path)
            .envs(&self.target.env)
    }

    /// Run one install/build variant, logging its command, exit code, and output.
    async fn run_variant(
        &self,
        runner: &dyn CommandRunner,
        stage: StageName,
        attempt: u32,
        argv: &Argv,
    ) -> Result<CommandOutput, String> {
        match runner.run(&self.command(argv)).await {
            Ok(output) => {
                if output.success() {
                    tracing::info!(
                        target_name = %self.target.name,
                        stage = %stage,
                        attempt,
                        command = %argv,
                        exit_code = ?output.exit_code,
                        "variant finished"
                    );
                } else {
                    tracing::warn!(
                        target_name = %self.target.name,
                        stage = %stage,
                        attempt,
                        command = %argv,
                        exit_code = ?output.exit_code,
                        output = %output.excerpt(),
                        "variant failed"
                    );
                }
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(
                    target_name = %self.target.name,
                    stage = %stage,
                    attempt,
                    command = %argv,
                    error = %e,
                    "variant could not run"
                );
                Err(e.to_string())
            }
        }
    }

    /// End the run as Failed. Nothing is restored.
    pub fn fail(mut self, error: DeployError) -> (PipelineRun, DeployError) {
        self.run.finish(RunStatus::Failed, Some(error.to_string()));
        (self.run, error)
    }
}

// =============================================================================
// Initialized -> BackedUp
// =============================================================================

impl Deployment<Initialized> {
    /// Snapshot the current deployment under `backup_root`.
    ///
    /// Skipped when `skip` is set or nothing is deployed yet.
    pub async fn backup(
        mut self,
        backup_root: &Path,
        skip: bool,
    ) -> TransitionResult<BackedUp, Initialized> {
        let timer = self.begin(StageName::Backup);

        if skip {
            return Ok(self.advance(timer, StageOutcome::Skipped, "backup skipped on request", None));
        }
        if !self.target.deploy_path.exists() {
            let message = format!("nothing deployed at {}", self.target.deploy_path.display());
            return Ok(self.advance(timer, StageOutcome::Skipped, message, None));
        }

        let root = backup_root.to_path_buf();
        let name = self.target.name.clone();
        let deploy_path = self.target.deploy_path.clone();
        let created =
            tokio::task::spawn_blocking(move || BackupHandle::create(&root, &name, &deploy_path))
                .await
                .map_err(|e| io::Error::other(e.to_string()))
                .and_then(|r| r);

        match created {
            Ok(Some(handle)) => {
                let message = format!("saved to {}", handle.location.display());
                self.run.backup = Some(handle);
                Ok(self.advance(timer, StageOutcome::Success, message, None))
            }
            Ok(None) => Ok(self.advance(timer, StageOutcome::Skipped, "nothing deployed", None)),
            Err(e) => self.stage_failed(timer, DeployError::Backup(e.to_string()), None),
        }
    }
}

// =============================================================================
// BackedUp -> DependenciesInstalled
// =============================================================================

impl Deployment<BackedUp> {
    /// Try each install variant until one exits zero.
    pub async fn install_dependencies(
        self,
        runner: &dyn CommandRunner,
    ) -> TransitionResult<DependenciesInstalled, BackedUp> {
        let timer = self.begin(StageName::InstallDependencies);

        if self.target.install.is_empty() {
            return Ok(self.advance(timer, StageOutcome::Skipped, "no install commands", None));
        }

        let variants = self.target.install.clone();
        let mut failures = Vec::new();
        for (i, argv) in variants.iter().enumerate() {
            let attempt = i as u32 + 1;
            match self
                .run_variant(runner, StageName::InstallDependencies, attempt, argv)
                .await
            {
                Ok(output) if output.success() => {
                    let message = format!("`{argv}` succeeded");
                    return Ok(self.advance(timer, StageOutcome::Success, message, Some(attempt)));
                }
                Ok(output) => failures.push(format!(
                    "[{attempt}] `{argv}`: {}\n{}",
                    output.status_text(),
                    output.excerpt()
                )),
                Err(e) => failures.push(format!("[{attempt}] `{argv}`: {e}")),
            }
        }

        let error = DeployError::Build(format!(
            "every install variant failed\n{}",
            failures.join("\n")
        ));
        self.stage_failed(timer, error, Some(variants.len() as u32))
    }
}

// =============================================================================
// DependenciesInstalled -> Built
// =============================================================================

impl Deployment<DependenciesInstalled> {
    /// Try each build variant until one exits zero AND leaves a non-empty
    /// artifact directory. The artifact directory is cleared before each try
    /// so stale output never counts.
    pub async fn build(self, runner: &dyn CommandRunner) -> TransitionResult<Built, DependenciesInstalled> {
        let timer = self.begin(StageName::Build);
        let artifact_dir = self.target.artifact_dir.clone();

        if self.target.build.is_empty() {
            if is_non_empty_dir(&artifact_dir) {
                let message = format!("no build commands; using {}", artifact_dir.display());
                return Ok(self.advance(timer, StageOutcome::Skipped, message, None));
            }
            let error = DeployError::Build(format!(
                "no build commands and {} is empty or missing",
                artifact_dir.display()
            ));
            return self.stage_failed(timer, error, None);
        }

        let variants = self.target.build.clone();
        let mut failures = Vec::new();
        for (i, argv) in variants.iter().enumerate() {
            let attempt = i as u32 + 1;

            if let Err(e) = clear_dir(&artifact_dir).await {
                failures.push(format!(
                    "[{attempt}] could not clear {}: {e}",
                    artifact_dir.display()
                ));
                continue;
            }

            match self.run_variant(runner, StageName::Build, attempt, argv).await {
                Ok(output) if output.success() && is_non_empty_dir(&artifact_dir) => {
                    let message = format!("`{argv}` produced {}", artifact_dir.display());
                    return Ok(self.advance(timer, StageOutcome::Success, message, Some(attempt)));
                }
                Ok(output) if output.success() => {
                    tracing::warn!(
                        target_name = %self.target.name,
                        attempt,
                        artifact_dir = %artifact_dir.display(),
                        "build exited 0 without producing artifacts"
                    );
                    failures.push(format!(
                        "[{attempt}] `{argv}`: exit code 0 but {} is empty or missing",
                        artifact_dir.display()
                    ));
                }
                Ok(output) => failures.push(format!(
                    "[{attempt}] `{argv}`: {}\n{}",
                    output.status_text(),
                    output.excerpt()
                )),
                Err(e) => failures.push(format!("[{attempt}] `{argv}`: {e}")),
            }
        }

        let error = DeployError::Build(format!(
            "every build variant failed\n{}",
            failures.join("\n")
        ));
        self.stage_failed(timer, error, Some(variants.len() as u32))
    }
}

async fn clear_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// =============================================================================
// Built -> Placed
// =============================================================================

impl Deployment<Built> {
    /// Replace the deploy path with the artifacts via a staging sibling and rename.
    pub async fn place_artifacts(mut self) -> TransitionResult<Placed, Built> {
        let timer = self.begin(StageName::PlaceArtifacts);
        self.changes.placed = true;

        let source = self.target.artifact_dir.clone();
        let dest = self.target.deploy_path.clone();
        let placed = tokio::task::spawn_blocking(move || replace_dir_atomically(&source, &dest))
            .await
            .map_err(|e| io::Error::other(e.to_string()))
            .and_then(|r| r);

        match placed {
            Ok(files) => {
                let message = format!(
                    "{files} file(s) placed in {}",
                    self.target.deploy_path.display()
                );
                Ok(self.advance(timer, StageOutcome::Success, message, None))
            }
            Err(e) => {
                let error = DeployError::place(format!(
                    "{} -> {}: {e}",
                    self.target.artifact_dir.display(),
                    self.target.deploy_path.display()
                ));
                self.stage_failed(timer, error, None)
            }
        }
    }
}

// =============================================================================
// Placed -> ProxyActivated
// =============================================================================

impl Deployment<Placed> {
    /// Install the rendered site config, validate, and reload.
    ///
    /// A config the proxy rejects is replaced by the previously active one
    /// before the stage fails, and the proxy is not reloaded.
    pub async fn activate_proxy_config(
        mut self,
        proxy: &dyn Proxy,
    ) -> TransitionResult<ProxyActivated, Placed> {
        let timer = self.begin(StageName::ActivateProxyConfig);

        let Some(template_path) = self.target.proxy_template.clone() else {
            return Ok(self.advance(timer, StageOutcome::Skipped, "no proxy template", None));
        };

        let template = match tokio::fs::read_to_string(&template_path).await {
            Ok(t) => t,
            Err(e) => {
                let error = DeployError::proxy(format!("{}: {e}", template_path.display()));
                return self.stage_failed(timer, error, None);
            }
        };
        let rendered = match proxy::render(&template, &self.target.proxy_variables) {
            Ok(r) => r,
            Err(e) => {
                let error = DeployError::proxy(format!("{}: {e}", template_path.display()));
                return self.stage_failed(timer, error, None);
            }
        };

        let _proxy_lock = match proxy.lock().await {
            Ok(lock) => lock,
            Err(e) => return self.stage_failed(timer, DeployError::proxy(e.to_string()), None),
        };

        let name = self.target.name.clone();
        let previous = match proxy.read_active(&name).await {
            Ok(p) => p,
            Err(e) => return self.stage_failed(timer, DeployError::proxy(e.to_string()), None),
        };

        if previous.as_deref() == Some(rendered.as_bytes()) {
            let message = format!("{} already active", proxy.config_path(&name).display());
            return Ok(self.advance(timer, StageOutcome::Success, message, None));
        }

        if let Err(e) = proxy.write_config(&name, Some(rendered.as_bytes())).await {
            // a failed install may still have replaced the file
            self.changes.proxy_previous = Some(previous);
            return self.stage_failed(timer, DeployError::proxy(e.to_string()), None);
        }

        if let Err(e) = proxy.validate().await {
            let restored = proxy.write_config(&name, previous.as_deref()).await;
            let message = match restored {
                Ok(()) => format!("{e}; previous configuration restored"),
                Err(restore_err) => {
                    self.changes.proxy_previous = Some(previous);
                    format!("{e}; restoring previous configuration failed: {restore_err}")
                }
            };
            return self.stage_failed(timer, DeployError::proxy(message), None);
        }

        self.changes.proxy_previous = Some(previous);

        if let Err(e) = proxy.reload().await {
            return self.stage_failed(timer, DeployError::proxy(e.to_string()), None);
        }

        let message = format!("{} activated", proxy.config_path(&name).display());
        Ok(self.advance(timer, StageOutcome::Success, message, None))
    }
}

// =============================================================================
// ProxyActivated -> ServiceRestarted
// =============================================================================

impl Deployment<ProxyActivated> {
    /// Stop, start with the runtime config, and wait for the supervisor to
    /// report the service running within `restart_timeout`.
    pub async fn restart_service(
        mut self,
        supervisor: &dyn Supervisor,
    ) -> TransitionResult<ServiceRestarted, ProxyActivated> {
        let timer = self.begin(StageName::RestartService);

        let Some(service) = self.target.service.clone() else {
            return Ok(self.advance(timer, StageOutcome::Skipped, "no service", None));
        };

        self.changes.service_touched = true;
        let restarted = async {
            supervisor.stop(&service).await?;
            supervisor.start(&service, &self.target.environment).await?;
            supervisor::wait_until_running(
                supervisor,
                &service,
                self.target.restart_timeout,
                supervisor::POLL_INTERVAL,
            )
            .await
        }
        .await;

        match restarted {
            Ok(_) => {
                let message = format!("{} running under {}", service.name, supervisor.name());
                Ok(self.advance(timer, StageOutcome::Success, message, None))
            }
            Err(e) => self.stage_failed(timer, DeployError::restart(e.to_string()), None),
        }
    }
}

// =============================================================================
// ServiceRestarted -> Verified
// =============================================================================

impl Deployment<ServiceRestarted> {
    /// Probe with fixed retries and fixed backoff.
    pub async fn health_check(self) -> TransitionResult<Verified, ServiceRestarted> {
        let timer = self.begin(StageName::HealthCheck);
        let health = self.target.health.clone();

        match health::check(&health).await {
            Ok(attempt) => {
                let message = format!(
                    "{} healthy on attempt {attempt} of {}",
                    health.probe, health.retries
                );
                Ok(self.advance(timer, StageOutcome::Success, message, Some(attempt)))
            }
            Err(failure) => {
                let attempts = failure.attempts;
                let error = DeployError::HealthCheck(format!("{}: {failure}", health.probe));
                self.stage_failed(timer, error, Some(attempts))
            }
        }
    }
}

// =============================================================================
// Verified -> done
// =============================================================================

impl Deployment<Verified> {
    pub fn finish(mut self) -> PipelineRun {
        self.run.finish(RunStatus::Succeeded, None);
        self.run
    }
}

// =============================================================================
// Rollback
// =============================================================================

impl<S: Mutating> Deployment<S> {
    /// Undo this run's changes from the backup taken at its start.
    ///
    /// Restores the deploy path, the previous proxy config if it was changed,
    /// and restarts the service if it was touched. Each step runs once. On
    /// success the run ends RolledBack and `error` is returned; if a step
    /// fails the run ends Failed and a [`DeployError::Rollback`] naming the
    /// backup is returned instead.
    pub async fn rollback(
        mut self,
        error: DeployError,
        proxy: &dyn Proxy,
        supervisor: &dyn Supervisor,
    ) -> (PipelineRun, DeployError) {
        let Some(backup) = self.run.backup.clone() else {
            tracing::warn!(
                target_name = %self.target.name,
                "no backup taken; leaving the deploy path as it is"
            );
            return self.fail(error);
        };

        tracing::warn!(
            target_name = %self.target.name,
            backup = %backup.location.display(),
            error = %error,
            "rolling back"
        );

        let started_at = Utc::now();
        let mut steps = Vec::new();
        let restored = self.restore(&backup, proxy, supervisor, &mut steps).await;

        self.run.rollback = Some(RollbackRecord {
            started_at,
            ended_at: Utc::now(),
            steps,
            error: restored.as_ref().err().cloned(),
        });

        match restored {
            Ok(()) => {
                tracing::info!(target_name = %self.target.name, "rollback complete");
                self.run
                    .finish(RunStatus::RolledBack, Some(error.to_string()));
                (self.run, error)
            }
            Err(reason) => {
                let rollback_error = DeployError::Rollback {
                    reason,
                    backup: backup.location.clone(),
                };
                tracing::error!(
                    target_name = %self.target.name,
                    error = %rollback_error,
                    "rollback failed"
                );
                self.run.finish(
                    RunStatus::Failed,
                    Some(format!("{error}; {rollback_error}")),
                );
                (self.run, rollback_error)
            }
        }
    }

    async fn restore(
        &self,
        backup: &BackupHandle,
        proxy: &dyn Proxy,
        supervisor: &dyn Supervisor,
        steps: &mut Vec<String>,
    ) -> Result<(), String> {
        let target = &self.target;

        if self.changes.placed {
            let source = backup.location.clone();
            let dest = target.deploy_path.clone();
            tokio::task::spawn_blocking(move || replace_dir_atomically(&source, &dest))
                .await
                .map_err(|e| format!("restore task failed: {e}"))?
                .map_err(|e| format!("restoring {}: {e}", target.deploy_path.display()))?;
            steps.push(format!(
                "restored {} from {}",
                target.deploy_path.display(),
                backup.location.display()
            ));
        }

        if let Some(previous) = &self.changes.proxy_previous {
            let _proxy_lock = proxy
                .lock()
                .await
                .map_err(|e| format!("locking proxy config: {e}"))?;
            proxy
                .write_config(&target.name, previous.as_deref())
                .await
                .map_err(|e| format!("restoring proxy config: {e}"))?;
            proxy
                .validate()
                .await
                .map_err(|e| format!("validating restored proxy config: {e}"))?;
            proxy
                .reload()
                .await
                .map_err(|e| format!("reloading proxy: {e}"))?;
            steps.push("restored previous proxy config".to_string());
        }

        if self.changes.service_touched
            && let Some(service) = &target.service
        {
            supervisor
                .stop(service)
                .await
                .map_err(|e| format!("stopping {}: {e}", service.name))?;
            supervisor
                .start(service, &target.environment)
                .await
                .map_err(|e| format!("starting {}: {e}", service.name))?;
            supervisor::wait_until_running(
                supervisor,
                service,
                target.restart_timeout,
                supervisor::POLL_INTERVAL,
            )
            .await
            .map_err(|e| format!("waiting for {}: {e}", service.name))?;
            steps.push(format!("restarted {}", service.name));
        }

        Ok(())
    }
}
