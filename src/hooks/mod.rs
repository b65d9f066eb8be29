// ABOUTME: Hooks system for deployment lifecycle events.
// ABOUTME: Discovers and executes scripts at pre-deploy, post-deploy, and on-error points.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::exec::{CommandRunner, CommandSpec};
use crate::types::{Argv, TargetName};

/// Timeout for a single hook script.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(300);

/// Hook execution points in the deployment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Before deployment starts. Failure aborts deployment.
    PreDeploy,
    /// After successful deployment. Failure logs warning.
    PostDeploy,
    /// On deployment failure. Failure logs warning.
    OnError,
}

impl HookPoint {
    /// Get the hook filename for this point.
    pub fn filename(&self) -> &'static str {
        match self {
            HookPoint::PreDeploy => "pre-deploy",
            HookPoint::PostDeploy => "post-deploy",
            HookPoint::OnError => "on-error",
        }
    }
}

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub target: TargetName,
    pub environment: String,
    pub deploy_path: PathBuf,
    pub backup: Option<PathBuf>,
}

impl HookContext {
    /// Convert context to environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("ROLLOUT_TARGET".to_string(), self.target.to_string());
        env.insert("ROLLOUT_ENVIRONMENT".to_string(), self.environment.clone());
        env.insert(
            "ROLLOUT_DEPLOY_PATH".to_string(),
            self.deploy_path.display().to_string(),
        );
        if let Some(ref backup) = self.backup {
            env.insert("ROLLOUT_BACKUP".to_string(), backup.display().to_string());
        }
        env
    }
}

/// Result of running a hook.
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Discovers and runs hooks from a hooks directory.
pub struct HookRunner {
    hooks_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl HookRunner {
    pub fn new(hooks_dir: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            hooks_dir: hooks_dir.to_path_buf(),
            runner,
        }
    }

    /// Check if a hook exists for the given point.
    pub fn hook_exists(&self, point: HookPoint) -> bool {
        self.hook_path(point).is_file()
    }

    fn hook_path(&self, point: HookPoint) -> PathBuf {
        self.hooks_dir.join(point.filename())
    }

    /// Run the hook for `point`, or return `None` when there is none.
    ///
    /// A hook that cannot be started is reported as a failed result rather
    /// than an error; callers decide how much a failure matters.
    pub async fn run(&self, point: HookPoint, context: &HookContext) -> Option<HookResult> {
        let hook_path = self.hook_path(point);
        if !hook_path.is_file() {
            return None;
        }

        tracing::info!(
            hook = point.filename(),
            target_name = %context.target,
            path = %hook_path.display(),
            "running hook"
        );

        let spec = CommandSpec::new(Argv::new(hook_path.display().to_string()), HOOK_TIMEOUT)
            .cwd(&self.hooks_dir)
            .envs(&context.to_env());

        let result = match self.runner.run(&spec).await {
            Ok(output) => HookResult {
                success: output.success(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(e) => HookResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };

        if result.success {
            tracing::info!(hook = point.filename(), "hook finished");
        } else {
            tracing::warn!(
                hook = point.filename(),
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "hook failed"
            );
        }

        Some(result)
    }
}
