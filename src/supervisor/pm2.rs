// ABOUTME: PM2 supervisor driven through the pm2 CLI.
// ABOUTME: State comes from `pm2 jlist`; start uses the ecosystem file when one is configured.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{Supervisor, SupervisorError, SupervisorState, run_checked};
use crate::deploy::ServiceSpec;
use crate::exec::{CommandRunner, CommandSpec};
use crate::types::Argv;

#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pm2_env: Pm2Env,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Env {
    #[serde(default)]
    status: String,
}

pub struct Pm2Supervisor {
    runner: Arc<dyn CommandRunner>,
    privileged: bool,
    timeout: Duration,
}

impl Pm2Supervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, privileged: bool, timeout: Duration) -> Self {
        Self {
            runner,
            privileged,
            timeout,
        }
    }

    fn spec(&self, argv: Argv) -> CommandSpec {
        CommandSpec::new(argv, self.timeout).privileged(self.privileged)
    }

    fn stop_spec(&self, service: &ServiceSpec) -> CommandSpec {
        // with an ecosystem file the process is recreated on start, so drop it entirely
        let verb = if service.config.is_some() {
            "delete"
        } else {
            "stop"
        };
        self.spec(Argv::new("pm2").arg(verb).arg(&service.name))
    }

    fn start_spec(&self, service: &ServiceSpec, environment: &str) -> CommandSpec {
        let argv = match &service.config {
            Some(config) => Argv::new("pm2")
                .arg("start")
                .arg(config.display().to_string())
                .args(["--only", service.name.as_str(), "--env", environment]),
            None => Argv::new("pm2").arg("start").arg(&service.name),
        };
        self.spec(argv).cwd(&service.working_dir)
    }
}

/// Map a PM2 process status onto the supervisor contract.
pub(crate) fn map_status(status: &str) -> SupervisorState {
    match status {
        "online" => SupervisorState::Running,
        "launching" | "stopping" => SupervisorState::Starting,
        "stopped" => SupervisorState::Stopped,
        other => SupervisorState::Errored(other.to_string()),
    }
}

/// Find `name` in `pm2 jlist` output. PM2 may print notices before the JSON.
pub(crate) fn parse_jlist(stdout: &str, name: &str) -> Result<SupervisorState, SupervisorError> {
    let start = stdout
        .find('[')
        .ok_or_else(|| SupervisorError::Parse("pm2 jlist printed no JSON array".to_string()))?;
    let processes: Vec<Pm2Process> = serde_json::from_str(stdout[start..].trim_end())
        .map_err(|e| SupervisorError::Parse(format!("pm2 jlist: {e}")))?;

    Ok(processes
        .iter()
        .find(|p| p.name == name)
        .map(|p| map_status(&p.pm2_env.status))
        .unwrap_or(SupervisorState::Absent))
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    fn name(&self) -> &'static str {
        "pm2"
    }

    async fn query(&self, service: &ServiceSpec) -> Result<SupervisorState, SupervisorError> {
        let spec = self.spec(Argv::new("pm2").arg("jlist"));
        let output = run_checked(self.runner.as_ref(), &spec).await?;
        parse_jlist(&output.stdout, &service.name)
    }

    async fn stop(&self, service: &ServiceSpec) -> Result<(), SupervisorError> {
        if self.query(service).await? == SupervisorState::Absent {
            tracing::debug!(service = %service.name, "pm2 process absent, nothing to stop");
            return Ok(());
        }
        run_checked(self.runner.as_ref(), &self.stop_spec(service)).await?;
        Ok(())
    }

    async fn start(
        &self,
        service: &ServiceSpec,
        environment: &str,
    ) -> Result<(), SupervisorError> {
        run_checked(self.runner.as_ref(), &self.start_spec(service, environment)).await?;
        Ok(())
    }

    fn restart_commands(&self, service: &ServiceSpec, environment: &str) -> Vec<CommandSpec> {
        vec![
            self.stop_spec(service),
            self.start_spec(service, environment),
        ]
    }
}
