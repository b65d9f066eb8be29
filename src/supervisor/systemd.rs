// ABOUTME: systemd supervisor driven through systemctl.
// ABOUTME: The unit file owns the runtime config; start and stop are plain systemctl verbs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Supervisor, SupervisorError, SupervisorState, run_checked};
use crate::deploy::ServiceSpec;
use crate::exec::{CommandRunner, CommandSpec};
use crate::types::Argv;

pub struct SystemdSupervisor {
    runner: Arc<dyn CommandRunner>,
    privileged: bool,
    timeout: Duration,
}

impl SystemdSupervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, privileged: bool, timeout: Duration) -> Self {
        Self {
            runner,
            privileged,
            timeout,
        }
    }

    fn systemctl(&self, verb: &str, unit: &str) -> CommandSpec {
        CommandSpec::new(Argv::new("systemctl").args([verb, unit]), self.timeout)
            .privileged(self.privileged)
    }
}

/// Map `systemctl is-active` output onto the supervisor contract.
pub(crate) fn map_active_state(state: &str) -> SupervisorState {
    match state.trim() {
        "active" => SupervisorState::Running,
        "activating" | "reloading" | "deactivating" | "refreshing" => SupervisorState::Starting,
        "inactive" => SupervisorState::Stopped,
        "unknown" | "" => SupervisorState::Absent,
        other => SupervisorState::Errored(other.to_string()),
    }
}

#[async_trait]
impl Supervisor for SystemdSupervisor {
    fn name(&self) -> &'static str {
        "systemd"
    }

    async fn query(&self, service: &ServiceSpec) -> Result<SupervisorState, SupervisorError> {
        // is-active exits non-zero for anything but "active"; the state is on stdout
        let spec = CommandSpec::new(
            Argv::new("systemctl").args(["is-active", service.name.as_str()]),
            self.timeout,
        );
        let output = self.runner.run(&spec).await?;
        Ok(map_active_state(&output.stdout))
    }

    async fn stop(&self, service: &ServiceSpec) -> Result<(), SupervisorError> {
        run_checked(
            self.runner.as_ref(),
            &self.systemctl("stop", &service.name),
        )
        .await?;
        Ok(())
    }

    async fn start(
        &self,
        service: &ServiceSpec,
        _environment: &str,
    ) -> Result<(), SupervisorError> {
        if let Some(config) = &service.config {
            tracing::debug!(
                service = %service.name,
                config = %config.display(),
                "systemd reads runtime config from the unit; ignoring service config"
            );
        }
        run_checked(
            self.runner.as_ref(),
            &self.systemctl("start", &service.name),
        )
        .await?;
        Ok(())
    }

    fn restart_commands(&self, service: &ServiceSpec, _environment: &str) -> Vec<CommandSpec> {
        vec![
            self.systemctl("stop", &service.name),
            self.systemctl("start", &service.name),
        ]
    }
}
