// ABOUTME: Process supervisor abstraction: query, stop, start with runtime config.
// ABOUTME: PM2 and systemd implementations drive their CLIs through a CommandRunner.

mod pm2;
mod systemd;

pub use pm2::Pm2Supervisor;
pub use systemd::SystemdSupervisor;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{SupervisorConfig, SupervisorKind};
use crate::deploy::ServiceSpec;
use crate::exec::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// Interval between state queries while waiting for a service to come up.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the supervisor reports for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    /// Transitional; keep waiting.
    Starting,
    Stopped,
    /// The supervisor does not know the service.
    Absent,
    /// Any other reported state. Fatal for a restart.
    Errored(String),
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Running => f.write_str("running"),
            SupervisorState::Starting => f.write_str("starting"),
            SupervisorState::Stopped => f.write_str("stopped"),
            SupervisorState::Absent => f.write_str("absent"),
            SupervisorState::Errored(status) => write!(f, "errored ({status})"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("`{command}` failed with {status}: {excerpt}")]
    Failed {
        command: String,
        status: String,
        excerpt: String,
    },

    #[error("unexpected supervisor output: {0}")]
    Parse(String),

    #[error("service {service} reported {state}")]
    Errored { service: String, state: String },

    #[error("service {service} not running after {}s (last state: {state})", timeout.as_secs())]
    Timeout {
        service: String,
        state: String,
        timeout: Duration,
    },
}

impl SupervisorError {
    pub(crate) fn from_output(command: &CommandSpec, output: &CommandOutput) -> Self {
        SupervisorError::Failed {
            command: command.argv.to_string(),
            status: output.status_text(),
            excerpt: output.excerpt(),
        }
    }
}

/// Contract with the process supervisor. Restarts are stop then start; the
/// proxy and the supervisor are never asked for anything else.
#[async_trait]
pub trait Supervisor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, service: &ServiceSpec) -> Result<SupervisorState, SupervisorError>;

    /// Stop the service. Stopping an absent or stopped service succeeds.
    async fn stop(&self, service: &ServiceSpec) -> Result<(), SupervisorError>;

    /// Start the service with its runtime config for `environment`.
    async fn start(&self, service: &ServiceSpec, environment: &str)
    -> Result<(), SupervisorError>;

    /// Commands a restart would run, for dry runs.
    fn restart_commands(&self, service: &ServiceSpec, environment: &str) -> Vec<CommandSpec>;
}

/// Build the configured supervisor.
pub fn from_config(config: &SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Arc<dyn Supervisor> {
    let privileged = config.is_privileged();
    let timeout = config.command_timeout();
    match config.kind {
        SupervisorKind::Pm2 => Arc::new(Pm2Supervisor::new(runner, privileged, timeout)),
        SupervisorKind::Systemd => Arc::new(SystemdSupervisor::new(runner, privileged, timeout)),
    }
}

/// Poll until the service reports running.
///
/// Transitional, stopped, and absent states are waited out; an errored state
/// fails immediately.
pub async fn wait_until_running(
    supervisor: &dyn Supervisor,
    service: &ServiceSpec,
    timeout: Duration,
    poll: Duration,
) -> Result<u32, SupervisorError> {
    let deadline = Instant::now() + timeout;
    let mut polls = 0;

    loop {
        polls += 1;
        let state = supervisor.query(service).await?;
        tracing::debug!(service = %service.name, state = %state, poll = polls, "supervisor state");

        match state {
            SupervisorState::Running => return Ok(polls),
            SupervisorState::Errored(status) => {
                return Err(SupervisorError::Errored {
                    service: service.name.clone(),
                    state: status,
                });
            }
            other => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(SupervisorError::Timeout {
                        service: service.name.clone(),
                        state: other.to_string(),
                        timeout,
                    });
                }
                tokio::time::sleep(poll.min(deadline - now)).await;
            }
        }
    }
}

/// Run a supervisor command and treat non-zero exit as failure.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, SupervisorError> {
    let output = runner.run(spec).await?;
    if !output.success() {
        return Err(SupervisorError::from_output(spec, &output));
    }
    Ok(output)
}
