// ABOUTME: External command execution with timeouts and captured output.
// ABOUTME: Privileged commands go through a single configured escalation prefix.

mod error;

pub use error::{CommandError, CommandErrorKind};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use snafu::ResultExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::types::Argv;
use error::{SpawnSnafu, TimeoutSnafu, WaitSnafu};

/// Default byte limit for output excerpts in stage messages.
pub const EXCERPT_LIMIT: usize = 2048;

/// A single command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Argv,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Run through the escalation prefix (e.g. `sudo -n`).
    pub privileged: bool,
}

impl CommandSpec {
    pub fn new(argv: Argv, timeout: Duration) -> Self {
        Self {
            argv,
            cwd: None,
            env: HashMap::new(),
            timeout,
            privileged: false,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }
}

/// Output from a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, or None when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Truncated stderr, falling back to stdout when stderr is empty.
    pub fn excerpt(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        excerpt(text.trim_end(), EXCERPT_LIMIT)
    }

    /// Human-readable exit status for log lines.
    pub fn status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external commands.
///
/// The orchestrator only talks to the outside world through this trait, which
/// keeps privileged operations auditable and lets tests substitute fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// The argv that would actually be executed for `spec`.
    fn effective_argv(&self, spec: &CommandSpec) -> Argv {
        spec.argv.clone()
    }
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    escalate: Option<Argv>,
}

impl SystemRunner {
    pub fn new(escalate: Option<Argv>) -> Self {
        Self { escalate }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let argv = self.effective_argv(spec);
        let command = argv.to_string();

        if spec.privileged {
            tracing::info!(command = %command, "running privileged command");
        } else {
            tracing::debug!(command = %command, "running command");
        }

        let mut cmd = Command::new(argv.program());
        cmd.args(argv.rest())
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().context(SpawnSnafu {
            command: command.clone(),
        })?;

        let pgid = child.id();
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(waited) => waited.context(WaitSnafu {
                command: command.clone(),
            })?,
            Err(_) => {
                // kill_on_drop only reaches the direct child; background jobs
                // it started share its process group
                if let Some(pgid) = pgid {
                    kill_process_group(pgid, &command);
                }
                return TimeoutSnafu {
                    command,
                    timeout: spec.timeout,
                }
                .fail();
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(
            command = %command,
            exit_code = ?result.exit_code,
            "command finished"
        );

        Ok(result)
    }

    fn effective_argv(&self, spec: &CommandSpec) -> Argv {
        match (&self.escalate, spec.privileged) {
            (Some(prefix), true) => spec.argv.prefixed(prefix),
            _ => spec.argv.clone(),
        }
    }
}

fn kill_process_group(pgid: u32, command: &str) {
    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(command = %command, pgid, "killed timed out process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(
            command = %command,
            pgid,
            error = %e,
            "could not kill timed out process group"
        ),
    }
}

/// Keep the tail of `text` within `limit` bytes; build tools print the
/// interesting part last.
pub fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }

    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[… {} bytes truncated]\n{}", start, &text[start..])
}
