// ABOUTME: Command execution error types with SNAFU pattern.
// ABOUTME: Separates spawn failures, timeouts, and output collection failures.

use snafu::Snafu;
use std::time::Duration;

/// Failure to run an external command to completion.
///
/// A command that runs and exits non-zero is not an error at this layer; the
/// caller inspects [`super::CommandOutput`] for that.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("failed to spawn `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` timed out after {}s", timeout.as_secs()))]
    Timeout { command: String, timeout: Duration },

    #[snafu(display("failed to collect output of `{command}`: {source}"))]
    Wait {
        command: String,
        source: std::io::Error,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The program could not be started (missing binary, permissions).
    Spawn,
    /// The program exceeded its timeout and was killed.
    Timeout,
    /// The program started but its output could not be read.
    Wait,
}

impl CommandError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> CommandErrorKind {
        match self {
            CommandError::Spawn { .. } => CommandErrorKind::Spawn,
            CommandError::Timeout { .. } => CommandErrorKind::Timeout,
            CommandError::Wait { .. } => CommandErrorKind::Wait,
        }
    }
}
