// ABOUTME: Application-wide error types for rollout.
// ABOUTME: Uses thiserror and maps every error onto the CLI exit-code contract.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::{DeployError, DeployErrorKind};

/// Exit code for a run that ended `Failed` (or never started).
pub const EXIT_FAILED: i32 = 1;
/// Exit code for a run that failed and was rolled back.
pub const EXIT_ROLLED_BACK: i32 = 2;
/// Exit code when restoring the backup itself failed.
pub const EXIT_ROLLBACK_FAILED: i32 = 3;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Deploy(e) if e.kind() == DeployErrorKind::Rollback => EXIT_ROLLBACK_FAILED,
            _ => EXIT_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
