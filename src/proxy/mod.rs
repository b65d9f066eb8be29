// ABOUTME: Reverse proxy contract: write config, validate, reload. Never restart.
// ABOUTME: NginxProxy installs one rendered site config per target.

mod nginx;
mod template;

pub use nginx::NginxProxy;
pub use template::{TemplateError, render};

use async_trait::async_trait;
use std::fs::File;
use std::path::PathBuf;
use tokio::sync::OwnedMutexGuard;

use crate::exec::{CommandError, CommandSpec};
use crate::types::TargetName;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("proxy rejected configuration: {0}")]
    Invalid(String),

    #[error("`{command}` failed with {status}: {excerpt}")]
    Failed {
        command: String,
        status: String,
        excerpt: String,
    },
}

/// A held proxy lock: an in-process guard plus an fs2 lock on a file under
/// the state directory, so separate processes serialize too. Released on drop.
#[derive(Debug)]
pub struct ProxyLock {
    _file: File,
    _guard: OwnedMutexGuard<()>,
}

impl ProxyLock {
    pub(crate) fn new(file: File, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            _file: file,
            _guard: guard,
        }
    }
}

/// Every target's site config lives in one directory and validation checks
/// the whole of it, so activations take [`Proxy::lock`] for the full
/// write, validate, reload sequence.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// Exclusive hold on the shared configuration until the guard drops.
    async fn lock(&self) -> Result<ProxyLock, ProxyError>;

    /// Where the active config for `target` lives.
    fn config_path(&self, target: &TargetName) -> PathBuf;

    /// The currently active config, or `None` if the target has none.
    async fn read_active(&self, target: &TargetName) -> Result<Option<Vec<u8>>, ProxyError>;

    /// Install `contents` as the active config, or remove it when `None`.
    async fn write_config(
        &self,
        target: &TargetName,
        contents: Option<&[u8]>,
    ) -> Result<(), ProxyError>;

    /// Check the full proxy configuration. Fails with [`ProxyError::Invalid`].
    async fn validate(&self) -> Result<(), ProxyError>;

    /// Graceful reload of the running proxy.
    async fn reload(&self) -> Result<(), ProxyError>;

    /// Commands an activation would run, for dry runs.
    fn activation_commands(&self) -> Vec<CommandSpec>;
}
