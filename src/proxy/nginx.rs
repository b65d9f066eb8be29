// ABOUTME: nginx implementation of the proxy contract.
// ABOUTME: Privileged installs go through `install`/`rm` under the escalation prefix.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Proxy, ProxyError, ProxyLock};
use crate::config::ProxyConfig;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::types::{Argv, TargetName};

pub struct NginxProxy {
    runner: Arc<dyn CommandRunner>,
    config_dir: PathBuf,
    validate: Argv,
    reload: Argv,
    privileged: bool,
    timeout: Duration,
    /// Unprivileged scratch space for files handed to `install`.
    scratch_dir: PathBuf,
    lock_path: PathBuf,
    activation: Arc<Mutex<()>>,
}

impl NginxProxy {
    /// Scratch files and the proxy lock live under `state_dir`.
    pub fn new(config: &ProxyConfig, runner: Arc<dyn CommandRunner>, state_dir: &Path) -> Self {
        Self {
            runner,
            config_dir: config.config_dir.clone(),
            validate: config.validate.clone(),
            reload: config.reload.clone(),
            privileged: config.privileged,
            timeout: config.timeout,
            scratch_dir: state_dir.join("tmp"),
            lock_path: state_dir.join("locks").join("proxy.lock"),
            activation: Arc::new(Mutex::new(())),
        }
    }

    fn spec(&self, argv: Argv) -> CommandSpec {
        CommandSpec::new(argv, self.timeout).privileged(self.privileged)
    }

    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, ProxyError> {
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(ProxyError::Failed {
                command: spec.argv.to_string(),
                status: output.status_text(),
                excerpt: output.excerpt(),
            });
        }
        Ok(output)
    }

    async fn install_privileged(&self, dest: &Path, contents: &[u8]) -> Result<(), ProxyError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| io_error(&self.scratch_dir, e))?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "site.conf".to_string());
        let scratch = self
            .scratch_dir
            .join(format!("{file_name}.{}", std::process::id()));
        tokio::fs::write(&scratch, contents)
            .await
            .map_err(|e| io_error(&scratch, e))?;

        let argv = Argv::new("install").args([
            "-m".to_string(),
            "0644".to_string(),
            scratch.display().to_string(),
            dest.display().to_string(),
        ]);
        let result = self.run_checked(&self.spec(argv)).await;
        let _ = tokio::fs::remove_file(&scratch).await;
        result.map(|_| ())
    }

    async fn install_direct(&self, dest: &Path, contents: &[u8]) -> Result<(), ProxyError> {
        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| io_error(&self.config_dir, e))?;
        let tmp = PathBuf::from(format!("{}.rollout-tmp", dest.display()));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| io_error(dest, e))
    }
}

#[async_trait]
impl Proxy for NginxProxy {
    async fn lock(&self) -> Result<ProxyLock, ProxyError> {
        let guard = self.activation.clone().lock_owned().await;
        let path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(|e| io_error(&self.lock_path, io::Error::other(e)))?
            .map_err(|e| io_error(&self.lock_path, e))?;
        tracing::debug!(path = %self.lock_path.display(), "proxy lock acquired");
        Ok(ProxyLock::new(file, guard))
    }

    fn config_path(&self, target: &TargetName) -> PathBuf {
        self.config_dir.join(format!("{target}.conf"))
    }

    async fn read_active(&self, target: &TargetName) -> Result<Option<Vec<u8>>, ProxyError> {
        let path = self.config_path(target);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn write_config(
        &self,
        target: &TargetName,
        contents: Option<&[u8]>,
    ) -> Result<(), ProxyError> {
        let dest = self.config_path(target);
        tracing::debug!(
            path = %dest.display(),
            remove = contents.is_none(),
            "writing proxy config"
        );

        match (contents, self.privileged) {
            (Some(bytes), true) => self.install_privileged(&dest, bytes).await,
            (Some(bytes), false) => self.install_direct(&dest, bytes).await,
            (None, true) => {
                let argv = Argv::new("rm").args(["-f".to_string(), dest.display().to_string()]);
                self.run_checked(&self.spec(argv)).await.map(|_| ())
            }
            (None, false) => match tokio::fs::remove_file(&dest).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(&dest, e)),
            },
        }
    }

    async fn validate(&self) -> Result<(), ProxyError> {
        let spec = self.spec(self.validate.clone());
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ProxyError::Invalid(output.excerpt()));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProxyError> {
        self.run_checked(&self.spec(self.reload.clone())).await?;
        Ok(())
    }

    fn activation_commands(&self) -> Vec<CommandSpec> {
        vec![
            self.spec(self.validate.clone()),
            self.spec(self.reload.clone()),
        ]
    }
}

fn lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

fn io_error(path: &Path, source: io::Error) -> ProxyError {
    ProxyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SystemRunner;

    fn proxy(dir: &Path, validate: &str) -> NginxProxy {
        let config = ProxyConfig {
            config_dir: dir.join("conf.d"),
            validate: Argv::new("sh").args(["-c", validate]),
            reload: Argv::new("true"),
            privileged: false,
            timeout: Duration::from_secs(5),
            variables: Default::default(),
        };
        NginxProxy::new(&config, Arc::new(SystemRunner::new(None)), &dir.join("state"))
    }

    #[tokio::test]
    async fn write_read_and_remove_config() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path(), "true");
        let target = TargetName::new("web").unwrap();

        assert_eq!(proxy.read_active(&target).await.unwrap(), None);
        proxy
            .write_config(&target, Some(&b"server {}"[..]))
            .await
            .unwrap();
        assert_eq!(
            proxy.read_active(&target).await.unwrap().as_deref(),
            Some(&b"server {}"[..])
        );
        assert_eq!(
            proxy.config_path(&target),
            dir.path().join("conf.d/web.conf")
        );

        proxy.write_config(&target, None).await.unwrap();
        assert_eq!(proxy.read_active(&target).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_validation_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path(), "echo 'unexpected }' >&2; exit 1");
        let err = proxy.validate().await.unwrap_err();
        match err {
            ProxyError::Invalid(msg) => assert!(msg.contains("unexpected }")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = Arc::new(proxy(dir.path(), "true"));

        let held = proxy.lock().await.unwrap();
        assert!(dir.path().join("state/locks/proxy.lock").exists());

        let waiter = {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.lock().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
