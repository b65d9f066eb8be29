// ABOUTME: Deploy lock serializing runs against the same deploy path.
// ABOUTME: fs2 advisory lock on <state_dir>/locks/<slug>.lock with holder info inside.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::TargetName;

use super::DeployError;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Target being deployed.
    pub target: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(target: &TargetName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.to_string(),
        }
    }

    /// Path to the lock file guarding `deploy_path`.
    ///
    /// Keyed on the deploy path rather than the target name, so two targets
    /// that share a directory still serialize. Separators become `_` and any
    /// other non-alphanumeric byte becomes `-xx`, so distinct paths never
    /// share a lock.
    pub fn lock_path(state_dir: &Path, deploy_path: &Path) -> PathBuf {
        let path = deploy_path.to_string_lossy();
        let mut slug = String::with_capacity(path.len());
        for byte in path.trim_matches('/').bytes() {
            match byte {
                b'/' => slug.push('_'),
                b if b.is_ascii_alphanumeric() => slug.push(char::from(b)),
                b => slug.push_str(&format!("-{b:02x}")),
            }
        }
        state_dir.join("locks").join(format!("{slug}.lock"))
    }

    /// Read the holder recorded in a lock file, if any.
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn into_error(self) -> DeployError {
        DeployError::lock_held(self.holder, self.pid, self.started_at, self.target)
    }
}

/// A held deploy lock. Released by [`DeployLock::release`], or when the
/// file handle is dropped (including when the process dies).
pub struct DeployLock {
    file: File,
    path: PathBuf,
    target: TargetName,
}

impl std::fmt::Debug for DeployLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock")
            .field("target", &self.target)
            .field("path", &self.path)
            .finish()
    }
}

impl DeployLock {
    /// Acquire the lock for `deploy_path`, waiting for any current holder.
    pub async fn acquire(
        state_dir: &Path,
        target: &TargetName,
        deploy_path: &Path,
    ) -> Result<Self, DeployError> {
        let path = LockInfo::lock_path(state_dir, deploy_path);
        let file = open_lock_file(&path)?;

        let file = match file.try_lock_exclusive() {
            Ok(()) => file,
            Err(e) if is_contended(&e) => {
                match LockInfo::read(&path) {
                    Some(holder) => tracing::info!(
                        target_name = %target,
                        holder = %holder.holder,
                        pid = holder.pid,
                        since = %holder.started_at,
                        "waiting for deploy lock"
                    ),
                    None => tracing::info!(target_name = %target, "waiting for deploy lock"),
                }
                tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
                    .await
                    .map_err(|e| DeployError::Lock(format!("lock task failed: {e}")))?
                    .map_err(|e| lock_io_error(&path, e))?
            }
            Err(e) => return Err(lock_io_error(&path, e)),
        };

        Self::held(file, path, target)
    }

    /// Acquire the lock or fail immediately with the holder's details.
    pub fn try_acquire(
        state_dir: &Path,
        target: &TargetName,
        deploy_path: &Path,
    ) -> Result<Self, DeployError> {
        let path = LockInfo::lock_path(state_dir, deploy_path);
        let file = open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Self::held(file, path, target),
            Err(e) if is_contended(&e) => Err(LockInfo::read(&path)
                .map(LockInfo::into_error)
                .unwrap_or_else(|| {
                    DeployError::Lock("lock held by another process".to_string())
                })),
            Err(e) => Err(lock_io_error(&path, e)),
        }
    }

    fn held(mut file: File, path: PathBuf, target: &TargetName) -> Result<Self, DeployError> {
        let info = LockInfo::new(target);
        let json = serde_json::to_string(&info)
            .map_err(|e| DeployError::Lock(format!("failed to serialize lock: {e}")))?;

        let write = |file: &mut File| -> io::Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(json.as_bytes())?;
            file.flush()
        };
        write(&mut file).map_err(|e| lock_io_error(&path, e))?;

        tracing::debug!(target_name = %target, path = %path.display(), "deploy lock acquired");
        Ok(Self {
            file,
            path,
            target: target.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failures the drop path would swallow.
    pub fn release(self) -> Result<(), DeployError> {
        // holder info is left in place; it is only trusted while the file is locked
        FileExt::unlock(&self.file).map_err(|e| lock_io_error(&self.path, e))?;
        tracing::debug!(target_name = %self.target, "deploy lock released");
        Ok(())
    }
}

fn open_lock_file(path: &Path) -> Result<File, DeployError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| lock_io_error(parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| lock_io_error(path, e))
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.kind() == fs2::lock_contended_error().kind()
}

fn lock_io_error(path: &Path, e: io::Error) -> DeployError {
    DeployError::Lock(format!("{}: {e}", path.display()))
}
