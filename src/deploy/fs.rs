// ABOUTME: Filesystem helpers for placement, backup, and restore.
// ABOUTME: Directory copies and the staging-then-rename swap that keeps deploys atomic.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Whether `path` is a directory with at least one entry.
pub fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Recursively copy `src` into `dst` (created if missing). Symlinks are copied
/// as links. Returns the number of files copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    let meta = fs::metadata(src)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", src.display()),
        ));
    }

    fs::create_dir_all(dst)?;

    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if file_type.is_dir() {
            copied += copy_dir_all(&from, &to)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(&from)?;
            std::os::unix::fs::symlink(link, &to)?;
            copied += 1;
        } else {
            fs::copy(&from, &to)?;
            copied += 1;
        }
    }

    // after the contents, so a read-only source dir stays writable while copying
    fs::set_permissions(dst, meta.permissions())?;
    Ok(copied)
}

/// Sibling paths used while swapping a deployment directory.
#[derive(Debug, Clone)]
pub struct SwapPaths {
    pub staging: PathBuf,
    pub old: PathBuf,
}

impl SwapPaths {
    pub fn for_target(deploy_path: &Path) -> io::Result<Self> {
        let parent = deploy_path.parent().ok_or_else(|| no_parent(deploy_path))?;
        let name = deploy_path
            .file_name()
            .ok_or_else(|| no_parent(deploy_path))?
            .to_string_lossy();
        Ok(Self {
            staging: parent.join(format!(".{name}.rollout-staging")),
            old: parent.join(format!(".{name}.rollout-old")),
        })
    }
}

fn no_parent(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} has no parent directory", path.display()),
    )
}

/// Replace `deploy_path` with a copy of `source`.
///
/// The copy goes to a staging sibling first; the live directory is only
/// touched by two renames. A failure at any point leaves either the old or the
/// new tree complete under `deploy_path`, or the old tree at
/// [`SwapPaths::old`] for [`recover_interrupted_swap`] to put back.
pub fn replace_dir_atomically(source: &Path, deploy_path: &Path) -> io::Result<u64> {
    let paths = SwapPaths::for_target(deploy_path)?;
    if let Some(parent) = deploy_path.parent() {
        fs::create_dir_all(parent)?;
    }

    remove_if_exists(&paths.staging)?;
    let copied = match copy_dir_all(source, &paths.staging) {
        Ok(n) => n,
        Err(e) => {
            let _ = remove_if_exists(&paths.staging);
            return Err(e);
        }
    };

    remove_if_exists(&paths.old)?;
    let had_previous = deploy_path.exists();
    if had_previous {
        fs::rename(deploy_path, &paths.old)?;
    }

    if let Err(e) = fs::rename(&paths.staging, deploy_path) {
        if had_previous {
            fs::rename(&paths.old, deploy_path)?;
        }
        let _ = remove_if_exists(&paths.staging);
        return Err(e);
    }

    if had_previous && let Err(e) = fs::remove_dir_all(&paths.old) {
        tracing::warn!(
            path = %paths.old.display(),
            error = %e,
            "failed to remove previous deployment after swap"
        );
    }

    Ok(copied)
}

/// What [`recover_interrupted_swap`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapRecovery {
    /// Nothing left over from an earlier run.
    Clean,
    /// Removed leftover staging or old directories; the live tree was intact.
    RemovedLeftovers,
    /// The live tree was missing and the old tree was moved back.
    RestoredPrevious,
}

/// Repair the state left by a process killed in the middle of a swap.
pub fn recover_interrupted_swap(deploy_path: &Path) -> io::Result<SwapRecovery> {
    let paths = SwapPaths::for_target(deploy_path)?;
    let mut recovery = SwapRecovery::Clean;

    if paths.old.exists() {
        if deploy_path.exists() {
            fs::remove_dir_all(&paths.old)?;
            recovery = SwapRecovery::RemovedLeftovers;
        } else {
            fs::rename(&paths.old, deploy_path)?;
            recovery = SwapRecovery::RestoredPrevious;
        }
    }

    if paths.staging.exists() {
        fs::remove_dir_all(&paths.staging)?;
        if recovery == SwapRecovery::Clean {
            recovery = SwapRecovery::RemovedLeftovers;
        }
    }

    Ok(recovery)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
