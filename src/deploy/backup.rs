// ABOUTME: Timestamped snapshots of a target's deployed directory.
// ABOUTME: Layout is <backup_root>/<target>/<YYYYmmdd-HHMMSS.fff>/; never pruned here.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::fs::copy_dir_all;
use crate::types::TargetName;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.3f";
const PARTIAL_SUFFIX: &str = ".partial";

/// A complete copy of what a target served at `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandle {
    pub target: TargetName,
    pub created_at: DateTime<Utc>,
    pub location: PathBuf,
}

impl BackupHandle {
    /// Directory holding every backup of `target`.
    pub fn target_dir(backup_root: &Path, target: &TargetName) -> PathBuf {
        backup_root.join(target.as_str())
    }

    /// Snapshot `deploy_path`. Returns `None` when nothing is deployed yet.
    ///
    /// The copy is written under a `.partial` name and renamed when complete,
    /// so a listed backup is always whole.
    pub fn create(
        backup_root: &Path,
        target: &TargetName,
        deploy_path: &Path,
    ) -> io::Result<Option<Self>> {
        if !deploy_path.exists() {
            return Ok(None);
        }

        let dir = Self::target_dir(backup_root, target);
        fs::create_dir_all(&dir)?;

        let created_at = Utc::now();
        let location = unique_location(&dir, &created_at);
        let partial = PathBuf::from(format!("{}{}", location.display(), PARTIAL_SUFFIX));

        if let Err(e) = copy_dir_all(deploy_path, &partial) {
            let _ = fs::remove_dir_all(&partial);
            return Err(e);
        }
        fs::rename(&partial, &location)?;

        tracing::info!(
            target_name = %target,
            location = %location.display(),
            "backup created"
        );

        Ok(Some(Self {
            target: target.clone(),
            created_at,
            location,
        }))
    }

    /// All complete backups of `target`, oldest first.
    pub fn list(backup_root: &Path, target: &TargetName) -> io::Result<Vec<Self>> {
        let dir = Self::target_dir(backup_root, target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(created_at) = parse_backup_name(&name) {
                backups.push(Self {
                    target: target.clone(),
                    created_at,
                    location: entry.path(),
                });
            }
        }

        backups.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.location.cmp(&b.location))
        });
        Ok(backups)
    }

    pub fn latest(backup_root: &Path, target: &TargetName) -> io::Result<Option<Self>> {
        Ok(Self::list(backup_root, target)?.pop())
    }

    /// Interpret an explicit backup directory chosen by the operator.
    pub fn from_location(target: &TargetName, location: &Path) -> io::Result<Self> {
        if !location.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backup {} does not exist", location.display()),
            ));
        }
        let created_at = location
            .file_name()
            .and_then(|n| parse_backup_name(&n.to_string_lossy()))
            .unwrap_or_else(Utc::now);
        Ok(Self {
            target: target.clone(),
            created_at,
            location: location.to_path_buf(),
        })
    }
}

fn unique_location(dir: &Path, created_at: &DateTime<Utc>) -> PathBuf {
    let stamp = created_at.format(TIMESTAMP_FORMAT).to_string();
    let mut location = dir.join(&stamp);
    let mut n = 1;
    while location.exists() {
        location = dir.join(format!("{stamp}-{n}"));
        n += 1;
    }
    location
}

/// Parse `20260101-120000.123` or `20260101-120000.123-2`.
fn parse_backup_name(name: &str) -> Option<DateTime<Utc>> {
    if name.ends_with(PARTIAL_SUFFIX) {
        return None;
    }
    let stamp = match name.get(..19) {
        Some(stamp) => stamp,
        None => return None,
    };
    let rest = &name[19..];
    if !(rest.is_empty() || rest.starts_with('-')) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backup_names() {
        let parsed = parse_backup_name("20260102-030405.678").unwrap();
        assert_eq!(
            parsed.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "2026-01-02 03:04:05.678"
        );
        assert!(parse_backup_name("20260102-030405.678-1").is_some());
    }

    #[test]
    fn ignores_partial_and_foreign_names() {
        assert!(parse_backup_name("20260102-030405.678.partial").is_none());
        assert!(parse_backup_name("notes").is_none());
        assert!(parse_backup_name("20260102-030405.678x").is_none());
    }

    #[test]
    fn missing_deploy_path_creates_no_backup() {
        let root = tempfile::tempdir().unwrap();
        let target = TargetName::new("web").unwrap();
        let backup =
            BackupHandle::create(root.path(), &target, &root.path().join("missing")).unwrap();
        assert!(backup.is_none());
    }

    #[test]
    fn create_then_latest_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let live = tempfile::tempdir().unwrap();
        fs::write(live.path().join("index.html"), "v1").unwrap();
        let target = TargetName::new("web").unwrap();

        let first = BackupHandle::create(root.path(), &target, live.path())
            .unwrap()
            .unwrap();
        let second = BackupHandle::create(root.path(), &target, live.path())
            .unwrap()
            .unwrap();

        assert_ne!(first.location, second.location);
        let latest = BackupHandle::latest(root.path(), &target).unwrap().unwrap();
        assert_eq!(latest.location, second.location);
        assert_eq!(
            fs::read_to_string(latest.location.join("index.html")).unwrap(),
            "v1"
        );
        assert_eq!(BackupHandle::list(root.path(), &target).unwrap().len(), 2);
    }
}
