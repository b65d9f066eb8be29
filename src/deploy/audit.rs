// ABOUTME: Run records kept for audit under <state_dir>/runs/<target>/.
// ABOUTME: One JSON file per finished run, named by start time; never deleted here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::run::PipelineRun;
use crate::types::TargetName;

pub fn runs_dir(state_dir: &Path, target: &TargetName) -> PathBuf {
    state_dir.join("runs").join(target.as_str())
}

/// Write a finished run. Returns the record's path.
pub fn record(state_dir: &Path, run: &PipelineRun) -> io::Result<PathBuf> {
    let dir = runs_dir(state_dir, &run.target);
    fs::create_dir_all(&dir)?;

    let stamp = run.started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let mut path = dir.join(format!("{stamp}.json"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stamp}-{n}.json"));
        n += 1;
    }

    let json = serde_json::to_vec_pretty(run)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

/// All recorded runs for `target`, oldest first.
pub fn history(state_dir: &Path, target: &TargetName) -> io::Result<Vec<PipelineRun>> {
    let dir = runs_dir(state_dir, target);
    let mut paths: Vec<PathBuf> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    paths.sort();

    let mut runs = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read(&path)?;
        match serde_json::from_slice::<PipelineRun>(&content) {
            Ok(run) => runs.push(run),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable run record"),
        }
    }
    runs.sort_by_key(|r| r.started_at);
    Ok(runs)
}

pub fn latest(state_dir: &Path, target: &TargetName) -> io::Result<Option<PipelineRun>> {
    Ok(history(state_dir, target)?.pop())
}
