// ABOUTME: Generic deployment struct parameterized by stage marker.
// ABOUTME: Carries the immutable target, the run record, and what has been mutated so far.

use std::marker::PhantomData;
use std::sync::Arc;

use super::run::PipelineRun;
use super::state::Initialized;
use super::target::DeploymentTarget;
use super::BackupHandle;

/// Side effects applied so far, so rollback only undoes what happened.
#[derive(Debug, Default, Clone)]
pub(crate) struct Changes {
    /// Placement was attempted; the deploy path may differ from the backup.
    pub placed: bool,
    /// Proxy config that was active before this run (`Some(None)`: there was none).
    /// `None` when the proxy was not touched.
    pub proxy_previous: Option<Option<Vec<u8>>>,
    /// The service was stopped or started.
    pub service_touched: bool,
}

/// A pipeline run in progress, parameterized by its last completed stage.
#[derive(Debug)]
pub struct Deployment<S> {
    pub(crate) target: Arc<DeploymentTarget>,
    pub(crate) run: PipelineRun,
    pub(crate) changes: Changes,
    pub(crate) _state: PhantomData<S>,
}

impl Deployment<Initialized> {
    /// Start a pipeline for `target`. The run is marked running.
    pub fn new(target: Arc<DeploymentTarget>) -> Self {
        let mut run = PipelineRun::new(target.name.clone(), target.environment.clone());
        run.mark_running();
        Deployment {
            target,
            run,
            changes: Changes::default(),
            _state: PhantomData,
        }
    }
}

impl<S> Deployment<S> {
    pub fn target(&self) -> &DeploymentTarget {
        &self.target
    }

    /// The run record so far.
    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// Backup taken at the start of this run, if any.
    pub fn backup_handle(&self) -> Option<&BackupHandle> {
        self.run.backup.as_ref()
    }
}
