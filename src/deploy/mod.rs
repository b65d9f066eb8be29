// ABOUTME: Deployment pipeline using the type state pattern.
// ABOUTME: Exports stage markers, run records, backups, locking, and the orchestrator.

pub mod audit;
mod backup;
mod deployment;
mod error;
pub mod fs;
mod lock;
mod orchestrator;
mod rollback;
mod run;
mod state;
mod target;
mod transitions;

pub use backup::BackupHandle;
pub use deployment::Deployment;
pub use error::{DeployError, DeployErrorKind, LockHolderInfo};
pub use lock::{DeployLock, LockInfo};
pub use orchestrator::{
    Orchestrator, PlannedStage, RunOptions, RunReport, current_effective_uid,
};
pub use rollback::{ManualRollback, manual_rollback};
pub use run::{
    PipelineRun, RollbackRecord, RunStatus, StageName, StageOutcome, StageResult,
};
pub use state::{
    BackedUp, Built, DependenciesInstalled, Initialized, Mutating, Placed, ProxyActivated,
    ServiceRestarted, Verified,
};
pub use target::{DeploymentTarget, HealthCheck, ProbeTarget, ServiceSpec};
pub use transitions::TransitionResult;
