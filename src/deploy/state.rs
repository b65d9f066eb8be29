// ABOUTME: Pipeline stage marker types for the type state pattern.
// ABOUTME: Zero-sized types enforce the fixed stage order at compile time.

//! Stages can only be called in order. Skipping ahead does not compile:
//!
//! ```compile_fail
//! use rollout::deploy::{Deployment, DeploymentTarget};
//! use std::sync::Arc;
//!
//! async fn skip_build(target: Arc<DeploymentTarget>) {
//!     // place_artifacts() only exists on Deployment<Built>
//!     let _ = Deployment::new(target).place_artifacts().await;
//! }
//! ```
//!
//! Nothing has been mutated before the build, so there is nothing to roll back:
//!
//! ```compile_fail
//! use rollout::deploy::{BackedUp, DeployError, Deployment};
//! use rollout::proxy::Proxy;
//! use rollout::supervisor::Supervisor;
//!
//! async fn early_rollback(
//!     deployment: Deployment<BackedUp>,
//!     proxy: &dyn Proxy,
//!     supervisor: &dyn Supervisor,
//! ) {
//!     let error = DeployError::Lock("held".to_string());
//!     let _ = deployment.rollback(error, proxy, supervisor).await;
//! }
//! ```
//!
//! A verified run is finished, not rolled back:
//!
//! ```compile_fail
//! use rollout::deploy::{DeployError, Deployment, Verified};
//! use rollout::proxy::Proxy;
//! use rollout::supervisor::Supervisor;
//!
//! async fn late_rollback(
//!     deployment: Deployment<Verified>,
//!     proxy: &dyn Proxy,
//!     supervisor: &dyn Supervisor,
//! ) {
//!     let error = DeployError::Lock("held".to_string());
//!     let _ = deployment.rollback(error, proxy, supervisor).await;
//! }
//! ```

/// Lock held, preconditions checked, nothing touched yet.
/// Available actions: `backup()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Initialized;

/// Current deployment snapshotted (or nothing to snapshot).
/// Available actions: `install_dependencies()`
#[derive(Debug, Clone, Copy, Default)]
pub struct BackedUp;

/// Available actions: `build()`
#[derive(Debug, Clone, Copy, Default)]
pub struct DependenciesInstalled;

/// Artifacts present and non-empty.
/// Available actions: `place_artifacts()`, `rollback()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Built;

/// New artifacts live under the deploy path.
/// Available actions: `activate_proxy_config()`, `rollback()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Placed;

/// Available actions: `restart_service()`, `rollback()`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyActivated;

/// Available actions: `health_check()`, `rollback()`
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceRestarted;

/// Health check passed.
/// Available actions: `finish()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Verified;

mod sealed {
    pub trait Sealed {}
}

/// States from which the deploy path may have been mutated, so a failure
/// must restore the backup.
pub trait Mutating: sealed::Sealed {}

impl sealed::Sealed for Built {}
impl sealed::Sealed for Placed {}
impl sealed::Sealed for ProxyActivated {}
impl sealed::Sealed for ServiceRestarted {}

impl Mutating for Built {}
impl Mutating for Placed {}
impl Mutating for ProxyActivated {}
impl Mutating for ServiceRestarted {}
