// ABOUTME: Per-target deployment configuration.
// ABOUTME: Source tree, build variants, artifact and deploy paths, service and proxy wiring.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::{EnvValue, HealthcheckConfig};
use crate::types::Argv;

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Project directory, relative to the config file unless absolute.
    pub source: PathBuf,

    /// Dependency install variants, tried in order until one exits zero.
    #[serde(default)]
    pub install: Vec<Argv>,

    /// Build variants, tried in order until one exits zero and leaves
    /// `artifact_dir` non-empty.
    #[serde(default)]
    pub build: Vec<Argv>,

    /// Build output, relative to `source`.
    pub artifact_dir: PathBuf,

    /// Absolute directory the artifacts are served from.
    pub deploy_path: PathBuf,

    #[serde(default)]
    pub service: Option<ServiceConfig>,

    /// Reverse-proxy site template, relative to the config file unless absolute.
    #[serde(default)]
    pub proxy_template: Option<PathBuf>,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,

    /// Timeout for each install/build variant.
    #[serde(default = "default_build_timeout", with = "humantime_serde")]
    pub build_timeout: Duration,

    /// How long to wait for the supervisor to report the service running.
    #[serde(default = "default_restart_timeout", with = "humantime_serde")]
    pub restart_timeout: Duration,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

/// Supervised process for a target. Static sites have none.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,

    /// Runtime configuration handed to the supervisor on start
    /// (e.g. a PM2 ecosystem file), relative to `deploy_path` unless absolute.
    #[serde(default)]
    pub config: Option<PathBuf>,
}

pub(crate) fn default_build_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

pub(crate) fn default_restart_timeout() -> Duration {
    Duration::from_secs(30)
}
