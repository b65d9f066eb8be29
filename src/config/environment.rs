// ABOUTME: Per-environment overrides (staging, production, ...).
// ABOUTME: Merged onto the base config before targets are resolved.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{EnvValue, HealthcheckConfig, ServiceConfig};
use crate::types::{Argv, TargetName};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnvironmentConfig {
    /// Extra template variables, merged over `proxy.variables`.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default)]
    pub targets: HashMap<TargetName, TargetOverride>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetOverride {
    #[serde(default)]
    pub build: Option<Vec<Argv>>,

    #[serde(default)]
    pub deploy_path: Option<PathBuf>,

    #[serde(default)]
    pub service: Option<ServiceConfig>,

    #[serde(default)]
    pub proxy_template: Option<PathBuf>,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}
