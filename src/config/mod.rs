// ABOUTME: Configuration types and parsing for rollout.yml.
// ABOUTME: Handles YAML parsing, validation, environment merging, and env var overrides.

mod env_value;
mod environment;
mod healthcheck;
mod init;
mod overrides;
mod proxy;
mod supervisor;
mod target;

pub use env_value::{EnvValue, resolve_env_map};
pub use environment::{EnvironmentConfig, TargetOverride};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use overrides::{
    ENV_BACKUP_ROOT, ENV_HEALTH_CHECK_RETRIES, ENV_RESTART_TIMEOUT_SECONDS, ENV_STATE_DIR,
};

use overrides::TargetOverrides;
pub use proxy::ProxyConfig;
pub use supervisor::{SupervisorConfig, SupervisorKind};
pub use target::{ServiceConfig, TargetConfig};

use crate::error::{Error, Result};
use crate::types::{Argv, TargetName};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILENAME: &str = "rollout.yml";
pub const CONFIG_FILENAME_ALT: &str = "rollout.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".rollout/config.yml";

/// Environment used when none is given on the command line.
pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory relative paths are resolved against (the config file's directory).
    #[serde(skip)]
    pub base_dir: PathBuf,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Root for timestamped backups. Defaults to `<state_dir>/backups`.
    #[serde(default)]
    pub backup_root: Option<PathBuf>,

    #[serde(default)]
    pub privilege: PrivilegeConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    pub targets: BTreeMap<TargetName, TargetConfig>,

    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,

    #[serde(skip)]
    target_overrides: TargetOverrides,
}

/// How the orchestrator asks for elevated rights. It never runs elevated itself.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PrivilegeConfig {
    /// Prefix for privileged commands, e.g. `["sudo", "-n"]`.
    #[serde(default)]
    pub escalate: Option<Argv>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving relative paths against its directory and
    /// applying `ROLLOUT_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = config_base_dir(path);
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Merge the named environment's overrides onto this config.
    pub fn for_environment(&self, name: &str) -> Result<Config> {
        let env = match self.environments.get(name) {
            Some(env) => env,
            None if name == DEFAULT_ENVIRONMENT => return Ok(self.clone()),
            None => return Err(Error::UnknownEnvironment(name.to_string())),
        };

        let mut merged = self.clone();

        for (k, v) in &env.variables {
            merged.proxy.variables.insert(k.clone(), v.clone());
        }

        for (name, patch) in &env.targets {
            let target = merged
                .targets
                .get_mut(name)
                .ok_or_else(|| Error::UnknownTarget(name.to_string()))?;

            if let Some(ref build) = patch.build {
                target.build = build.clone();
            }
            if let Some(ref deploy_path) = patch.deploy_path {
                target.deploy_path = deploy_path.clone();
            }
            if patch.service.is_some() {
                target.service = patch.service.clone();
            }
            if patch.proxy_template.is_some() {
                target.proxy_template = patch.proxy_template.clone();
            }
            if patch.healthcheck.is_some() {
                target.healthcheck = patch.healthcheck.clone();
            }
            for (k, v) in &patch.env {
                target.env.insert(k.clone(), v.clone());
            }
        }

        merged.apply_target_overrides();
        merged.validate()?;
        Ok(merged)
    }

    pub fn target(&self, name: &str) -> Result<(&TargetName, &TargetConfig)> {
        self.targets
            .iter()
            .find(|(target, _)| target.as_str() == name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))
    }

    /// Resolve a config-relative path.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .as_deref()
            .map(|p| self.resolve_path(p))
            .unwrap_or_else(default_state_dir)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.backup_root
            .as_deref()
            .map(|p| self.resolve_path(p))
            .unwrap_or_else(|| self.state_dir().join("backups"))
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.base_dir.join(".rollout").join("hooks")
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one target is required".to_string(),
            ));
        }

        for (name, target) in &self.targets {
            validate_target(name, target)?;
        }

        for (env_name, env) in &self.environments {
            if let Some(unknown) = env.targets.keys().find(|t| !self.targets.contains_key(*t)) {
                return Err(Error::InvalidConfig(format!(
                    "environment {env_name} overrides unknown target {unknown}"
                )));
            }
        }

        Ok(())
    }
}

fn validate_target(name: &TargetName, target: &TargetConfig) -> Result<()> {
    let invalid = |msg: String| Err(Error::InvalidConfig(format!("target {name}: {msg}")));

    if !target.deploy_path.is_absolute() {
        return invalid(format!(
            "deploy_path must be absolute, got {}",
            target.deploy_path.display()
        ));
    }
    if target.deploy_path.parent().is_none() || target.deploy_path.file_name().is_none() {
        return invalid("deploy_path cannot be the filesystem root".to_string());
    }

    if target.artifact_dir.is_absolute()
        || target
            .artifact_dir
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return invalid("artifact_dir must be relative to source and stay inside it".to_string());
    }
    let names_output_dir = target
        .artifact_dir
        .components()
        .any(|c| matches!(c, Component::Normal(_)));
    if !target.build.is_empty() && !names_output_dir {
        return invalid(
            "artifact_dir must name a build output directory when build commands are configured"
                .to_string(),
        );
    }

    if let Some(ref service) = target.service
        && service.name.trim().is_empty()
    {
        return invalid("service name cannot be empty".to_string());
    }

    if let Some(ref hc) = target.healthcheck {
        if hc.url.is_some() && hc.path.is_some() {
            return invalid("healthcheck takes either url or path, not both".to_string());
        }
        if hc.retries == 0 {
            return invalid("healthcheck retries must be at least 1".to_string());
        }
    }

    Ok(())
}

fn config_base_dir(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // `.rollout/config.yml` is resolved relative to the project, not `.rollout/`
    if dir.file_name().is_some_and(|n| n == ".rollout") {
        dir.parent().unwrap_or(dir).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

/// `$XDG_STATE_HOME/rollout`, falling back to `~/.local/state/rollout`.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
        .unwrap_or_else(|| PathBuf::from(".rollout-state"))
        .join("rollout")
}
