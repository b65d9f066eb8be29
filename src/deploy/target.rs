// ABOUTME: Resolved, immutable description of one target for one environment.
// ABOUTME: Built from Config; every path is absolute and every variable resolved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, HealthcheckConfig, resolve_env_map};
use crate::error::Result;
use crate::types::{Argv, TargetName};

/// Everything a pipeline run needs to know about its target.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub name: TargetName,
    pub environment: String,
    pub source_path: PathBuf,
    pub install: Vec<Argv>,
    pub build: Vec<Argv>,
    /// Absolute build output directory, inside `source_path`.
    pub artifact_dir: PathBuf,
    pub deploy_path: PathBuf,
    pub service: Option<ServiceSpec>,
    pub proxy_template: Option<PathBuf>,
    /// Template values: configured variables plus `deploy_path`, `target`, `environment`.
    pub proxy_variables: HashMap<String, String>,
    pub health: HealthCheck,
    pub build_timeout: Duration,
    pub restart_timeout: Duration,
    /// Environment for install and build commands.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// Runtime config handed to the supervisor, resolved against `deploy_path`.
    pub config: Option<PathBuf>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    Http(String),
    File(PathBuf),
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeTarget::Http(url) => write!(f, "GET {url}"),
            ProbeTarget::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub probe: ProbeTarget,
    pub retries: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub start_period: Duration,
}

impl DeploymentTarget {
    /// Resolve `name` from a config already merged for `environment`.
    pub fn from_config(config: &Config, name: &str, environment: &str) -> Result<Self> {
        let (name, target) = config.target(name)?;

        let source_path = config.resolve_path(&target.source);
        let artifact_dir = source_path.join(&target.artifact_dir);
        let deploy_path = target.deploy_path.clone();

        let service = target.service.as_ref().map(|svc| ServiceSpec {
            name: svc.name.clone(),
            config: svc.config.as_deref().map(|c| relative_to(&deploy_path, c)),
            working_dir: deploy_path.clone(),
        });

        let hc = target.healthcheck.clone().unwrap_or_default();
        let health = health_check(&hc, &deploy_path);

        let mut proxy_variables = config.proxy.variables.clone();
        proxy_variables.insert(
            "deploy_path".to_string(),
            deploy_path.display().to_string(),
        );
        proxy_variables.insert("target".to_string(), name.to_string());
        proxy_variables.insert("environment".to_string(), environment.to_string());

        let mut env = resolve_env_map(&target.env)?;
        env.insert("ROLLOUT_TARGET".to_string(), name.to_string());
        env.insert("ROLLOUT_ENVIRONMENT".to_string(), environment.to_string());

        Ok(Self {
            name: name.clone(),
            environment: environment.to_string(),
            source_path,
            install: target.install.clone(),
            build: target.build.clone(),
            artifact_dir,
            deploy_path,
            service,
            proxy_template: target
                .proxy_template
                .as_deref()
                .map(|p| config.resolve_path(p)),
            proxy_variables,
            health,
            build_timeout: target.build_timeout,
            restart_timeout: target.restart_timeout,
            env,
        })
    }
}

fn health_check(hc: &HealthcheckConfig, deploy_path: &Path) -> HealthCheck {
    let probe = match (&hc.url, &hc.path) {
        (Some(url), _) => ProbeTarget::Http(url.clone()),
        (None, Some(path)) => ProbeTarget::File(relative_to(deploy_path, path)),
        // static targets default to "something is being served"
        (None, None) => ProbeTarget::File(deploy_path.to_path_buf()),
    };
    HealthCheck {
        probe,
        retries: hc.retries.max(1),
        interval: hc.interval,
        timeout: hc.timeout,
        start_period: hc.start_period,
    }
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
proxy:
  variables:
    domain: example.com
targets:
  web:
    source: web
    build:
      - npm run build
    artifact_dir: dist
    deploy_path: /var/www/web
    healthcheck:
      path: index.html
  api:
    source: /opt/api
    artifact_dir: .
    deploy_path: /srv/api
    service:
      name: api
      config: ecosystem.config.js
    healthcheck:
      url: http://127.0.0.1:3000/health
    env:
      NODE_ENV: production
"#;

    fn config() -> Config {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.base_dir = PathBuf::from("/project");
        config
    }

    #[test]
    fn resolves_paths_against_config_and_deploy_dirs() {
        let web = DeploymentTarget::from_config(&config(), "web", "production").unwrap();
        assert_eq!(web.source_path, Path::new("/project/web"));
        assert_eq!(web.artifact_dir, Path::new("/project/web/dist"));
        assert_eq!(
            web.health.probe,
            ProbeTarget::File(PathBuf::from("/var/www/web/index.html"))
        );
        assert!(web.service.is_none());
    }

    #[test]
    fn service_config_is_relative_to_deploy_path() {
        let api = DeploymentTarget::from_config(&config(), "api", "production").unwrap();
        let service = api.service.unwrap();
        assert_eq!(
            service.config.as_deref(),
            Some(Path::new("/srv/api/ecosystem.config.js"))
        );
        assert_eq!(
            api.health.probe,
            ProbeTarget::Http("http://127.0.0.1:3000/health".to_string())
        );
        assert_eq!(api.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(api.env.get("ROLLOUT_TARGET").map(String::as_str), Some("api"));
    }

    #[test]
    fn builtin_template_variables_are_present() {
        let web = DeploymentTarget::from_config(&config(), "web", "staging").unwrap();
        assert_eq!(web.proxy_variables["domain"], "example.com");
        assert_eq!(web.proxy_variables["deploy_path"], "/var/www/web");
        assert_eq!(web.proxy_variables["target"], "web");
        assert_eq!(web.proxy_variables["environment"], "staging");
    }

    #[test]
    fn unknown_target_is_an_error() {
        assert!(DeploymentTarget::from_config(&config(), "nope", "production").is_err());
    }
}
