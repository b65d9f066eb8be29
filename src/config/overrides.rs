// ABOUTME: Environment variable overrides applied after the config file is parsed.
// ABOUTME: Lets automation tune paths, retries, and timeouts without editing rollout.yml.

use std::path::PathBuf;
use std::time::Duration;

use super::Config;
use crate::error::{Error, Result};

pub const ENV_STATE_DIR: &str = "ROLLOUT_STATE_DIR";
pub const ENV_BACKUP_ROOT: &str = "ROLLOUT_BACKUP_ROOT";
pub const ENV_HEALTH_CHECK_RETRIES: &str = "ROLLOUT_HEALTH_CHECK_RETRIES";
pub const ENV_RESTART_TIMEOUT_SECONDS: &str = "ROLLOUT_RESTART_TIMEOUT_SECONDS";

/// Per-target overrides read from the environment. Kept on the config so
/// they can be re-applied after an environment merge replaces target fields.
#[derive(Debug, Clone, Default)]
pub(crate) struct TargetOverrides {
    health_check_retries: Option<u32>,
    restart_timeout: Option<Duration>,
}

impl TargetOverrides {
    fn from_env() -> Result<Self> {
        let health_check_retries = match non_empty_var(ENV_HEALTH_CHECK_RETRIES) {
            Some(raw) => {
                let retries: u32 = parse_var(ENV_HEALTH_CHECK_RETRIES, &raw)?;
                if retries == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "{ENV_HEALTH_CHECK_RETRIES} must be at least 1"
                    )));
                }
                Some(retries)
            }
            None => None,
        };

        let restart_timeout = match non_empty_var(ENV_RESTART_TIMEOUT_SECONDS) {
            Some(raw) => Some(Duration::from_secs(parse_var(
                ENV_RESTART_TIMEOUT_SECONDS,
                &raw,
            )?)),
            None => None,
        };

        Ok(Self {
            health_check_retries,
            restart_timeout,
        })
    }
}

impl Config {
    /// Apply `ROLLOUT_*` overrides. Numeric overrides apply to every target
    /// and survive [`Config::for_environment`].
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_var(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = non_empty_var(ENV_BACKUP_ROOT) {
            self.backup_root = Some(PathBuf::from(dir));
        }

        self.target_overrides = TargetOverrides::from_env()?;
        self.apply_target_overrides();
        Ok(())
    }

    pub(crate) fn apply_target_overrides(&mut self) {
        let overrides = self.target_overrides.clone();
        for target in self.targets.values_mut() {
            if let Some(retries) = overrides.health_check_retries {
                target
                    .healthcheck
                    .get_or_insert_with(Default::default)
                    .retries = retries;
            }
            if let Some(timeout) = overrides.restart_timeout {
                target.restart_timeout = timeout;
            }
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{name} is not a valid number: {raw}")))
}
