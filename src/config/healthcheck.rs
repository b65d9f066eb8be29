// ABOUTME: Post-deploy health check configuration.
// ABOUTME: Either an HTTP endpoint or a filesystem path, with fixed retries and backoff.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthcheckConfig {
    /// HTTP endpoint; any 2xx response is healthy.
    #[serde(default)]
    pub url: Option<String>,

    /// File or directory that must exist, relative to `deploy_path` unless absolute.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fixed delay between probes.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Timeout for a single probe.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Delay before the first probe.
    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

fn default_retries() -> u32 {
    3
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_start_period() -> Duration {
    Duration::ZERO
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        HealthcheckConfig {
            url: None,
            path: None,
            retries: default_retries(),
            interval: default_interval(),
            timeout: default_timeout(),
            start_period: default_start_period(),
        }
    }
}
