// ABOUTME: Reverse proxy configuration (nginx by default).
// ABOUTME: Where site configs live and how to validate and reload them.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::Argv;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Directory holding one `<target>.conf` per target.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default = "default_validate")]
    pub validate: Argv,

    /// Graceful reload; the proxy process is never restarted.
    #[serde(default = "default_reload")]
    pub reload: Argv,

    /// Write configs and run validate/reload through the escalation prefix.
    #[serde(default = "default_privileged")]
    pub privileged: bool,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Values for `{{name}}` placeholders in templates.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d")
}

fn default_validate() -> Argv {
    Argv::new("nginx").arg("-t")
}

fn default_reload() -> Argv {
    Argv::new("nginx").args(["-s", "reload"])
}

fn default_privileged() -> bool {
    true
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            config_dir: default_config_dir(),
            validate: default_validate(),
            reload: default_reload(),
            privileged: default_privileged(),
            timeout: default_command_timeout(),
            variables: HashMap::new(),
        }
    }
}
