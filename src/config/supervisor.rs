// ABOUTME: Process supervisor selection and settings.
// ABOUTME: PM2 for Node services, systemd for everything else.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    #[default]
    Pm2,
    Systemd,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub kind: SupervisorKind,

    /// Run supervisor commands through the escalation prefix.
    /// Defaults to false for PM2 (per-user daemon) and true for systemd.
    #[serde(default)]
    pub privileged: Option<bool>,

    /// Timeout for a single supervisor command.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl SupervisorConfig {
    pub fn is_privileged(&self) -> bool {
        self.privileged
            .unwrap_or(self.kind == SupervisorKind::Systemd)
    }

    pub fn command_timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(30))
    }
}
