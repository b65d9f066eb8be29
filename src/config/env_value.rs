// ABOUTME: Build environment values with interpolation support.
// ABOUTME: A value is either a literal or a reference to the caller's environment.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Value for a variable passed to build commands and hooks.
///
/// ```yaml
/// env:
///   NODE_ENV: production
///   API_URL: { env: FRONTEND_API_URL, default: "http://127.0.0.1:3000" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => std::env::var(var)
                .ok()
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnvVar(var.clone())),
        }
    }
}

/// Resolve every value, failing on the first missing variable.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}
