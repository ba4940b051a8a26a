//! Engine configuration.
//!
//! A [`Config`] can be built in code, loaded from a JSON file and overridden by
//! `KISPEC_*` environment variables.

use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::outcome::MAX_TIMEOUT_MS;

/// Environment variable prefix
const ENV_PREFIX: &str = "KISPEC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timeout in ms for tests without their own, `0` disables it.
    #[serde(alias = "defaultTimeout")]
    pub default_timeout: u64,

    /// Timeout in ms for hooks without their own, `0` disables it.
    #[serde(alias = "defaultHookTimeout")]
    pub default_hook_timeout: u64,

    /// Skip every slow test.
    #[serde(alias = "skipSlow")]
    pub skip_slow: bool,

    /// Only keep slow tests.
    #[serde(alias = "onlySlow")]
    pub only_slow: bool,

    /// Not used by the engine, kept for collaborators that rerun on changes.
    pub watch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: 5000,
            default_hook_timeout: 5000,
            skip_slow: false,
            only_slow: false,
            watch: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(self, ms: u64) -> Self {
        Self {
            default_timeout: ms.min(MAX_TIMEOUT_MS),
            ..self
        }
    }

    pub fn with_default_hook_timeout(self, ms: u64) -> Self {
        Self {
            default_hook_timeout: ms.min(MAX_TIMEOUT_MS),
            ..self
        }
    }

    pub fn with_skip_slow(self, skip_slow: bool) -> Self {
        Self { skip_slow, ..self }
    }

    pub fn with_only_slow(self, only_slow: bool) -> Self {
        Self { only_slow, ..self }
    }

    pub fn with_watch(self, watch: bool) -> Self {
        Self { watch, ..self }
    }

    /// Load a JSON config file, missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `KISPEC_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| env::var(var).ok())
    }

    /// Apply overrides looked up by their full variable name, e.g. `KISPEC_SKIP_SLOW`.
    pub fn with_overrides_from(
        self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}_{name}");
            lookup(&var).map(|value| (var, value))
        };

        let mut config = self;
        if let Some((var, value)) = get("DEFAULT_TIMEOUT") {
            config = config.with_default_timeout(parse_ms(var, value)?);
        }
        if let Some((var, value)) = get("DEFAULT_HOOK_TIMEOUT") {
            config = config.with_default_hook_timeout(parse_ms(var, value)?);
        }
        if let Some((var, value)) = get("SKIP_SLOW") {
            config.skip_slow = parse_bool(var, value)?;
        }
        if let Some((var, value)) = get("ONLY_SLOW") {
            config.only_slow = parse_bool(var, value)?;
        }
        if let Some((var, value)) = get("WATCH") {
            config.watch = parse_bool(var, value)?;
        }
        Ok(config)
    }
}

fn parse_ms(var: String, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

fn parse_bool(var: String, value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().trim() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}
