//! Deployment configuration (`courier.toml`).
//!
//! ```toml
//! [settings]
//! worker_limit = 4
//! strict = false
//! credential_env_prefix = "COURIER_"
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 2000
//! multiplier = 2.0
//! max_delay_ms = 60000
//!
//! [source]
//! root = "dist"
//! include = ["**/*"]
//!
//! [[targets]]
//! name = "staging"
//! destination = "s3://sites/staging/site.tar.gz"
//! credential_ref = "STAGING_TOKEN"
//! branch_pattern = "main"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Target;
use crate::plan::{ResolveError, validate_targets};
use crate::upload::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid setting `{field}`: {message}")]
    Invalid { field: &'static str, message: String },

    #[error(transparent)]
    Targets(#[from] ResolveError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Treat "no targets matched" as a failed run.
    #[serde(default)]
    pub strict: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env_prefix: Option<String>,
}

fn default_worker_limit() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            strict: false,
            credential_env_prefix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include")]
    pub include: Vec<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_include() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include: default_include(),
        }
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl DeployConfig {
    /// Read, parse and validate `path`. A relative `source.root` is resolved
    /// against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        if config.source.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.source.root = base.join(&config.source.root);
        }
        Ok(config)
    }

    /// Parse and validate TOML text. Paths are kept as written.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.worker_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "settings.worker_limit",
                message: "must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                message: "must be at least 1".into(),
            });
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                message: format!("must be >= 1.0, got {}", self.retry.multiplier),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                message: "must not be smaller than retry.base_delay_ms".into(),
            });
        }
        if self.source.include.is_empty() {
            return Err(ConfigError::Invalid {
                field: "source.include",
                message: "needs at least one pattern".into(),
            });
        }
        validate_targets(&self.targets)?;
        Ok(())
    }
}
