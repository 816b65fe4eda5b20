//! Deployment targets and their destinations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where an artifact lands: `<scheme>://<bucket>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: String,
    bucket: String,
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("destination `{0}` is missing a scheme (expected <scheme>://<bucket>/<key>)")]
    MissingScheme(String),

    #[error("destination `{0}` is missing a bucket")]
    MissingBucket(String),

    #[error("destination `{0}` is missing an object key")]
    MissingKey(String),

    #[error("destination `{0}` contains an invalid path segment")]
    InvalidSegment(String),
}

impl Destination {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| DestinationError::MissingScheme(s.to_string()))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(DestinationError::MissingBucket(s.to_string()));
        }
        let key = key.trim_matches('/');
        if key.is_empty() {
            return Err(DestinationError::MissingKey(s.to_string()));
        }
        if key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
            || bucket == "."
            || bucket == ".."
        {
            return Err(DestinationError::InvalidSegment(s.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl Serialize for Destination {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque handle to a secret, resolved by a `CredentialResolver` at call time.
///
/// The reference itself is not secret, but it is still kept out of run state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One deployment destination. Immutable at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,

    pub destination: Destination,

    pub credential_ref: CredentialRef,

    /// Names of targets that must succeed before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Glob matched against the trigger's branch.
    #[serde(default = "default_branch_pattern")]
    pub branch_pattern: String,

    /// Environment label used by explicit environment overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

fn default_branch_pattern() -> String {
    "*".to_string()
}

impl Target {
    pub fn new(name: impl Into<String>, destination: Destination, credential_ref: CredentialRef) -> Self {
        Self {
            name: name.into(),
            destination,
            credential_ref,
            depends_on: Vec::new(),
            branch_pattern: default_branch_pattern(),
            environment: None,
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_branch_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.branch_pattern = pattern.into();
        self
    }

    pub fn with_environment(mut self, env: impl Into<String>) -> Self {
        self.environment = Some(env.into());
        self
    }
}
