use serde::{Deserialize, Serialize};

/// What the external CI runner hands us when a release fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub branch: String,
    pub commit_sha: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_override: Option<String>,
}

impl TriggerContext {
    pub fn new(branch: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit_sha: commit_sha.into(),
            environment_override: None,
        }
    }

    pub fn with_environment(mut self, env: impl Into<String>) -> Self {
        self.environment_override = Some(env.into());
        self
    }
}
