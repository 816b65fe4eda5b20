//! Upload attempt records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ContentHash;
use super::errors::UploadError;
use super::ids::AttemptId;

/// Outcome of a single upload try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failed,
}

/// One try at delivering an artifact to one target.
///
/// Created when the try starts (`Pending`) and moved to a terminal outcome
/// exactly once. Terminal records are kept for the run report only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAttempt {
    pub attempt_id: AttemptId,
    pub target: String,
    pub artifact_hash: ContentHash,

    /// 1-based.
    pub attempt_number: u32,

    pub outcome: AttemptOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadError>,

    /// The destination already held this exact artifact; nothing was written.
    #[serde(default)]
    pub already_present: bool,

    /// Backoff waited before this attempt started (zero for the first one).
    #[serde(with = "duration_ms")]
    pub backoff: Duration,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadAttempt {
    pub fn start(
        attempt_id: AttemptId,
        target: impl Into<String>,
        artifact_hash: ContentHash,
        attempt_number: u32,
        backoff: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id,
            target: target.into(),
            artifact_hash,
            attempt_number,
            outcome: AttemptOutcome::Pending,
            error: None,
            already_present: false,
            backoff,
            started_at,
            completed_at: None,
        }
    }

    pub fn succeed(mut self, already_present: bool, at: DateTime<Utc>) -> Self {
        self.outcome = AttemptOutcome::Success;
        self.already_present = already_present;
        self.completed_at = Some(at);
        self
    }

    pub fn fail(mut self, error: UploadError, at: DateTime<Utc>) -> Self {
        self.outcome = AttemptOutcome::Failed;
        self.error = Some(error);
        self.completed_at = Some(at);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
