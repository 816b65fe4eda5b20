//! Delivers one artifact to one target with retries.
//!
//! One delivery:
//! 1. Resolve the target's credential (failure is permanent, one attempt)
//! 2. HEAD: the same content hash already there -> success, nothing written
//! 3. PUT, then HEAD again to verify the stored hash
//! 4. Transient store errors are retried with exponential backoff
//!
//! Cancellation is checked before each attempt and raced against both the
//! store calls and the backoff wait.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::cancel::CancelSignal;
use crate::domain::{Artifact, ContentHash, ErrorKind, Target, UploadAttempt, UploadError};
use crate::ports::{
    Clock, Credential, CredentialResolver, IdGenerator, ObjectMeta, ObjectStore, Sleeper,
    StoreError,
};

/// Every attempt made for one (artifact, target) pair, plus the final verdict.
#[derive(Debug, Clone)]
pub struct Delivery {
    attempts: Vec<UploadAttempt>,
    error: Option<UploadError>,
}

impl Delivery {
    /// Attempts in order. Never empty.
    pub fn attempts(&self) -> &[UploadAttempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<UploadAttempt> {
        self.attempts
    }

    /// The attempt that decided the delivery.
    pub fn last(&self) -> Option<&UploadAttempt> {
        self.attempts.last()
    }

    /// Terminal error. May be `Cancelled` even when the last attempt failed
    /// transiently (cancelled during backoff).
    pub fn error(&self) -> Option<&UploadError> {
        self.error.as_ref()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn already_present(&self) -> bool {
        self.last().is_some_and(|a| a.is_success() && a.already_present)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Why a single try failed. Internal; recorded as `UploadError`.
#[derive(Debug)]
enum TryError {
    Store(StoreError),
    Mismatch {
        expected: ContentHash,
        found: Option<ContentHash>,
    },
    Cancelled,
}

impl TryError {
    fn kind(&self) -> ErrorKind {
        match self {
            TryError::Store(e) => e.kind(),
            TryError::Mismatch { .. } => ErrorKind::Permanent,
            TryError::Cancelled => ErrorKind::Cancelled,
        }
    }

    fn into_upload_error(self) -> UploadError {
        let kind = self.kind();
        let message = match self {
            TryError::Store(e) => e.to_string(),
            TryError::Mismatch { expected, found } => match found {
                Some(found) => format!(
                    "stored object hash {} does not match artifact hash {}",
                    found.short(),
                    expected.short()
                ),
                None => format!(
                    "object missing after write of artifact {}",
                    expected.short()
                ),
            },
            TryError::Cancelled => return UploadError::Cancelled,
        };
        match kind {
            ErrorKind::Transient => UploadError::TransientFailure(message),
            _ => UploadError::PermanentFailure(message),
        }
    }
}

impl From<StoreError> for TryError {
    fn from(e: StoreError) -> Self {
        TryError::Store(e)
    }
}

/// Upload executor shared by every target of a run.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialResolver>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    ids: Arc<dyn IdGenerator>,
    policy: RetryPolicy,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialResolver>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        ids: Arc<dyn IdGenerator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            credentials,
            clock,
            sleeper,
            ids,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `artifact` to `target`, retrying transient failures.
    ///
    /// Uploading the same artifact to the same target again is safe: the second
    /// call finds the object via HEAD and writes nothing.
    pub async fn upload(
        &self,
        artifact: &Artifact,
        target: &Target,
        cancel: &CancelSignal,
    ) -> Delivery {
        let hash = artifact.content_hash();
        let mut attempts = Vec::new();
        let mut retry = RetryState::new(self.policy.clone());
        let mut backoff = Duration::ZERO;

        let credential = match self.credentials.resolve(&target.credential_ref) {
            Ok(c) => c,
            Err(e) => {
                warn!(target = %target.name, error = %e, "credential resolution failed");
                let error = UploadError::PermanentFailure(format!(
                    "credential for target `{}` could not be resolved: {e}",
                    target.name
                ));
                let attempt = self
                    .start_attempt(target, hash, retry.begin_attempt(), backoff)
                    .fail(error, self.clock.now());
                let error = attempt.error.clone();
                attempts.push(attempt);
                return Delivery { attempts, error };
            }
        };

        loop {
            let number = retry.begin_attempt();
            let attempt = self.start_attempt(target, hash, number, backoff);

            let result = if cancel.is_cancelled() {
                Err(TryError::Cancelled)
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TryError::Cancelled),
                    r = self.try_once(artifact, target, &credential) => r,
                }
            };

            let err = match result {
                Ok(already_present) => {
                    info!(
                        target = %target.name,
                        destination = %target.destination,
                        hash = %hash.short(),
                        attempt = number,
                        already_present,
                        "upload succeeded"
                    );
                    attempts.push(attempt.succeed(already_present, self.clock.now()));
                    return Delivery {
                        attempts,
                        error: None,
                    };
                }
                Err(err) => err,
            };

            let decision = retry.on_failure(err.kind());
            let error = err.into_upload_error();
            attempts.push(attempt.fail(error.clone(), self.clock.now()));

            match decision {
                RetryDecision::GiveUp { reason } => {
                    warn!(
                        target = %target.name,
                        attempt = number,
                        error = %error,
                        reason = %reason,
                        "upload failed"
                    );
                    return Delivery {
                        attempts,
                        error: Some(error),
                    };
                }
                RetryDecision::Retry { delay, reason } => {
                    warn!(
                        target = %target.name,
                        attempt = number,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "{reason}"
                    );
                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = self.sleeper.sleep(delay) => false,
                    };
                    if cancelled {
                        info!(target = %target.name, "cancelled during backoff");
                        return Delivery {
                            attempts,
                            error: Some(UploadError::Cancelled),
                        };
                    }
                    backoff = delay;
                }
            }
        }
    }

    fn start_attempt(
        &self,
        target: &Target,
        hash: ContentHash,
        number: u32,
        backoff: Duration,
    ) -> UploadAttempt {
        UploadAttempt::start(
            self.ids.generate_attempt_id(),
            target.name.as_str(),
            hash,
            number,
            backoff,
            self.clock.now(),
        )
    }

    /// One HEAD / PUT / verify cycle. `Ok(true)` when nothing had to be written.
    async fn try_once(
        &self,
        artifact: &Artifact,
        target: &Target,
        credential: &Credential,
    ) -> Result<bool, TryError> {
        let destination = &target.destination;
        let expected = ObjectMeta {
            content_hash: artifact.content_hash(),
            size: artifact.len() as u64,
        };

        match self.store.head(destination, credential).await? {
            Some(existing) if existing.content_hash == expected.content_hash => {
                debug!(target = %target.name, "object already present");
                return Ok(true);
            }
            Some(existing) => debug!(
                target = %target.name,
                previous = %existing.content_hash.short(),
                "replacing existing object"
            ),
            None => {}
        }

        self.store
            .put(destination, artifact.content(), &expected, credential)
            .await?;

        match self.store.head(destination, credential).await? {
            Some(stored) if stored.content_hash == expected.content_hash => Ok(false),
            other => Err(TryError::Mismatch {
                expected: expected.content_hash,
                found: other.map(|m| m.content_hash),
            }),
        }
    }
}
