//! Error classification shared by every component.
//!
//! Each concern has its own `thiserror` enum (archive, plan, upload, store, ...);
//! all of them map onto one `ErrorKind` so callers can decide between
//! "retry", "stop this target" and "stop the run" without matching every enum.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operational classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad archive inputs. Fatal for the run, never retried.
    InvalidInput,
    /// Target resolution failed (cycle, nothing matched).
    Resolution,
    /// Worth retrying (network, throttling).
    Transient,
    /// Retrying cannot help (credentials, permissions, validation).
    Permanent,
    /// The caller asked us to stop.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Terminal error of an upload attempt, as recorded in the run report.
///
/// Only the message survives; credential material must never end up here.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum UploadError {
    #[error("transient failure: {0}")]
    TransientFailure(String),

    #[error("permanent failure: {0}")]
    PermanentFailure(String),

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::TransientFailure(_) => ErrorKind::Transient,
            UploadError::PermanentFailure(_) => ErrorKind::Permanent,
            UploadError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
