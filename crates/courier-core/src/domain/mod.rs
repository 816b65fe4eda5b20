//! Domain model (IDs, artifacts, targets, attempts, runs, errors).
//!
//! Pure data and state transitions only: no I/O, no async.

pub mod artifact;
pub mod attempt;
pub mod errors;
pub mod ids;
pub mod run;
pub mod target;
pub mod trigger;

pub use artifact::{Artifact, ContentHash, InvalidHash};
pub use attempt::{AttemptOutcome, UploadAttempt};
pub use errors::{ErrorKind, UploadError};
pub use ids::{AttemptId, RunId};
pub use run::{
    DeploymentRun, RunFailure, RunReport, RunState, TargetOutcome, TargetReport, aggregate_state,
};
pub use target::{CredentialRef, Destination, DestinationError, Target};
pub use trigger::TriggerContext;
