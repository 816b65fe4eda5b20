//! DeploymentRun record and status aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ContentHash;
use super::attempt::UploadAttempt;
use super::errors::{ErrorKind, UploadError};
use super::ids::RunId;
use super::target::Destination;
use super::trigger::TriggerContext;

/// Run state machine.
///
/// State transitions:
/// - Pending -> Packing -> Uploading -> Succeeded | PartiallyFailed | Failed
/// - Pending -> Packing -> Failed (packing or resolution failed)
/// - Pending -> Packing -> Succeeded (no targets matched, non-strict)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Packing,
    Uploading,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::PartiallyFailed | RunState::Failed
        )
    }

    /// Process exit code for the CLI: 0 / 1 / 2.
    pub fn exit_code(self) -> i32 {
        match self {
            RunState::Succeeded => 0,
            RunState::PartiallyFailed => 2,
            _ => 1,
        }
    }
}

/// Terminal outcome of one target within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    Succeeded,
    Failed,
    /// A dependency did not succeed; the uploader was never invoked.
    Blocked,
    Cancelled,
}

/// Serializable per-target result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub name: String,
    pub destination: Destination,
    pub outcome: TargetOutcome,

    /// Number of upload tries made (0 when blocked or cancelled before start).
    pub attempts: u32,

    #[serde(default)]
    pub already_present: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadError>,

    /// Dependencies that kept this target from running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

/// Why a run failed before any target ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// One end-to-end execution for one trigger.
///
/// Single source of truth while the run is in flight; the orchestrator owns it
/// and concurrent uploads report into it through the result collector.
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub run_id: RunId,
    pub trigger: TriggerContext,
    pub state: RunState,
    pub artifact_hash: Option<ContentHash>,
    pub targets: Vec<TargetReport>,
    pub attempts: Vec<UploadAttempt>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRun {
    pub fn new(run_id: RunId, trigger: TriggerContext, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            trigger,
            state: RunState::Pending,
            artifact_hash: None,
            targets: Vec::new(),
            attempts: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: RunState, now: DateTime<Utc>) {
        debug_assert!(!self.state.is_terminal(), "run already finished");
        self.state = state;
        self.updated_at = now;
    }

    /// Mark the run failed before uploads (packing / resolution).
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.failure = Some(RunFailure {
            kind,
            message: message.into(),
        });
        self.transition(RunState::Failed, now);
    }

    /// Settle the terminal state from target outcomes.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        let state = aggregate_state(&self.targets);
        self.transition(state, now);
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            branch: self.trigger.branch.clone(),
            commit_sha: self.trigger.commit_sha.clone(),
            environment: self.trigger.environment_override.clone(),
            state: self.state,
            artifact_hash: self.artifact_hash,
            failure: self.failure.clone(),
            targets: self.targets.clone(),
            attempts: self.attempts.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Aggregate target outcomes into a run state.
///
/// - no targets, or all succeeded: Succeeded
/// - none succeeded: Failed
/// - otherwise: PartiallyFailed
pub fn aggregate_state(targets: &[TargetReport]) -> RunState {
    let succeeded = targets
        .iter()
        .filter(|t| t.outcome == TargetOutcome::Succeeded)
        .count();

    if succeeded == targets.len() {
        RunState::Succeeded
    } else if succeeded == 0 {
        RunState::Failed
    } else {
        RunState::PartiallyFailed
    }
}

/// The structured result handed back to the top-level caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub branch: String,
    pub commit_sha: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    pub state: RunState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<ContentHash>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,

    pub targets: Vec<TargetReport>,
    pub attempts: Vec<UploadAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunReport {
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn attempts_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a UploadAttempt> + 'a {
        self.attempts.iter().filter(move |a| a.target == name)
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn report(name: &str, outcome: TargetOutcome) -> TargetReport {
        TargetReport {
            name: name.to_string(),
            destination: "mem://b/k".parse().unwrap(),
            outcome,
            attempts: 1,
            already_present: false,
            error: None,
            blocked_by: Vec::new(),
        }
    }

    #[test]
    fn empty_target_list_is_success() {
        assert_eq!(aggregate_state(&[]), RunState::Succeeded);
    }

    #[test]
    fn all_succeeded() {
        let ts = vec![
            report("a", TargetOutcome::Succeeded),
            report("b", TargetOutcome::Succeeded),
        ];
        assert_eq!(aggregate_state(&ts), RunState::Succeeded);
    }

    #[rstest]
    #[case::failed(TargetOutcome::Failed)]
    #[case::blocked(TargetOutcome::Blocked)]
    #[case::cancelled(TargetOutcome::Cancelled)]
    fn mixed_outcomes_are_partial(#[case] other: TargetOutcome) {
        let ts = vec![report("a", TargetOutcome::Succeeded), report("b", other)];
        assert_eq!(aggregate_state(&ts), RunState::PartiallyFailed);
    }

    #[test]
    fn nothing_succeeded_is_failed() {
        let ts = vec![
            report("staging", TargetOutcome::Failed),
            report("production", TargetOutcome::Blocked),
        ];
        assert_eq!(aggregate_state(&ts), RunState::Failed);
    }

    #[rstest]
    #[case(RunState::Succeeded, 0)]
    #[case(RunState::Failed, 1)]
    #[case(RunState::PartiallyFailed, 2)]
    fn exit_codes(#[case] state: RunState, #[case] code: i32) {
        assert_eq!(state.exit_code(), code);
    }

    #[test]
    fn run_moves_through_states() {
        let now = Utc::now();
        let mut run = DeploymentRun::new(
            RunId::from_ulid(Ulid::new()),
            TriggerContext::new("main", "abc123"),
            now,
        );
        assert_eq!(run.state, RunState::Pending);

        run.transition(RunState::Packing, now);
        run.transition(RunState::Uploading, now);
        run.targets.push(report("a", TargetOutcome::Succeeded));
        run.finish(now);

        assert_eq!(run.state, RunState::Succeeded);
        let r = run.report();
        assert_eq!(r.branch, "main");
        assert_eq!(r.exit_code(), 0);
        assert!(r.target("a").is_some());
    }

    #[test]
    fn failing_before_upload_keeps_reason() {
        let now = Utc::now();
        let mut run = DeploymentRun::new(
            RunId::from_ulid(Ulid::new()),
            TriggerContext::new("main", "abc123"),
            now,
        );
        run.transition(RunState::Packing, now);
        run.fail(ErrorKind::InvalidInput, "duplicate path: a.html", now);

        assert_eq!(run.state, RunState::Failed);
        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::InvalidInput);
        assert!(run.targets.is_empty());
    }
}
