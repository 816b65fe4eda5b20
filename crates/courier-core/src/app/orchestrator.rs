//! Orchestrator - trigger 1 件を run 1 件として最後まで実行する
//!
//! # 流れ
//! 1. Packing: ソースを 1 回だけ pack
//! 2. Resolve: trigger に合う target を依存レベルに並べる
//! 3. Uploading: レベル順に実行、同一レベル内は worker_limit 個まで並行
//! 4. 集計: target ごとの結果から run の終端状態を決める
//!
//! # 設計原則
//! - 失敗した target の依存先は uploader を呼ばずに `blocked`
//! - cancel 後に未開始の target は `cancelled`（成功済みは巻き戻さない）
//! - 完了報告は `Arc<tokio::sync::Mutex<_>>` の collector に集めて直列化

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::archive::{ArchiveError, Archiver, SourceFile, collect_sources};
use crate::cancel::CancelSignal;
use crate::domain::{
    Artifact, DeploymentRun, ErrorKind, RunReport, RunState, Target, TargetOutcome, TargetReport,
    TriggerContext, UploadAttempt, UploadError,
};
use crate::plan::{Plan, ResolveError, TargetResolver};
use crate::ports::{Clock, IdGenerator};
use crate::upload::{Delivery, Uploader};

/// Completion of one target, as handed to the collector.
struct Completed {
    report: TargetReport,
    attempts: Vec<UploadAttempt>,
}

/// Runs deployments. Build it with [`OrchestratorBuilder`](super::OrchestratorBuilder).
pub struct Orchestrator {
    pub(super) archiver: Archiver,
    pub(super) resolver: TargetResolver,
    pub(super) uploader: Arc<Uploader>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) worker_limit: usize,
    pub(super) strict: bool,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("targets", &self.resolver.targets().count())
            .field("retry", self.uploader.policy())
            .field("worker_limit", &self.worker_limit)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    /// Resolve the plan for `trigger` without packing or uploading.
    pub fn plan(&self, trigger: &TriggerContext) -> Result<Plan, ResolveError> {
        self.resolver.resolve_plan(trigger)
    }

    /// Run a deployment of `files`.
    pub async fn run(
        &self,
        trigger: TriggerContext,
        files: &[SourceFile],
        cancel: &CancelSignal,
    ) -> RunReport {
        let files = files.to_vec();
        self.execute(trigger, cancel, move || Ok(files)).await
    }

    /// Run a deployment of the files under `root` matching `include`.
    ///
    /// Collection happens inside the packing step, so unreadable sources fail
    /// the run like any other packing error.
    pub async fn run_from_dir(
        &self,
        trigger: TriggerContext,
        root: &Path,
        include: &[String],
        cancel: &CancelSignal,
    ) -> RunReport {
        let root = root.to_path_buf();
        let include = include.to_vec();
        self.execute(trigger, cancel, move || collect_sources(&root, &include))
            .await
    }

    /// Collect and compress on the blocking pool.
    async fn pack(
        &self,
        sources: impl FnOnce() -> Result<Vec<SourceFile>, ArchiveError> + Send + 'static,
    ) -> Result<Artifact, (ErrorKind, String)> {
        let archiver = self.archiver.clone();
        match tokio::task::spawn_blocking(move || sources().and_then(|files| archiver.pack(&files)))
            .await
        {
            Ok(Ok(artifact)) => Ok(artifact),
            Ok(Err(e)) => Err((e.kind(), e.to_string())),
            Err(e) => Err((ErrorKind::Permanent, format!("packing task failed: {e}"))),
        }
    }

    async fn execute<F>(&self, trigger: TriggerContext, cancel: &CancelSignal, sources: F) -> RunReport
    where
        F: FnOnce() -> Result<Vec<SourceFile>, ArchiveError> + Send + 'static,
    {
        let mut run = DeploymentRun::new(self.ids.generate_run_id(), trigger, self.clock.now());
        let span = info_span!(
            "run",
            run_id = %run.run_id,
            branch = %run.trigger.branch,
            commit = %run.trigger.commit_sha,
        );

        async {
            info!("deployment started");
            run.transition(RunState::Packing, self.clock.now());

            let artifact = match self.pack(sources).await {
                Ok(artifact) => Arc::new(artifact),
                Err((kind, message)) => {
                    error!(error = %message, "packing failed");
                    run.fail(kind, message, self.clock.now());
                    return run.report();
                }
            };
            run.artifact_hash = Some(artifact.content_hash());

            let plan = match self.resolver.resolve_plan(&run.trigger) {
                Ok(plan) => plan,
                Err(e @ ResolveError::NoTargetsMatched { .. }) if !self.strict => {
                    info!(reason = %e, "nothing to deploy");
                    run.finish(self.clock.now());
                    return run.report();
                }
                Err(e) => {
                    error!(error = %e, "target resolution failed");
                    run.fail(e.kind(), e.to_string(), self.clock.now());
                    return run.report();
                }
            };

            run.transition(RunState::Uploading, self.clock.now());
            self.upload_levels(&mut run, &plan, artifact, cancel).await;
            run.finish(self.clock.now());

            let succeeded = run
                .targets
                .iter()
                .filter(|t| t.outcome == TargetOutcome::Succeeded)
                .count();
            info!(
                state = ?run.state,
                succeeded,
                targets = run.targets.len(),
                attempts = run.attempts.len(),
                "deployment finished"
            );
            run.report()
        }
        .instrument(span)
        .await
    }

    async fn upload_levels(
        &self,
        run: &mut DeploymentRun,
        plan: &Plan,
        artifact: Arc<Artifact>,
        cancel: &CancelSignal,
    ) {
        let permits = Arc::new(Semaphore::new(self.worker_limit));
        // dependencies outside the plan never succeed in this run
        let mut not_succeeded: HashSet<String> = plan.unselected().iter().cloned().collect();

        for (depth, level) in plan.levels().iter().enumerate() {
            debug!(level = depth, targets = level.len(), "starting level");
            let collector: Arc<Mutex<Vec<Completed>>> = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();

            for target in level {
                let blocked_by: Vec<String> = target
                    .depends_on
                    .iter()
                    .filter(|dep| not_succeeded.contains(dep.as_str()))
                    .cloned()
                    .collect();

                if cancel.is_cancelled() {
                    collector.lock().await.push(Completed {
                        report: idle_report(target, TargetOutcome::Cancelled, Vec::new()),
                        attempts: Vec::new(),
                    });
                    continue;
                }
                if !blocked_by.is_empty() {
                    warn!(target = %target.name, blocked_by = ?blocked_by, "target blocked");
                    collector.lock().await.push(Completed {
                        report: idle_report(target, TargetOutcome::Blocked, blocked_by),
                        attempts: Vec::new(),
                    });
                    continue;
                }

                let handle = tokio::spawn(deliver(
                    self.uploader.clone(),
                    permits.clone(),
                    artifact.clone(),
                    target.clone(),
                    cancel.clone(),
                    collector.clone(),
                ));
                handles.push((target, handle));
            }

            for (target, handle) in handles {
                if let Err(e) = handle.await {
                    error!(target = %target.name, error = %e, "upload task aborted");
                    let mut report = idle_report(target, TargetOutcome::Failed, Vec::new());
                    report.error = Some(UploadError::PermanentFailure(format!(
                        "upload task aborted: {e}"
                    )));
                    collector.lock().await.push(Completed {
                        report,
                        attempts: Vec::new(),
                    });
                }
            }

            let mut completed = std::mem::take(&mut *collector.lock().await);
            // report in plan order, not completion order
            completed.sort_by_key(|c| {
                level
                    .iter()
                    .position(|t| t.name == c.report.name)
                    .unwrap_or(usize::MAX)
            });
            for c in completed {
                if c.report.outcome != TargetOutcome::Succeeded {
                    not_succeeded.insert(c.report.name.clone());
                }
                run.attempts.extend(c.attempts);
                run.targets.push(c.report);
            }
            run.updated_at = self.clock.now();
        }
    }
}

/// One spawned upload: wait for a worker slot, deliver, report.
async fn deliver(
    uploader: Arc<Uploader>,
    permits: Arc<Semaphore>,
    artifact: Arc<Artifact>,
    target: Target,
    cancel: CancelSignal,
    collector: Arc<Mutex<Vec<Completed>>>,
) {
    let completed = match permits.acquire_owned().await {
        Ok(_permit) if cancel.is_cancelled() => Completed {
            report: idle_report(&target, TargetOutcome::Cancelled, Vec::new()),
            attempts: Vec::new(),
        },
        Ok(_permit) => {
            let delivery = uploader.upload(&artifact, &target, &cancel).await;
            completed_from(&target, delivery)
        }
        Err(_) => Completed {
            report: idle_report(&target, TargetOutcome::Cancelled, Vec::new()),
            attempts: Vec::new(),
        },
    };
    collector.lock().await.push(completed);
}

fn completed_from(target: &Target, delivery: Delivery) -> Completed {
    let outcome = match delivery.error() {
        None => TargetOutcome::Succeeded,
        Some(UploadError::Cancelled) => TargetOutcome::Cancelled,
        Some(_) => TargetOutcome::Failed,
    };
    let report = TargetReport {
        name: target.name.clone(),
        destination: target.destination.clone(),
        outcome,
        attempts: delivery.attempt_count(),
        already_present: delivery.already_present(),
        error: delivery.error().cloned(),
        blocked_by: Vec::new(),
    };
    Completed {
        report,
        attempts: delivery.into_attempts(),
    }
}

/// Report for a target the uploader never touched.
fn idle_report(target: &Target, outcome: TargetOutcome, blocked_by: Vec<String>) -> TargetReport {
    TargetReport {
        name: target.name.clone(),
        destination: target.destination.clone(),
        outcome,
        attempts: 0,
        already_present: false,
        error: (outcome == TargetOutcome::Cancelled).then_some(UploadError::Cancelled),
        blocked_by,
    }
}
