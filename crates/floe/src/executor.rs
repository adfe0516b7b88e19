//! Job execution.
//!
//! A run walks the job plan in topological order. Each asset starts once all
//! of its in-job dependencies succeeded; independent assets run concurrently
//! on tokio tasks, bounded by the optional global semaphore. A failure skips
//! the failed asset's dependents but lets unrelated assets finish.
//!
//! Runs of the same job are serialized: a second run waits for the first.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use snafu::ResultExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{AssetCompleted, AssetDuration, AssetOutcomeType, JobRunCompleted};

use crate::action::{AssetAction, AssetContext, MaterializeOutput};
use crate::error::{AssetError, ExecutorError, PlanSnafu, RunStateSnafu};
use crate::graph::{AssetGraph, AssetKey, JobKey, PlanStep};
use crate::state::{AssetStatus, MaterializationMark, StateStore};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn new_run_id(job: &JobKey) -> String {
    format!(
        "{job}-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Why an asset was not attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// An in-job dependency failed.
    UpstreamFailed { upstream: AssetKey },
    /// An in-job dependency was itself skipped.
    UpstreamSkipped { upstream: AssetKey },
    /// A dependency outside the job has never been materialized.
    ExternalDependencyNotMaterialized { dependency: AssetKey },
    /// The run was cancelled before the asset started.
    RunCancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UpstreamFailed { upstream } => write!(f, "upstream '{upstream}' failed"),
            SkipReason::UpstreamSkipped { upstream } => write!(f, "upstream '{upstream}' skipped"),
            SkipReason::ExternalDependencyNotMaterialized { dependency } => {
                write!(f, "dependency '{dependency}' is not materialized")
            }
            SkipReason::RunCancelled => write!(f, "run cancelled"),
        }
    }
}

/// Outcome of one asset in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    Succeeded {
        output: MaterializeOutput,
        mark: MaterializationMark,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl AssetOutcome {
    fn kind(&self) -> AssetOutcomeType {
        match self {
            AssetOutcome::Succeeded { .. } => AssetOutcomeType::Succeeded,
            AssetOutcome::Failed { .. } => AssetOutcomeType::Failed,
            AssetOutcome::Skipped { .. } => AssetOutcomeType::Skipped,
        }
    }
}

/// Result of one job run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub job: JobKey,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub succeeded: BTreeSet<AssetKey>,
    pub failed: BTreeSet<AssetKey>,
    pub skipped: BTreeSet<AssetKey>,
    pub reports: BTreeMap<AssetKey, AssetOutcome>,
}

impl RunResult {
    /// A run is successful when no asset failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn outcome(&self, key: &AssetKey) -> Option<&AssetOutcome> {
        self.reports.get(key)
    }
}

type TaskOutput = (AssetKey, Result<MaterializeOutput, AssetError>, Duration);

/// Runs jobs of one asset graph against a state store.
pub struct JobExecutor {
    graph: Arc<AssetGraph>,
    state: Arc<dyn StateStore>,
    semaphore: Option<Arc<Semaphore>>,
    job_locks: DashMap<JobKey, Arc<Mutex<()>>>,
}

impl JobExecutor {
    pub fn new(
        graph: Arc<AssetGraph>,
        state: Arc<dyn StateStore>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            graph,
            state,
            semaphore,
            job_locks: DashMap::new(),
        }
    }

    pub fn graph(&self) -> &Arc<AssetGraph> {
        &self.graph
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Run `job` to completion.
    ///
    /// Fails only if the job is unknown or its initial state cannot be
    /// recorded. Asset failures are reported in the `RunResult`.
    pub async fn run(
        &self,
        job: &JobKey,
        shutdown: &CancellationToken,
    ) -> Result<RunResult, ExecutorError> {
        let plan = self.graph.job_plan(job).context(PlanSnafu)?;

        let lock = self.job_locks.entry(job.clone()).or_default().clone();
        let _guard = lock.lock().await;

        let run_id = new_run_id(job);
        let started_at = Utc::now();
        let start = Instant::now();
        info!(job = %job, run_id = %run_id, assets = plan.steps.len(), "Starting job run");

        for step in &plan.steps {
            self.state
                .set_status(&step.asset, AssetStatus::Pending, &run_id)
                .await
                .context(RunStateSnafu)?;
        }

        let mut run = RunState::default();
        let mut pending: Vec<PlanStep> = plan.steps;
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut task_assets: HashMap<Id, AssetKey> = HashMap::new();

        loop {
            if shutdown.is_cancelled() {
                for step in pending.drain(..) {
                    run.skip(step.asset, SkipReason::RunCancelled);
                }
            } else {
                let mut waiting = Vec::with_capacity(pending.len());
                for step in pending.drain(..) {
                    match self.readiness(&step, &run).await {
                        Readiness::Wait => waiting.push(step),
                        Readiness::Skip(reason) => run.skip(step.asset, reason),
                        Readiness::Launch => {
                            let handle = self.launch(&mut tasks, &step.asset, &run_id, shutdown);
                            task_assets.insert(handle, step.asset.clone());
                            run.running.insert(step.asset);
                        }
                    }
                }
                pending = waiting;
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                // Nothing in flight: anything still waiting can never start.
                for step in pending.drain(..) {
                    let upstream = step.in_job.first().cloned().unwrap_or_else(|| step.asset.clone());
                    run.skip(step.asset, SkipReason::UpstreamSkipped { upstream });
                }
                break;
            };

            let (asset, result, duration) = match joined {
                Ok((id, output)) => {
                    task_assets.remove(&id);
                    output
                }
                Err(e) => {
                    let Some(asset) = task_assets.remove(&e.id()) else {
                        error!(error = %e, "Lost track of asset task");
                        continue;
                    };
                    let message = e.to_string();
                    (asset, Err(AssetError::Panicked { message }), Duration::ZERO)
                }
            };
            run.running.remove(&asset);

            emit!(AssetDuration {
                asset: asset.to_string(),
                duration,
            });
            self.record(&mut run, asset, result, &run_id, shutdown).await;
        }

        for (asset, outcome) in &run.reports {
            if let AssetOutcome::Skipped { reason } = outcome
                && let Err(e) = self
                    .state
                    .mark_skipped(asset, &run_id, &reason.to_string())
                    .await
            {
                error!(asset = %asset, error = %e, "Failed to record skipped asset");
            }
            emit!(AssetCompleted {
                asset: asset.to_string(),
                outcome: outcome.kind(),
            });
        }

        let result = run.finish(run_id, job.clone(), started_at, start.elapsed());
        emit!(JobRunCompleted {
            job: job.to_string(),
            failed: !result.is_success(),
            duration: result.duration,
        });
        info!(
            job = %job,
            run_id = %result.run_id,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            duration_ms = result.duration.as_millis(),
            "Job run finished"
        );
        Ok(result)
    }

    async fn readiness(&self, step: &PlanStep, run: &RunState) -> Readiness {
        for dep in &step.in_job {
            if run.failed.contains(dep) {
                return Readiness::Skip(SkipReason::UpstreamFailed {
                    upstream: dep.clone(),
                });
            }
            if run.skipped.contains(dep) {
                return Readiness::Skip(SkipReason::UpstreamSkipped {
                    upstream: dep.clone(),
                });
            }
        }
        if !step.in_job.iter().all(|dep| run.succeeded.contains(dep)) {
            return Readiness::Wait;
        }

        for dep in &step.external {
            let materialized = match self.state.asset(dep).await {
                Ok(record) => record.is_some_and(|r| r.is_materialized()),
                Err(e) => {
                    warn!(asset = %step.asset, dependency = %dep, error = %e, "Could not read dependency state");
                    false
                }
            };
            if !materialized {
                return Readiness::Skip(SkipReason::ExternalDependencyNotMaterialized {
                    dependency: dep.clone(),
                });
            }
        }
        Readiness::Launch
    }

    fn launch(
        &self,
        tasks: &mut JoinSet<TaskOutput>,
        asset: &AssetKey,
        run_id: &str,
        shutdown: &CancellationToken,
    ) -> Id {
        let action: Option<Arc<dyn AssetAction>> =
            self.graph.asset(asset).map(|node| node.action.clone());
        let state = self.state.clone();
        let semaphore = self.semaphore.clone();
        let ctx = AssetContext {
            asset: asset.clone(),
            run_id: run_id.to_string(),
            shutdown: shutdown.child_token(),
        };

        tasks
            .spawn(async move {
                let start = Instant::now();
                let result = materialize(action, state, semaphore, &ctx).await;
                (ctx.asset, result, start.elapsed())
            })
            .id()
    }

    /// Persist the outcome of a finished asset.
    async fn record(
        &self,
        run: &mut RunState,
        asset: AssetKey,
        result: Result<MaterializeOutput, AssetError>,
        run_id: &str,
        shutdown: &CancellationToken,
    ) {
        let error = match result {
            Ok(output) => match self.state.mark_succeeded(&asset, run_id).await {
                Ok(mark) => {
                    info!(asset = %asset, sequence = mark.sequence, "Asset materialized");
                    run.succeed(asset, output, mark);
                    return;
                }
                Err(e) => format!("materialized but state update failed: {e}"),
            },
            Err(_) if shutdown.is_cancelled() => AssetError::RunCancelled.to_string(),
            Err(e) => e.to_string(),
        };

        error!(asset = %asset, error = %error, "Asset failed");
        if let Err(e) = self.state.mark_failed(&asset, run_id, &error).await {
            error!(asset = %asset, error = %e, "Failed to record asset failure");
        }
        run.fail(asset, error);
    }
}

/// Body of an asset task: wait for a permit, mark running, run the action.
async fn materialize(
    action: Option<Arc<dyn AssetAction>>,
    state: Arc<dyn StateStore>,
    semaphore: Option<Arc<Semaphore>>,
    ctx: &AssetContext,
) -> Result<MaterializeOutput, AssetError> {
    let Some(action) = action else {
        return Err(AssetError::Panicked {
            message: format!("asset '{}' has no action", ctx.asset),
        });
    };

    let _permit = match semaphore {
        Some(semaphore) => {
            let acquired = ctx
                .shutdown
                .run_until_cancelled(semaphore.acquire_owned())
                .await;
            match acquired {
                Some(Ok(permit)) => Some(permit),
                Some(Err(_)) | None => return Err(AssetError::RunCancelled),
            }
        }
        None => None,
    };
    if ctx.shutdown.is_cancelled() {
        return Err(AssetError::RunCancelled);
    }

    state
        .set_status(&ctx.asset, AssetStatus::Running, &ctx.run_id)
        .await
        .map_err(|source| AssetError::AssetState { source })?;

    match AssertUnwindSafe(action.materialize(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AssetError::Panicked { message })
        }
    }
}

enum Readiness {
    Wait,
    Launch,
    Skip(SkipReason),
}

#[derive(Default)]
struct RunState {
    running: BTreeSet<AssetKey>,
    succeeded: BTreeSet<AssetKey>,
    failed: BTreeSet<AssetKey>,
    skipped: BTreeSet<AssetKey>,
    reports: BTreeMap<AssetKey, AssetOutcome>,
}

impl RunState {
    fn succeed(&mut self, asset: AssetKey, output: MaterializeOutput, mark: MaterializationMark) {
        self.succeeded.insert(asset.clone());
        self.reports
            .insert(asset, AssetOutcome::Succeeded { output, mark });
    }

    fn fail(&mut self, asset: AssetKey, error: String) {
        self.failed.insert(asset.clone());
        self.reports.insert(asset, AssetOutcome::Failed { error });
    }

    fn skip(&mut self, asset: AssetKey, reason: SkipReason) {
        info!(asset = %asset, reason = %reason, "Skipping asset");
        self.skipped.insert(asset.clone());
        self.reports.insert(asset, AssetOutcome::Skipped { reason });
    }

    fn finish(
        self,
        run_id: String,
        job: JobKey,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> RunResult {
        RunResult {
            run_id,
            job,
            started_at,
            duration,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            reports: self.reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Succeeds or fails on demand and tracks peak concurrency.
    struct TestAction {
        fail: bool,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AssetAction for TestAction {
        async fn materialize(&self, _ctx: &AssetContext) -> Result<MaterializeOutput, AssetError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(AssetError::Panicked {
                    message: "induced failure".to_string(),
                })
            } else {
                Ok(MaterializeOutput {
                    rows_written: 1,
                    ..MaterializeOutput::default()
                })
            }
        }
    }

    struct Fixture {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        builder: crate::graph::AssetGraphBuilder,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                builder: AssetGraph::builder(),
            }
        }

        fn asset(&mut self, name: &str, deps: &[&str], fail: bool) -> &mut Self {
            let action = TestAction {
                fail,
                delay: Duration::from_millis(20),
                active: self.active.clone(),
                peak: self.peak.clone(),
            };
            self.builder
                .define_asset(
                    AssetKey::new(name),
                    deps.iter().map(|d| AssetKey::new(*d)),
                    Arc::new(action),
                )
                .unwrap();
            self
        }

        fn job(&mut self, name: &str, assets: &[&str]) -> &mut Self {
            self.builder
                .define_job(JobKey::new(name), assets.iter().map(|a| AssetKey::new(*a)))
                .unwrap();
            self
        }

        fn executor(self, limit: Option<usize>) -> (JobExecutor, Arc<MemoryStateStore>) {
            let state = Arc::new(MemoryStateStore::new());
            let graph = Arc::new(self.builder.build().unwrap());
            let semaphore = limit.map(|n| Arc::new(Semaphore::new(n)));
            (JobExecutor::new(graph, state.clone(), semaphore), state)
        }
    }

    fn key(name: &str) -> AssetKey {
        AssetKey::new(name)
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let mut fixture = Fixture::new();
        fixture
            .asset("b", &[], true)
            .asset("a", &["b"], false)
            .asset("c", &["a"], false)
            .asset("other", &[], false)
            .job("j", &["a", "b", "c", "other"]);
        let (executor, state) = fixture.executor(None);

        let result = executor.run(&JobKey::new("j"), &CancellationToken::new()).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.failed, BTreeSet::from([key("b")]));
        assert_eq!(result.succeeded, BTreeSet::from([key("other")]));
        assert_eq!(result.skipped, BTreeSet::from([key("a"), key("c")]));
        assert_eq!(
            result.outcome(&key("a")),
            Some(&AssetOutcome::Skipped {
                reason: SkipReason::UpstreamFailed { upstream: key("b") }
            })
        );
        assert_eq!(
            result.outcome(&key("c")),
            Some(&AssetOutcome::Skipped {
                reason: SkipReason::UpstreamSkipped { upstream: key("a") }
            })
        );

        let b = state.asset(&key("b")).await.unwrap().unwrap();
        assert_eq!(b.status, AssetStatus::Failed);
        let a = state.asset(&key("a")).await.unwrap().unwrap();
        assert_eq!(a.status, AssetStatus::Skipped);
        assert_eq!(a.last_error.as_deref(), Some("upstream 'b' failed"));
        assert_eq!(a.last_run_id.as_deref(), Some(result.run_id.as_str()));
    }

    #[tokio::test]
    async fn test_external_dependency_must_be_materialized() {
        let mut fixture = Fixture::new();
        fixture
            .asset("loans", &[], false)
            .asset("transform", &["loans"], false)
            .job("ingest", &["loans"])
            .job("build", &["transform"]);
        let (executor, _state) = fixture.executor(None);
        let token = CancellationToken::new();

        let result = executor.run(&JobKey::new("build"), &token).await.unwrap();
        assert_eq!(result.skipped, BTreeSet::from([key("transform")]));
        assert!(result.is_success());

        executor.run(&JobKey::new("ingest"), &token).await.unwrap();
        let result = executor.run(&JobKey::new("build"), &token).await.unwrap();
        assert_eq!(result.succeeded, BTreeSet::from([key("transform")]));
    }

    #[tokio::test]
    async fn test_independent_assets_run_concurrently_within_limit() {
        let mut fixture = Fixture::new();
        for name in ["a", "b", "c", "d"] {
            fixture.asset(name, &[], false);
        }
        fixture.job("all", &["a", "b", "c", "d"]);
        let peak = fixture.peak.clone();
        let (executor, _state) = fixture.executor(Some(2));

        let result = executor.run(&JobKey::new("all"), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.succeeded.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_marks_are_monotonic() {
        let mut fixture = Fixture::new();
        fixture.asset("a", &[], false).asset("b", &["a"], false).job("j", &["a", "b"]);
        let (executor, _state) = fixture.executor(None);

        let result = executor.run(&JobKey::new("j"), &CancellationToken::new()).await.unwrap();
        let mark = |k: &str| match result.outcome(&key(k)) {
            Some(AssetOutcome::Succeeded { mark, .. }) => mark.sequence,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(mark("b") > mark("a"));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining() {
        let mut fixture = Fixture::new();
        fixture.asset("a", &[], false).asset("b", &["a"], false).job("j", &["a", "b"]);
        let (executor, _state) = fixture.executor(None);

        let token = CancellationToken::new();
        token.cancel();
        let result = executor.run(&JobKey::new("j"), &token).await.unwrap();

        assert_eq!(result.skipped, BTreeSet::from([key("a"), key("b")]));
        assert_eq!(
            result.outcome(&key("a")),
            Some(&AssetOutcome::Skipped {
                reason: SkipReason::RunCancelled
            })
        );
    }

    /// Runs until the run is cancelled, then exits like a killed command.
    struct UntilCancelled {
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl AssetAction for UntilCancelled {
        async fn materialize(&self, ctx: &AssetContext) -> Result<MaterializeOutput, AssetError> {
            self.started.notify_one();
            ctx.shutdown.cancelled().await;
            Err(AssetError::Command {
                command: "dbt build".to_string(),
                status: "signal: 9 (SIGKILL)".to_string(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_fails_in_flight_and_skips_rest() {
        let started = Arc::new(tokio::sync::Notify::new());
        let mut fixture = Fixture::new();
        fixture
            .builder
            .define_asset(
                key("a"),
                Vec::new(),
                Arc::new(UntilCancelled {
                    started: started.clone(),
                }),
            )
            .unwrap();
        fixture.asset("b", &["a"], false).job("j", &["a", "b"]);
        let (executor, state) = fixture.executor(None);
        let executor = Arc::new(executor);

        let token = CancellationToken::new();
        let run = {
            let executor = executor.clone();
            let token = token.clone();
            tokio::spawn(async move { executor.run(&JobKey::new("j"), &token).await })
        };
        started.notified().await;
        token.cancel();
        let result = run.await.unwrap().unwrap();

        assert_eq!(result.failed, BTreeSet::from([key("a")]));
        assert_eq!(result.skipped, BTreeSet::from([key("b")]));
        assert_eq!(
            result.outcome(&key("a")),
            Some(&AssetOutcome::Failed {
                error: AssetError::RunCancelled.to_string()
            })
        );
        assert_eq!(
            result.outcome(&key("b")),
            Some(&AssetOutcome::Skipped {
                reason: SkipReason::RunCancelled
            })
        );

        let a = state.asset(&key("a")).await.unwrap().unwrap();
        assert_eq!(a.status, AssetStatus::Failed);
        assert_eq!(a.last_error.as_deref(), Some("Run cancelled"));
        let b = state.asset(&key("b")).await.unwrap().unwrap();
        assert_eq!(b.status, AssetStatus::Skipped);
        assert_eq!(b.last_error.as_deref(), Some("run cancelled"));
    }

    #[tokio::test]
    async fn test_same_job_runs_are_serialized() {
        let mut fixture = Fixture::new();
        fixture.asset("a", &[], false).job("j", &["a"]);
        let peak = fixture.peak.clone();
        let (executor, _state) = fixture.executor(None);
        let executor = Arc::new(executor);
        let token = CancellationToken::new();

        let first = {
            let executor = executor.clone();
            let token = token.clone();
            tokio::spawn(async move { executor.run(&JobKey::new("j"), &token).await })
        };
        let second = executor.run(&JobKey::new("j"), &token).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.is_success() && second.is_success());
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (executor, _state) = Fixture::new().executor(None);
        let err = executor
            .run(&JobKey::new("nope"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Plan { .. }));
    }
}
