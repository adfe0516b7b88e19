//! Run requests and the dispatcher that executes them.
//!
//! Schedules and sensors never run jobs themselves. They submit a
//! `RunRequest` through a `JobLauncher`; the `RunDispatcher` service drains
//! the queue and hands each request to the `JobExecutor` on its own task.
//!
//! Requests still queued at shutdown are written to the state store and
//! started by the next dispatcher, so a sensor wave whose cursor was already
//! advanced is never dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use floe_core::emit;
use floe_core::metrics::events::RunRequested;

use crate::error::DispatchError;
use crate::executor::{JobExecutor, RunResult};
use crate::graph::JobKey;

/// What caused a run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunReason {
    Schedule {
        schedule: String,
        scheduled_for: DateTime<Utc>,
    },
    Sensor {
        sensor: String,
    },
    Manual,
}

/// A request to run one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub job: JobKey,
    pub reason: RunReason,
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(job: JobKey, reason: RunReason) -> Self {
        Self {
            job,
            reason,
            requested_at: Utc::now(),
        }
    }

    /// Metric label for the request's origin.
    pub fn origin(&self) -> &'static str {
        match self.reason {
            RunReason::Schedule { .. } => "schedule",
            RunReason::Sensor { .. } => "sensor",
            RunReason::Manual => "manual",
        }
    }
}

/// Accepts run requests.
pub trait JobLauncher: Send + Sync {
    fn submit(&self, request: RunRequest) -> Result<(), DispatchError>;
}

/// Sending half of the run queue.
#[derive(Debug, Clone)]
pub struct RunQueue {
    tx: mpsc::UnboundedSender<RunRequest>,
}

impl RunQueue {
    /// Create a queue and the receiver the dispatcher drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobLauncher for RunQueue {
    fn submit(&self, request: RunRequest) -> Result<(), DispatchError> {
        let job = request.job.to_string();
        let origin = request.origin();
        self.tx
            .send(request)
            .map_err(|_| DispatchError::QueueClosed { job: job.clone() })?;
        emit!(RunRequested { job, origin });
        Ok(())
    }
}

/// Executes queued run requests until shutdown.
pub struct RunDispatcher {
    executor: Arc<JobExecutor>,
    requests: mpsc::UnboundedReceiver<RunRequest>,
    shutdown: CancellationToken,
}

impl RunDispatcher {
    pub fn new(
        executor: Arc<JobExecutor>,
        requests: mpsc::UnboundedReceiver<RunRequest>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            executor,
            requests,
            shutdown,
        }
    }

    /// Drain the queue. On shutdown, in-flight runs observe the cancelled
    /// token and are awaited before returning; requests not yet started are
    /// persisted for the next start.
    pub async fn run(mut self) {
        let mut runs: JoinSet<()> = JoinSet::new();
        self.replay_pending(&mut runs).await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(finished) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Job run task panicked");
                    }
                }

                request = self.requests.recv() => {
                    let Some(request) = request else {
                        info!("Run queue closed");
                        break;
                    };
                    self.spawn(&mut runs, request);
                }
            }
        }

        self.requests.close();
        self.persist_queued().await;

        if !runs.is_empty() {
            info!(in_flight = runs.len(), "Waiting for in-flight job runs");
        }
        while let Some(finished) = runs.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Job run task panicked");
            }
        }
    }

    /// Start the requests a previous dispatcher left in the state store.
    async fn replay_pending(&self, runs: &mut JoinSet<()>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let state = self.executor.state();
        let pending = match state.pending_runs().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read pending run requests");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        // Cleared first: a request must not start twice.
        if let Err(e) = state.save_pending_runs(&[]).await {
            error!(
                error = %e,
                count = pending.len(),
                "Failed to clear pending run requests, not replaying"
            );
            return;
        }

        info!(count = pending.len(), "Replaying run requests left from the last shutdown");
        for request in pending {
            self.spawn(runs, request);
        }
    }

    /// Move requests still in the closed queue to the state store.
    async fn persist_queued(&mut self) {
        let mut queued = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            queued.push(request);
        }
        if queued.is_empty() {
            return;
        }

        let state = self.executor.state();
        let saved = match state.pending_runs().await {
            Ok(mut pending) => {
                pending.extend(queued.iter().cloned());
                state.save_pending_runs(&pending).await
            }
            Err(e) => Err(e),
        };

        match saved {
            Ok(()) => {
                for request in &queued {
                    warn!(
                        job = %request.job,
                        origin = request.origin(),
                        "Run request not started before shutdown, kept for next start"
                    );
                }
            }
            Err(e) => {
                for request in &queued {
                    error!(
                        job = %request.job,
                        origin = request.origin(),
                        error = %e,
                        "Run request lost at shutdown"
                    );
                }
            }
        }
    }

    fn spawn(&self, runs: &mut JoinSet<()>, request: RunRequest) {
        let executor = self.executor.clone();
        let shutdown = self.shutdown.clone();
        info!(job = %request.job, origin = request.origin(), "Dispatching job run");

        runs.spawn(async move {
            match executor.run(&request.job, &shutdown).await {
                Ok(result) => log_result(&request, &result),
                Err(e) => error!(job = %request.job, error = %e, "Job run could not start"),
            }
        });
    }
}

fn log_result(request: &RunRequest, result: &RunResult) {
    if result.is_success() {
        info!(
            job = %request.job,
            run_id = %result.run_id,
            origin = request.origin(),
            "Job run succeeded"
        );
    } else {
        let failed: Vec<String> = result.failed.iter().map(ToString::to_string).collect();
        warn!(
            job = %request.job,
            run_id = %result.run_id,
            origin = request.origin(),
            failed = %failed.join(", "),
            "Job run had failed assets"
        );
    }
}
