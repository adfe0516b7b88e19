//! Cron schedules.
//!
//! Each schedule is its own service: it sleeps until the next cron instant,
//! submits one run request and repeats. Instants missed while the process
//! was down or busy are not backfilled.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use floe_core::emit;
use floe_core::metrics::events::ScheduleFired;

use crate::dispatch::{JobLauncher, RunReason, RunRequest};
use crate::error::SchedulerError;
use crate::graph::JobKey;

/// A parsed cron expression.
///
/// Accepts the classic five-field form (minute precision) as well as the
/// six- and seven-field forms with seconds and year.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First instant strictly after `from`.
    pub fn next_after(&self, from: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(from).next()
    }

    /// Next instant to fire given the current time and the last instant that
    /// fired. Never returns an instant at or before `last_fired`, and never
    /// one in the past.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let from = last_fired.map_or(now, |last| last.max(now));
        self.next_after(&from)
    }
}

/// Submits a run of `job` at every instant of `schedule`.
pub struct ScheduleService {
    name: String,
    job: JobKey,
    schedule: CronSchedule,
    launcher: Arc<dyn JobLauncher>,
    shutdown: CancellationToken,
}

impl ScheduleService {
    pub fn new(
        name: impl Into<String>,
        job: JobKey,
        schedule: CronSchedule,
        launcher: Arc<dyn JobLauncher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            job,
            schedule,
            launcher,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until shutdown. Fails only if the run queue is gone.
    pub async fn run(self) -> Result<(), SchedulerError> {
        info!(
            schedule = %self.name,
            job = %self.job,
            cron = %self.schedule.expression(),
            "Schedule started"
        );
        let mut last_fired = None;

        loop {
            let Some(next) = self.schedule.next_fire(Utc::now(), last_fired) else {
                info!(schedule = %self.name, "Cron expression has no further instants");
                return Ok(());
            };
            debug!(schedule = %self.name, next = %next, "Waiting for next instant");

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(wait))
                .await
                .is_none()
            {
                info!(schedule = %self.name, "Shutdown requested, schedule stopped");
                return Ok(());
            }

            emit!(ScheduleFired {
                schedule: self.name.clone(),
            });
            info!(schedule = %self.name, job = %self.job, instant = %next, "Schedule fired");

            let request = RunRequest::new(
                self.job.clone(),
                RunReason::Schedule {
                    schedule: self.name.clone(),
                    scheduled_for: next,
                },
            );
            self.launcher
                .submit(request)
                .map_err(|source| SchedulerError::Submit {
                    schedule: self.name.clone(),
                    source,
                })?;
            last_fired = Some(next);
        }
    }
}
