//! Generic polling loop trait and runner.
//!
//! Periodic evaluators (such as completion sensors) implement
//! `PollingProcessor` and are driven by `run_polling_loop`.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationDuration, IterationResultType};
use crate::topology::random_jitter;

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Work was done.
    ProcessedItems,
    /// Nothing to do this tick.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// A processor driven on a fixed interval.
#[async_trait]
pub trait PollingProcessor {
    /// State handed from `prepare` to `process`.
    type State: Send;
    type Error: std::error::Error + Send;

    /// Prepare one iteration. `None` means there is nothing to process.
    ///
    /// `cold_start` is true only for the first iteration.
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Drive `processor` until `shutdown` is cancelled or it returns an error.
///
/// Each iteration races against shutdown, emits iteration metrics labelled
/// with `service` and `name`, then sleeps for `poll_interval` plus up to
/// `poll_jitter_secs` of random jitter.
pub async fn run_polling_loop<P: PollingProcessor + Send>(
    processor: &mut P,
    poll_interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
    service: &'static str,
) -> Result<(), P::Error> {
    let mut cold_start = true;

    loop {
        let iteration_start = Instant::now();

        let prepared = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(target = name, "Shutdown requested during prepare");
                return Ok(());
            }

            result = processor.prepare(cold_start) => result?,
        };
        cold_start = false;

        let result = match prepared {
            Some(state) => tokio::select! {
                biased;

                _ = shutdown.cancelled() => IterationResult::Shutdown,

                result = processor.process(state) => result?,
            },
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => {
                info!(target = name, "Shutdown requested during processing");
                break;
            }
            IterationResult::NoItems => IterationResultType::NoItems,
            IterationResult::ProcessedItems => IterationResultType::Processed,
        };

        emit!(IterationCompleted {
            service,
            result: result_type,
            target: name.to_string(),
        });
        emit!(IterationDuration {
            service,
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });

        let sleep_duration = poll_interval + random_jitter(poll_jitter_secs);
        debug!(
            target = name,
            "Iteration complete, next poll in {}ms",
            sleep_duration.as_millis()
        );

        if shutdown
            .run_until_cancelled(tokio::time::sleep(sleep_duration))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    Ok(())
}
