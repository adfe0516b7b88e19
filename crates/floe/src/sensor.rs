//! Completion sensor.
//!
//! Watches a set of assets and requests one run of a downstream job each
//! time every one of them has materialized again since the sensor last
//! fired. The cursor stores, per monitored asset, the sequence of the
//! materialization already consumed. It is persisted before the request is
//! submitted, so repeated evaluations of the same wave never fire twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{SensorEvaluated, SensorResultType};
use floe_core::{IterationResult, PollingProcessor, run_polling_loop};

use crate::dispatch::{JobLauncher, RunReason, RunRequest};
use crate::error::{LaunchSnafu, SensorError, SensorStateSnafu};
use crate::graph::{AssetKey, JobKey};
use crate::state::{AssetStatus, SensorCursor, StateStore};

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvaluation {
    /// Every monitored asset had a new materialization; one run was requested.
    Fired { request: RunRequest },
    /// At least one monitored asset has nothing new.
    Idle { waiting_on: Vec<AssetKey> },
}

pub struct CompletionSensor {
    name: String,
    monitored: Vec<AssetKey>,
    job: JobKey,
    state: Arc<dyn StateStore>,
    launcher: Arc<dyn JobLauncher>,
    // Serializes evaluations so two ticks cannot both read the old cursor.
    guard: Mutex<()>,
}

impl CompletionSensor {
    pub fn new(
        name: impl Into<String>,
        monitored: Vec<AssetKey>,
        job: JobKey,
        state: Arc<dyn StateStore>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            name: name.into(),
            monitored,
            job,
            state,
            launcher,
            guard: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn monitored(&self) -> &[AssetKey] {
        &self.monitored
    }

    /// Evaluate once and fire if the wave is complete.
    pub async fn evaluate(&self) -> Result<SensorEvaluation, SensorError> {
        let _guard = self.guard.lock().await;

        let cursor = self
            .state
            .sensor_cursor(&self.name)
            .await
            .context(SensorStateSnafu { sensor: &self.name })?;

        let mut advanced = cursor.clone();
        let mut waiting_on = Vec::new();
        for asset in &self.monitored {
            let record = self
                .state
                .asset(asset)
                .await
                .context(SensorStateSnafu { sensor: &self.name })?;

            let sequence = record
                .filter(|r| r.status == AssetStatus::Succeeded)
                .and_then(|r| r.last_materialization)
                .map(|mark| mark.sequence);

            match sequence {
                Some(seq) if cursor.get(asset).is_none_or(|consumed| seq > *consumed) => {
                    advanced.insert(asset.clone(), seq);
                }
                _ => waiting_on.push(asset.clone()),
            }
        }

        if !waiting_on.is_empty() {
            debug!(sensor = %self.name, waiting = waiting_on.len(), "Sensor idle");
            return Ok(SensorEvaluation::Idle { waiting_on });
        }

        self.state
            .save_sensor_cursor(&self.name, &advanced)
            .await
            .context(SensorStateSnafu { sensor: &self.name })?;

        let request = RunRequest::new(
            self.job.clone(),
            RunReason::Sensor {
                sensor: self.name.clone(),
            },
        );
        if let Err(source) = self.launcher.submit(request.clone()) {
            self.restore(&cursor).await;
            return Err(source).context(LaunchSnafu { sensor: &self.name });
        }

        info!(sensor = %self.name, job = %self.job, "Sensor fired");
        Ok(SensorEvaluation::Fired { request })
    }

    /// Put back the previous cursor after a failed submit.
    async fn restore(&self, cursor: &SensorCursor) {
        if let Err(e) = self.state.save_sensor_cursor(&self.name, cursor).await {
            error!(sensor = %self.name, error = %e, "Failed to restore sensor cursor");
        }
    }
}

/// Polls a `CompletionSensor` on a fixed interval.
pub struct SensorService {
    sensor: CompletionSensor,
    interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
}

impl SensorService {
    pub fn new(
        sensor: CompletionSensor,
        interval: Duration,
        poll_jitter_secs: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sensor,
            interval,
            poll_jitter_secs,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        self.sensor.name()
    }

    pub async fn run(mut self) -> Result<(), SensorError> {
        info!(
            sensor = %self.sensor.name,
            job = %self.sensor.job,
            monitored = self.sensor.monitored.len(),
            interval_secs = self.interval.as_secs(),
            "Sensor started"
        );
        let name = self.sensor.name.clone();
        let interval = self.interval;
        let jitter = self.poll_jitter_secs;
        let shutdown = self.shutdown.clone();
        run_polling_loop(&mut self, interval, jitter, shutdown, &name, "sensor").await
    }
}

#[async_trait]
impl PollingProcessor for SensorService {
    type State = ();
    type Error = SensorError;

    async fn prepare(&mut self, _cold_start: bool) -> Result<Option<()>, SensorError> {
        Ok(Some(()))
    }

    async fn process(&mut self, _state: ()) -> Result<IterationResult, SensorError> {
        let (result, iteration) = match self.sensor.evaluate().await {
            Ok(SensorEvaluation::Fired { .. }) => {
                (SensorResultType::Fired, IterationResult::ProcessedItems)
            }
            Ok(SensorEvaluation::Idle { .. }) => (SensorResultType::Idle, IterationResult::NoItems),
            // A failed tick does not stop the sensor; the next tick retries.
            Err(e) => {
                warn!(sensor = %self.sensor.name, error = %e, "Sensor evaluation failed");
                (SensorResultType::Error, IterationResult::NoItems)
            }
        };
        emit!(SensorEvaluated {
            sensor: self.sensor.name.clone(),
            result,
        });
        Ok(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::state::MemoryStateStore;

    #[derive(Default)]
    struct Recorder {
        requests: std::sync::Mutex<Vec<RunRequest>>,
        closed: bool,
    }

    impl JobLauncher for Recorder {
        fn submit(&self, request: RunRequest) -> Result<(), DispatchError> {
            if self.closed {
                return Err(DispatchError::QueueClosed {
                    job: request.job.to_string(),
                });
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn keys() -> Vec<AssetKey> {
        vec![
            AssetKey::new("loans"),
            AssetKey::new("customers"),
            AssetKey::new("locations"),
        ]
    }

    fn build_sensor(state: Arc<MemoryStateStore>, recorder: Arc<Recorder>) -> CompletionSensor {
        CompletionSensor::new("ingest_complete", keys(), JobKey::new("transform"), state, recorder)
    }

    async fn succeed(state: &MemoryStateStore, name: &str) {
        state.mark_succeeded(&AssetKey::new(name), "run").await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_wave_does_not_fire() {
        let state = Arc::new(MemoryStateStore::new());
        let recorder = Arc::new(Recorder::default());
        let sensor = build_sensor(state.clone(), recorder.clone());

        succeed(&state, "loans").await;
        succeed(&state, "customers").await;

        let evaluation = sensor.evaluate().await.unwrap();
        assert_eq!(
            evaluation,
            SensorEvaluation::Idle {
                waiting_on: vec![AssetKey::new("locations")]
            }
        );
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_wave_fires_once_across_ticks() {
        let state = Arc::new(MemoryStateStore::new());
        let recorder = Arc::new(Recorder::default());
        let sensor = build_sensor(state.clone(), recorder.clone());

        for name in ["loans", "customers", "locations"] {
            succeed(&state, name).await;
        }

        let mut fired = 0;
        for _ in 0..5 {
            if let SensorEvaluation::Fired { .. } = sensor.evaluate().await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job, JobKey::new("transform"));
    }

    #[tokio::test]
    async fn test_next_wave_needs_every_asset_again() {
        let state = Arc::new(MemoryStateStore::new());
        let recorder = Arc::new(Recorder::default());
        let sensor = build_sensor(state.clone(), recorder.clone());

        for name in ["loans", "customers", "locations"] {
            succeed(&state, name).await;
        }
        sensor.evaluate().await.unwrap();

        // Only loans re-materializes: no new wave.
        succeed(&state, "loans").await;
        assert!(matches!(
            sensor.evaluate().await.unwrap(),
            SensorEvaluation::Idle { .. }
        ));

        succeed(&state, "customers").await;
        succeed(&state, "locations").await;
        assert!(matches!(
            sensor.evaluate().await.unwrap(),
            SensorEvaluation::Fired { .. }
        ));
        assert_eq!(recorder.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_asset_is_not_ready() {
        let state = Arc::new(MemoryStateStore::new());
        let recorder = Arc::new(Recorder::default());
        let sensor = build_sensor(state.clone(), recorder.clone());

        for name in ["loans", "customers", "locations"] {
            succeed(&state, name).await;
        }
        state
            .mark_failed(&AssetKey::new("locations"), "run", "boom")
            .await
            .unwrap();

        assert!(matches!(
            sensor.evaluate().await.unwrap(),
            SensorEvaluation::Idle { .. }
        ));

        succeed(&state, "locations").await;
        assert!(matches!(
            sensor.evaluate().await.unwrap(),
            SensorEvaluation::Fired { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_fire_once() {
        let state = Arc::new(MemoryStateStore::new());
        let recorder = Arc::new(Recorder::default());
        let sensor = Arc::new(build_sensor(state.clone(), recorder.clone()));

        for name in ["loans", "customers", "locations"] {
            succeed(&state, name).await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sensor = sensor.clone();
            handles.push(tokio::spawn(async move { sensor.evaluate().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(recorder.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_submit_keeps_wave_pending() {
        let state = Arc::new(MemoryStateStore::new());
        let closed = Arc::new(Recorder {
            closed: true,
            ..Recorder::default()
        });
        let sensor = build_sensor(state.clone(), closed);

        for name in ["loans", "customers", "locations"] {
            succeed(&state, name).await;
        }
        let err = sensor.evaluate().await.unwrap_err();
        assert!(matches!(err, SensorError::Launch { .. }));
        assert!(state.sensor_cursor("ingest_complete").await.unwrap().is_empty());

        let recorder = Arc::new(Recorder::default());
        let retry = build_sensor(state.clone(), recorder.clone());
        assert!(matches!(
            retry.evaluate().await.unwrap(),
            SensorEvaluation::Fired { .. }
        ));
    }
}
