//! Wiring: config to warehouse, state, graph, executor and services.

use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use floe_core::config::{ConfigPath, GlobalConfig, MetricsConfig};
use floe_core::error::ConfigError;
use floe_core::{AppConfig, Service, ServiceContext};
use floe_ingest::{MemoryWarehouse, ParquetWarehouse, TableLocks, WarehouseClient};

use crate::action::{CommandAction, IngestAction};
use crate::config::{Config, WarehouseKind};
use crate::dispatch::{JobLauncher, RunDispatcher, RunQueue};
use crate::error::{
    ExecutorSnafu, GraphError, GraphSnafu, OrchestratorError, SchedulerSnafu, SensorSnafu,
    StateSnafu, WarehouseSnafu,
};
use crate::executor::{AssetOutcome, JobExecutor, RunResult};
use crate::graph::{AssetGraph, JobKey};
use crate::scheduler::{CronSchedule, ScheduleService};
use crate::sensor::{CompletionSensor, SensorService};
use crate::state::{FileStateStore, MemoryStateStore, StateStore};

/// Build the asset graph: one ingestion asset per collection, one command
/// asset per transform.
pub fn build_graph(
    config: &Config,
    client: Arc<dyn WarehouseClient>,
    locks: &TableLocks,
) -> Result<AssetGraph, GraphError> {
    let mut builder = AssetGraph::builder();

    for (key, collection) in &config.collections {
        let action = IngestAction::new(key.clone(), collection.clone(), client.clone(), locks.clone());
        builder.define_asset(Config::collection_asset(key), Vec::new(), Arc::new(action))?;
    }

    for (key, transform) in &config.transforms {
        let action = CommandAction::new(&transform.command)
            .ok_or_else(|| GraphError::InvalidAction {
                asset: key.to_string(),
                message: "empty command".to_string(),
            })?
            .with_working_dir(transform.working_dir.clone())
            .with_env(transform.env.clone());
        builder.define_asset(key.clone(), config.transform_deps(transform), Arc::new(action))?;
    }

    for (key, job) in &config.jobs {
        builder.define_job(key.clone(), job.assets.iter().cloned())?;
    }

    builder.build()
}

/// A long-running unit hosted by the orchestrator process.
pub enum OrchestratorService {
    Schedule { key: String, service: ScheduleService },
    Sensor { key: String, service: SensorService },
    Dispatcher { key: String, dispatcher: RunDispatcher },
}

impl Service for OrchestratorService {
    type Key = String;
    type Error = OrchestratorError;

    fn key(&self) -> &String {
        match self {
            OrchestratorService::Schedule { key, .. }
            | OrchestratorService::Sensor { key, .. }
            | OrchestratorService::Dispatcher { key, .. } => key,
        }
    }

    /// Only sensors are jittered; schedules and the dispatcher start at once.
    fn jittered_start(&self) -> bool {
        matches!(self, OrchestratorService::Sensor { .. })
    }

    async fn run(self) -> Result<(), OrchestratorError> {
        match self {
            OrchestratorService::Schedule { service, .. } => {
                service.run().await.context(SchedulerSnafu)
            }
            OrchestratorService::Sensor { service, .. } => service.run().await.context(SensorSnafu),
            OrchestratorService::Dispatcher { dispatcher, .. } => {
                dispatcher.run().await;
                Ok(())
            }
        }
    }
}

/// A configured orchestrator, ready to run jobs or host services.
pub struct Orchestrator {
    config: Config,
    executor: Arc<JobExecutor>,
    state: Arc<dyn StateStore>,
    warehouse: Arc<dyn WarehouseClient>,
}

impl Orchestrator {
    /// Open the warehouse and state store and build the graph.
    pub async fn from_config(
        config: &Config,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Result<Self, OrchestratorError> {
        let warehouse_config = config.warehouse_config();
        let warehouse: Arc<dyn WarehouseClient> = match warehouse_config.kind {
            WarehouseKind::Parquet => {
                tokio::fs::create_dir_all(&warehouse_config.path)
                    .await
                    .context(WarehouseSnafu {
                        path: &warehouse_config.path,
                    })?;
                Arc::new(ParquetWarehouse::new(&warehouse_config.path))
            }
            WarehouseKind::Memory => Arc::new(MemoryWarehouse::new()),
        };

        let state: Arc<dyn StateStore> = match &config.state {
            Some(state) => Arc::new(FileStateStore::open(&state.path).await.context(StateSnafu)?),
            None => {
                warn!("No state path configured, asset state will not survive a restart");
                Arc::new(MemoryStateStore::new())
            }
        };

        Self::with_parts(config, warehouse, state, semaphore)
    }

    /// Assemble from an existing warehouse and state store.
    pub fn with_parts(
        config: &Config,
        warehouse: Arc<dyn WarehouseClient>,
        state: Arc<dyn StateStore>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Result<Self, OrchestratorError> {
        let graph = build_graph(config, warehouse.clone(), &TableLocks::new()).context(GraphSnafu)?;
        let executor = Arc::new(JobExecutor::new(Arc::new(graph), state.clone(), semaphore));

        Ok(Self {
            config: config.clone(),
            executor,
            state,
            warehouse,
        })
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn warehouse(&self) -> &Arc<dyn WarehouseClient> {
        &self.warehouse
    }

    /// Run one job to completion.
    pub async fn run_job(
        &self,
        job: &JobKey,
        shutdown: &CancellationToken,
    ) -> Result<RunResult, OrchestratorError> {
        self.executor.run(job, shutdown).await.context(ExecutorSnafu)
    }

    /// Build the schedule, sensor and dispatcher services.
    pub fn services(
        &self,
        context: &ServiceContext,
    ) -> Result<Vec<OrchestratorService>, OrchestratorError> {
        let (queue, requests) = RunQueue::channel();
        let launcher: Arc<dyn JobLauncher> = Arc::new(queue);
        let mut services = Vec::new();

        for (name, schedule) in &self.config.schedules {
            if !schedule.enabled {
                info!(schedule = %name, "Schedule disabled");
                continue;
            }
            let cron = CronSchedule::parse(&schedule.cron).context(SchedulerSnafu)?;
            services.push(OrchestratorService::Schedule {
                key: format!("schedule:{name}"),
                service: ScheduleService::new(
                    name.clone(),
                    schedule.job.clone(),
                    cron,
                    launcher.clone(),
                    context.shutdown.clone(),
                ),
            });
        }

        for (name, sensor) in &self.config.sensors {
            if !sensor.enabled {
                info!(sensor = %name, "Sensor disabled");
                continue;
            }
            let completion = CompletionSensor::new(
                name.clone(),
                sensor.monitored_assets.clone(),
                sensor.job.clone(),
                self.state.clone(),
                launcher.clone(),
            );
            services.push(OrchestratorService::Sensor {
                key: format!("sensor:{name}"),
                service: SensorService::new(
                    completion,
                    Duration::from_secs(sensor.interval_secs),
                    context.poll_jitter_secs,
                    context.shutdown.clone(),
                ),
            });
        }

        services.push(OrchestratorService::Dispatcher {
            key: "dispatcher".to_string(),
            dispatcher: RunDispatcher::new(self.executor.clone(), requests, context.shutdown.clone()),
        });
        Ok(services)
    }
}

fn log_run(result: &RunResult) {
    for (asset, outcome) in &result.reports {
        match outcome {
            AssetOutcome::Succeeded { output, .. } => info!(
                asset = %asset,
                rows = output.rows_written,
                skipped_records = output.records_skipped,
                "succeeded"
            ),
            AssetOutcome::Failed { error } => warn!(asset = %asset, error = %error, "failed"),
            AssetOutcome::Skipped { reason } => info!(asset = %asset, reason = %reason, "skipped"),
        }
    }
}

impl AppConfig for Config {
    type Service = OrchestratorService;
    type Error = OrchestratorError;

    fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        Config::from_paths(paths)
    }

    fn global(&self) -> &GlobalConfig {
        &self.global
    }

    fn metrics(&self) -> &MetricsConfig {
        &self.metrics
    }

    fn log_startup_info(&self) {
        info!(
            collections = self.collections.len(),
            transforms = self.transforms.len(),
            jobs = self.jobs.len(),
            schedules = self.schedules.len(),
            sensors = self.sensors.len(),
            "Configuration loaded"
        );
        for (key, collection) in &self.collections {
            info!(
                collection = %key,
                path = %collection.path.display(),
                table = collection.table_name(key),
                chunk_size = collection.chunk_size,
                "Collection"
            );
        }
    }

    async fn create_services(
        &self,
        context: ServiceContext,
    ) -> Result<Vec<OrchestratorService>, OrchestratorError> {
        let orchestrator = Orchestrator::from_config(self, context.global_semaphore.clone()).await?;
        orchestrator.services(&context)
    }

    async fn run_job(&self, job: &str, context: ServiceContext) -> Result<bool, OrchestratorError> {
        let orchestrator = Orchestrator::from_config(self, context.global_semaphore.clone()).await?;
        let result = orchestrator
            .run_job(&JobKey::new(job), &context.shutdown)
            .await?;
        log_run(&result);
        Ok(result.is_success())
    }
}
