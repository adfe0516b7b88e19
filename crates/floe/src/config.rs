//! Configuration for the floe orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use floe_core::config::{
    ConfigPath, GlobalConfig, Mergeable, MetricsConfig, Resource, interpolate, load_from_paths,
    merge_unique,
};
use floe_core::error::ConfigError;
pub use floe_ingest::{CollectionConfig, CollectionKey};
use floe_ingest::{MemoryWarehouse, TableLocks};

use crate::graph::{AssetKey, JobKey};
use crate::scheduler::CronSchedule;

fn default_enabled() -> bool {
    true
}

fn default_sensor_interval() -> u64 {
    30
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("warehouse")
}

/// An asset materialized by an external command, typically the
/// transformation build that reads the ingested tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Upstream assets. Defaults to every collection.
    #[serde(default)]
    pub deps: Option<Vec<AssetKey>>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Assets selected by the job.
    pub assets: Vec<AssetKey>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    pub job: JobKey,
    /// Five-field cron, or six/seven fields with seconds and year.
    pub cron: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Assets that must all materialize again before the sensor fires.
    pub monitored_assets: Vec<AssetKey>,
    /// Job requested when the sensor fires.
    pub job: JobKey,
    #[serde(default = "default_sensor_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Where asset state and sensor cursors are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseKind {
    /// Parquet tables under a local directory.
    #[default]
    Parquet,
    /// Tables held in memory, for dry runs.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub kind: WarehouseKind,
    #[serde(default = "default_warehouse_path")]
    pub path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            kind: WarehouseKind::default(),
            path: default_warehouse_path(),
        }
    }
}

/// Main configuration for floe.
///
/// # Example
///
/// ```yaml
/// collections:
///   loans:
///     path: Data/fact_db
///   customers:
///     path: Data/customer
///
/// transforms:
///   dbt:
///     command: [dbt, build]
///
/// jobs:
///   ingest:
///     assets: [loans, customers]
///   transform:
///     assets: [dbt]
///
/// schedules:
///   nightly:
///     job: ingest
///     cron: "10 1 * * *"
///
/// sensors:
///   ingest_complete:
///     monitored_assets: [loans, customers]
///     job: transform
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source collections; each one is an ingestion asset.
    #[serde(default)]
    pub collections: IndexMap<CollectionKey, CollectionConfig>,
    #[serde(default)]
    pub transforms: IndexMap<AssetKey, TransformConfig>,
    #[serde(default)]
    pub jobs: IndexMap<JobKey, JobConfig>,
    #[serde(default)]
    pub schedules: IndexMap<String, ScheduleConfig>,
    #[serde(default)]
    pub sensors: IndexMap<String, SensorConfig>,
    /// Persisted state. Without it, state lives only as long as the process.
    #[serde(default)]
    pub state: Option<StateConfig>,
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Mergeable for Config {
    type Key = CollectionKey;
    type Component = CollectionConfig;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component> {
        &mut self.collections
    }

    fn global_mut(&mut self) -> &mut GlobalConfig {
        &mut self.global
    }

    fn metrics_mut(&mut self) -> &mut MetricsConfig {
        &mut self.metrics
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }

    fn merge_sections(&mut self, other: &mut Self) -> Result<(), ConfigError> {
        merge_unique(&mut self.transforms, &mut other.transforms)?;
        merge_unique(&mut self.jobs, &mut other.jobs)?;
        merge_unique(&mut self.schedules, &mut other.schedules)?;
        merge_unique(&mut self.sensors, &mut other.sensors)?;
        if other.state.is_some() {
            self.state = other.state.take();
        }
        if other.warehouse.is_some() {
            self.warehouse = other.warehouse.take();
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from multiple paths (files or directories).
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config: Self = load_from_paths(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config = Self::parse_yaml(&result.text)?;
        config.validate()?;
        Ok(config)
    }

    /// The asset a collection is loaded by.
    pub fn collection_asset(key: &CollectionKey) -> AssetKey {
        AssetKey::new(key.id())
    }

    /// Upstream assets of a transform.
    pub fn transform_deps(&self, transform: &TransformConfig) -> Vec<AssetKey> {
        match &transform.deps {
            Some(deps) => deps.clone(),
            None => self.collections.keys().map(Self::collection_asset).collect(),
        }
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        self.warehouse.clone().unwrap_or_default()
    }

    fn is_asset(&self, key: &AssetKey) -> bool {
        self.transforms.contains_key(key)
            || self.collections.contains_key(&CollectionKey::new(key.id()))
    }

    /// Validate the configuration.
    ///
    /// Every problem is reported, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        for (key, collection) in &self.collections {
            if let Err(e) = collection.validate(key) {
                errors.push(e.to_string());
            }
        }

        let clashes: Vec<String> = self
            .transforms
            .keys()
            .filter(|key| self.collections.contains_key(&CollectionKey::new(key.id())))
            .map(ToString::to_string)
            .collect();
        if !clashes.is_empty() {
            errors.push(ConfigError::DuplicateComponents { keys: clashes }.to_string());
        }

        for (key, transform) in &self.transforms {
            if transform.command.is_empty() {
                errors.push(ConfigError::EmptyCommand { name: key.to_string() }.to_string());
            }
            for dep in self.transform_deps(transform) {
                self.check_asset(&mut errors, || format!("Transform '{key}'"), &dep);
            }
        }

        for (key, job) in &self.jobs {
            for asset in &job.assets {
                self.check_asset(&mut errors, || format!("Job '{key}'"), asset);
            }
        }

        for (name, schedule) in &self.schedules {
            self.check_job(&mut errors, || format!("Schedule '{name}'"), &schedule.job);
            if let Err(e) = CronSchedule::parse(&schedule.cron) {
                let message = match e {
                    crate::error::SchedulerError::InvalidCron { message, .. } => message,
                    other => other.to_string(),
                };
                errors.push(
                    ConfigError::InvalidCron {
                        schedule: name.clone(),
                        expression: schedule.cron.clone(),
                        message,
                    }
                    .to_string(),
                );
            }
        }

        for (name, sensor) in &self.sensors {
            if sensor.monitored_assets.is_empty() {
                errors.push(ConfigError::EmptySensor { sensor: name.clone() }.to_string());
            }
            for asset in &sensor.monitored_assets {
                self.check_asset(&mut errors, || format!("Sensor '{name}'"), asset);
            }
            self.check_job(&mut errors, || format!("Sensor '{name}'"), &sensor.job);
        }

        let conflicts = Resource::conflicts(
            self.collections
                .iter()
                .map(|(key, config)| (key.id().to_string(), config.resources(key))),
        );
        if !conflicts.is_empty() {
            errors.push(
                ConfigError::ResourceConflict {
                    message: Resource::describe_conflicts(&conflicts),
                }
                .to_string(),
            );
        }

        // Cycles only show up once every reference resolves.
        if errors.is_empty() {
            let probe = Arc::new(MemoryWarehouse::new());
            if let Err(e) = crate::orchestrator::build_graph(self, probe, &TableLocks::new()) {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MultipleErrors { errors })
        }
    }

    fn check_asset(&self, errors: &mut Vec<String>, context: impl Fn() -> String, asset: &AssetKey) {
        if !self.is_asset(asset) {
            errors.push(
                ConfigError::UnknownAsset {
                    context: context(),
                    asset: asset.to_string(),
                }
                .to_string(),
            );
        }
    }

    fn check_job(&self, errors: &mut Vec<String>, context: impl Fn() -> String, job: &JobKey) {
        if !self.jobs.contains_key(job) {
            errors.push(
                ConfigError::UnknownJob {
                    context: context(),
                    job: job.to_string(),
                }
                .to_string(),
            );
        }
    }

    /// Number of defined assets (collections plus transforms).
    pub fn asset_count(&self) -> usize {
        self.collections.len() + self.transforms.len()
    }
}
