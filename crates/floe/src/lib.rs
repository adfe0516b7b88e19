//! Floe: asset graph orchestrator for scheduled CSV ingestion.
//!
//! This crate handles:
//! - Defining ingestion and transform assets and the jobs that select them
//! - Running jobs in dependency order with partial-failure semantics
//! - Cron schedules that request job runs
//! - Completion sensors that request a downstream run once per wave
//! - Persisting asset state and sensor cursors across restarts

pub mod action;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod scheduler;
pub mod sensor;
pub mod state;

// Re-export commonly used items
pub use action::{AssetAction, AssetContext, CommandAction, IngestAction, MaterializeOutput};
pub use config::Config;
pub use dispatch::{JobLauncher, RunDispatcher, RunQueue, RunReason, RunRequest};
pub use error::{AssetError, ExecutorError, GraphError, OrchestratorError};
pub use executor::{AssetOutcome, JobExecutor, RunResult, SkipReason};
pub use graph::{AssetGraph, AssetKey, JobKey};
pub use orchestrator::{Orchestrator, OrchestratorService, build_graph};
pub use scheduler::{CronSchedule, ScheduleService};
pub use sensor::{CompletionSensor, SensorEvaluation, SensorService};
pub use state::{AssetStatus, FileStateStore, MemoryStateStore, StateStore};
