//! Error types for the orchestrator.

use std::path::PathBuf;

use snafu::prelude::*;

use floe_core::error::ConfigError;
use floe_ingest::IngestError;

// ============ Graph Errors ============

/// Errors raised while defining or querying the asset graph.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GraphError {
    #[snafu(display("Asset '{asset}' is defined more than once"))]
    DuplicateAsset { asset: String },

    #[snafu(display("Job '{job}' is defined more than once"))]
    DuplicateJob { job: String },

    #[snafu(display("Asset '{asset}' depends on unknown asset '{dependency}'"))]
    UnknownDependency { asset: String, dependency: String },

    #[snafu(display("Job '{job}' selects unknown asset '{asset}'"))]
    UnknownJobMember { job: String, asset: String },

    /// The dependency graph is not acyclic.
    #[snafu(display("Dependency cycle: {}", assets.join(" -> ")))]
    CycleDetected { assets: Vec<String> },

    #[snafu(display("Unknown job '{job}'"))]
    UnknownJob { job: String },

    /// The asset's action could not be constructed.
    #[snafu(display("Asset '{asset}' has an invalid action: {message}"))]
    InvalidAction { asset: String, message: String },
}

// ============ Asset Errors ============

/// Errors raised by an asset's action. Local to the asset: they fail it
/// without aborting unrelated assets.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AssetError {
    #[snafu(display("Ingestion failed: {source}"))]
    Ingest { source: IngestError },

    #[snafu(display("Failed to start '{command}': {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[snafu(display("'{command}' exited with {status}: {stderr}"))]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// The run was cancelled while the asset was in flight.
    #[snafu(display("Run cancelled"))]
    RunCancelled,

    #[snafu(display("Asset action panicked: {message}"))]
    Panicked { message: String },

    #[snafu(display("State store error: {source}"))]
    AssetState { source: StateError },
}

// ============ State Errors ============

/// Errors from the persisted state store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StateError {
    #[snafu(display("IO error on state file {}: {source}", path.display()))]
    StateIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to encode state: {source}"))]
    Encode { source: serde_json::Error },
}

// ============ Executor Errors ============

/// Errors that prevent a job run from starting.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExecutorError {
    #[snafu(display("{source}"))]
    Plan { source: GraphError },

    #[snafu(display("Failed to initialise run state: {source}"))]
    RunState { source: StateError },
}

// ============ Dispatch Errors ============

/// Errors from submitting run requests.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// The dispatcher is gone, so the request cannot be queued.
    #[snafu(display("Run queue closed, dropped request for job '{job}'"))]
    QueueClosed { job: String },
}

// ============ Scheduler Errors ============

/// Errors from cron schedules.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchedulerError {
    #[snafu(display("Invalid cron expression '{expression}': {message}"))]
    InvalidCron { expression: String, message: String },

    #[snafu(display("Schedule '{schedule}' could not submit a run: {source}"))]
    Submit {
        schedule: String,
        source: DispatchError,
    },
}

// ============ Sensor Errors ============

/// Errors from evaluating a completion sensor.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SensorError {
    #[snafu(display("Sensor '{sensor}' could not read state: {source}"))]
    SensorState { sensor: String, source: StateError },

    #[snafu(display("Sensor '{sensor}' could not submit a run: {source}"))]
    Launch {
        sensor: String,
        source: DispatchError,
    },
}

// ============ Orchestrator Errors ============

/// Errors from building or running the orchestrator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OrchestratorError {
    #[snafu(display("Invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Invalid asset graph: {source}"))]
    Graph { source: GraphError },

    #[snafu(display("Failed to open state store: {source}"))]
    State { source: StateError },

    #[snafu(display("Job run failed to start: {source}"))]
    Executor { source: ExecutorError },

    #[snafu(display("Scheduler error: {source}"))]
    Scheduler { source: SchedulerError },

    #[snafu(display("Sensor error: {source}"))]
    Sensor { source: SensorError },

    #[snafu(display("Failed to prepare warehouse at {}: {source}", path.display()))]
    Warehouse {
        path: PathBuf,
        source: std::io::Error,
    },
}
