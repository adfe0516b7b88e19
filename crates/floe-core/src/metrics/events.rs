//! Internal events for metrics emission.
//!
//! Each struct is one measurable occurrence. Events implement `InternalEvent`,
//! which records the matching Prometheus metric.
//!
//! ## Labels
//!
//! Ingestion metrics carry a `target` label holding the collection or table
//! name. Orchestration metrics are labelled by `job`, `asset`, `schedule` or
//! `sensor`.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

// ============ Extraction ============

/// Source files matched for a collection.
pub struct FilesDiscovered {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for FilesDiscovered {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Files discovered");
        counter!("floe_files_discovered_total", "target" => self.target).increment(self.count);
    }
}

/// A record batch produced by the extractor.
pub struct BatchExtracted {
    pub rows: u64,
    pub target: String,
}

impl InternalEvent for BatchExtracted {
    fn emit(self) {
        trace!(rows = self.rows, target = %self.target, "Batch extracted");
        counter!("floe_batches_extracted_total", "target" => self.target.clone()).increment(1);
        counter!("floe_records_extracted_total", "target" => self.target).increment(self.rows);
    }
}

/// Malformed rows dropped under the skip decode policy.
pub struct RecordsSkipped {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records skipped");
        counter!("floe_records_skipped_total", "target" => self.target).increment(self.count);
    }
}

// ============ Writing ============

/// A batch accepted by the warehouse client.
pub struct BatchWritten {
    pub rows: u64,
    pub target: String,
}

impl InternalEvent for BatchWritten {
    fn emit(self) {
        trace!(rows = self.rows, target = %self.target, "Batch written");
        counter!("floe_batches_written_total", "target" => self.target.clone()).increment(1);
        counter!("floe_records_written_total", "target" => self.target).increment(self.rows);
    }
}

/// A staged table was promoted over the live table.
pub struct TableReplaced {
    pub target: String,
}

impl InternalEvent for TableReplaced {
    fn emit(self) {
        trace!(target = %self.target, "Table replaced");
        counter!("floe_table_replacements_total", "target" => self.target).increment(1);
    }
}

/// A writer was refused because another run holds the table lock.
pub struct WriteConflict {
    pub target: String,
}

impl InternalEvent for WriteConflict {
    fn emit(self) {
        trace!(target = %self.target, "Write conflict");
        counter!("floe_write_conflicts_total", "target" => self.target).increment(1);
    }
}

// ============ Orchestration ============

/// Final state of an asset within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcomeType {
    Succeeded,
    Failed,
    Skipped,
}

impl AssetOutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetOutcomeType::Succeeded => "succeeded",
            AssetOutcomeType::Failed => "failed",
            AssetOutcomeType::Skipped => "skipped",
        }
    }
}

/// An asset reached a final state in a run.
pub struct AssetCompleted {
    pub asset: String,
    pub outcome: AssetOutcomeType,
}

impl InternalEvent for AssetCompleted {
    fn emit(self) {
        trace!(asset = %self.asset, outcome = self.outcome.as_str(), "Asset completed");
        counter!(
            "floe_asset_runs_total",
            "asset" => self.asset,
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// Wall time spent materializing an asset.
pub struct AssetDuration {
    pub asset: String,
    pub duration: Duration,
}

impl InternalEvent for AssetDuration {
    fn emit(self) {
        trace!(asset = %self.asset, duration_ms = self.duration.as_millis(), "Asset duration");
        histogram!("floe_asset_duration_seconds", "asset" => self.asset)
            .record(self.duration.as_secs_f64());
    }
}

/// A job run finished.
pub struct JobRunCompleted {
    pub job: String,
    pub failed: bool,
    pub duration: Duration,
}

impl InternalEvent for JobRunCompleted {
    fn emit(self) {
        let status = if self.failed { "failed" } else { "succeeded" };
        trace!(job = %self.job, status, duration_ms = self.duration.as_millis(), "Job run completed");
        counter!("floe_job_runs_total", "job" => self.job.clone(), "status" => status).increment(1);
        histogram!("floe_job_run_duration_seconds", "job" => self.job)
            .record(self.duration.as_secs_f64());
    }
}

/// A run request was submitted to the dispatcher.
pub struct RunRequested {
    pub job: String,
    /// What produced the request ("schedule", "sensor" or "manual").
    pub origin: &'static str,
}

impl InternalEvent for RunRequested {
    fn emit(self) {
        trace!(job = %self.job, origin = self.origin, "Run requested");
        counter!("floe_run_requests_total", "job" => self.job, "origin" => self.origin).increment(1);
    }
}

/// A cron schedule reached one of its instants.
pub struct ScheduleFired {
    pub schedule: String,
}

impl InternalEvent for ScheduleFired {
    fn emit(self) {
        trace!(schedule = %self.schedule, "Schedule fired");
        counter!("floe_schedule_fires_total", "schedule" => self.schedule).increment(1);
    }
}

/// Outcome of one sensor evaluation.
#[derive(Debug, Clone, Copy)]
pub enum SensorResultType {
    Fired,
    Idle,
    Error,
}

impl SensorResultType {
    fn as_str(&self) -> &'static str {
        match self {
            SensorResultType::Fired => "fired",
            SensorResultType::Idle => "idle",
            SensorResultType::Error => "error",
        }
    }
}

pub struct SensorEvaluated {
    pub sensor: String,
    pub result: SensorResultType,
}

impl InternalEvent for SensorEvaluated {
    fn emit(self) {
        trace!(sensor = %self.sensor, result = self.result.as_str(), "Sensor evaluated");
        counter!(
            "floe_sensor_evaluations_total",
            "sensor" => self.sensor,
            "result" => self.result.as_str()
        )
        .increment(1);
    }
}

// ============ Polling ============

/// Result type for polling iterations.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// A polling iteration completed.
pub struct IterationCompleted {
    /// Service identifier (e.g. "sensor").
    pub service: &'static str,
    pub result: IterationResultType,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(
            service = self.service,
            result = self.result.as_str(),
            target = %self.target,
            "Iteration completed"
        );
        counter!(
            "floe_polling_iterations_total",
            "service" => self.service,
            "result" => self.result.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Time spent in prepare + process of one polling iteration.
pub struct IterationDuration {
    pub service: &'static str,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        trace!(
            service = self.service,
            duration_ms = self.duration.as_millis(),
            target = %self.target,
            "Iteration duration"
        );
        histogram!(
            "floe_polling_iteration_duration_seconds",
            "service" => self.service,
            "target" => self.target
        )
        .record(self.duration.as_secs_f64());
    }
}
