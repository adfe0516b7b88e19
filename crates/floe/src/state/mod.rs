//! Persisted asset and sensor state.
//!
//! Asset status and last materialization survive restarts, as do sensor
//! cursors. Materialization marks carry a store-wide monotonic sequence so a
//! sensor can tell a new materialization from one it already consumed.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::RunRequest;
use crate::error::StateError;
use crate::graph::AssetKey;

/// Current on-disk document version.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Materialization state of an asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The last run did not attempt the asset.
    Skipped,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Running => "running",
            AssetStatus::Succeeded => "succeeded",
            AssetStatus::Failed => "failed",
            AssetStatus::Skipped => "skipped",
        }
    }
}

/// Identifies one successful materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationMark {
    pub sequence: u64,
    pub at: DateTime<Utc>,
}

/// Stored state for one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub status: AssetStatus,
    /// Last successful materialization, kept across later failures.
    pub last_materialization: Option<MaterializationMark>,
    pub last_run_id: Option<String>,
    /// Why the last run failed or skipped the asset.
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssetRecord {
    /// Whether the asset has ever been materialized successfully.
    pub fn is_materialized(&self) -> bool {
        self.last_materialization.is_some()
    }
}

/// Sequence of the last consumed materialization, per monitored asset.
pub type SensorCursor = BTreeMap<AssetKey, u64>;

/// The full persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    pub schema_version: u32,
    /// Sequence handed to the next successful materialization.
    pub next_sequence: u64,
    #[serde(default)]
    pub assets: BTreeMap<AssetKey, AssetRecord>,
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorCursor>,
    /// Requests accepted but not started before the last shutdown.
    #[serde(default)]
    pub pending_runs: Vec<RunRequest>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            next_sequence: 1,
            assets: BTreeMap::new(),
            sensors: BTreeMap::new(),
            pending_runs: Vec::new(),
        }
    }
}

impl StateDocument {
    pub fn set_status(&mut self, key: &AssetKey, status: AssetStatus, run_id: &str) {
        let record = self.assets.entry(key.clone()).or_default();
        record.status = status;
        record.last_run_id = Some(run_id.to_string());
        record.updated_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self, key: &AssetKey, run_id: &str) -> MaterializationMark {
        let mark = MaterializationMark {
            sequence: self.next_sequence,
            at: Utc::now(),
        };
        self.next_sequence += 1;

        let record = self.assets.entry(key.clone()).or_default();
        record.status = AssetStatus::Succeeded;
        record.last_materialization = Some(mark);
        record.last_run_id = Some(run_id.to_string());
        record.last_error = None;
        record.updated_at = Some(mark.at);
        mark
    }

    pub fn mark_failed(&mut self, key: &AssetKey, run_id: &str, error: &str) {
        let record = self.assets.entry(key.clone()).or_default();
        record.status = AssetStatus::Failed;
        record.last_run_id = Some(run_id.to_string());
        record.last_error = Some(error.to_string());
        record.updated_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self, key: &AssetKey, run_id: &str, reason: &str) {
        let record = self.assets.entry(key.clone()).or_default();
        record.status = AssetStatus::Skipped;
        record.last_run_id = Some(run_id.to_string());
        record.last_error = Some(reason.to_string());
        record.updated_at = Some(Utc::now());
    }
}

/// Storage for asset state and sensor cursors.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn asset(&self, key: &AssetKey) -> Result<Option<AssetRecord>, StateError>;

    /// Record a non-terminal status (pending or running).
    async fn set_status(
        &self,
        key: &AssetKey,
        status: AssetStatus,
        run_id: &str,
    ) -> Result<(), StateError>;

    /// Record success and return the new materialization mark.
    async fn mark_succeeded(
        &self,
        key: &AssetKey,
        run_id: &str,
    ) -> Result<MaterializationMark, StateError>;

    async fn mark_failed(&self, key: &AssetKey, run_id: &str, error: &str)
    -> Result<(), StateError>;

    /// Record that a run skipped the asset. The last materialization is kept.
    async fn mark_skipped(
        &self,
        key: &AssetKey,
        run_id: &str,
        reason: &str,
    ) -> Result<(), StateError>;

    /// The sensor's cursor; empty if it never fired.
    async fn sensor_cursor(&self, sensor: &str) -> Result<SensorCursor, StateError>;

    async fn save_sensor_cursor(
        &self,
        sensor: &str,
        cursor: &SensorCursor,
    ) -> Result<(), StateError>;

    /// Run requests left over from a previous shutdown, oldest first.
    async fn pending_runs(&self) -> Result<Vec<RunRequest>, StateError>;

    /// Replace the stored pending run requests.
    async fn save_pending_runs(&self, runs: &[RunRequest]) -> Result<(), StateError>;
}
