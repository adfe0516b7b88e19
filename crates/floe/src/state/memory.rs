//! In-memory state store.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AssetRecord, AssetStatus, MaterializationMark, SensorCursor, StateDocument, StateStore};
use crate::dispatch::RunRequest;
use crate::error::StateError;
use crate::graph::AssetKey;

/// State held for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    doc: Mutex<StateDocument>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the current document.
    pub async fn snapshot(&self) -> StateDocument {
        self.doc.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn asset(&self, key: &AssetKey) -> Result<Option<AssetRecord>, StateError> {
        Ok(self.doc.lock().await.assets.get(key).cloned())
    }

    async fn set_status(
        &self,
        key: &AssetKey,
        status: AssetStatus,
        run_id: &str,
    ) -> Result<(), StateError> {
        self.doc.lock().await.set_status(key, status, run_id);
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        key: &AssetKey,
        run_id: &str,
    ) -> Result<MaterializationMark, StateError> {
        Ok(self.doc.lock().await.mark_succeeded(key, run_id))
    }

    async fn mark_failed(
        &self,
        key: &AssetKey,
        run_id: &str,
        error: &str,
    ) -> Result<(), StateError> {
        self.doc.lock().await.mark_failed(key, run_id, error);
        Ok(())
    }

    async fn mark_skipped(
        &self,
        key: &AssetKey,
        run_id: &str,
        reason: &str,
    ) -> Result<(), StateError> {
        self.doc.lock().await.mark_skipped(key, run_id, reason);
        Ok(())
    }

    async fn sensor_cursor(&self, sensor: &str) -> Result<SensorCursor, StateError> {
        Ok(self
            .doc
            .lock()
            .await
            .sensors
            .get(sensor)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_sensor_cursor(
        &self,
        sensor: &str,
        cursor: &SensorCursor,
    ) -> Result<(), StateError> {
        self.doc
            .lock()
            .await
            .sensors
            .insert(sensor.to_string(), cursor.clone());
        Ok(())
    }

    async fn pending_runs(&self) -> Result<Vec<RunRequest>, StateError> {
        Ok(self.doc.lock().await.pending_runs.clone())
    }

    async fn save_pending_runs(&self, runs: &[RunRequest]) -> Result<(), StateError> {
        self.doc.lock().await.pending_runs = runs.to_vec();
        Ok(())
    }
}
