//! JSON file state store.
//!
//! Every mutation is applied to a copy of the document, written with
//! temp-file + rename, and only then made visible in memory. A failed write
//! leaves both the file and the in-memory state unchanged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use floe_core::fs::atomic_write;

use super::{
    AssetRecord, AssetStatus, MaterializationMark, STATE_SCHEMA_VERSION, SensorCursor,
    StateDocument, StateStore,
};
use crate::dispatch::RunRequest;
use crate::error::{EncodeSnafu, StateError, StateIoSnafu};
use crate::graph::AssetKey;

/// State persisted to a single JSON file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    doc: Mutex<StateDocument>,
}

impl FileStateStore {
    /// Load the state file, or start empty if it does not exist.
    ///
    /// An unreadable document is logged and replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StateDocument>(&bytes) {
                Ok(doc) if doc.schema_version == STATE_SCHEMA_VERSION => {
                    info!(
                        path = %path.display(),
                        assets = doc.assets.len(),
                        sensors = doc.sensors.len(),
                        "Loaded state"
                    );
                    doc
                }
                Ok(doc) => {
                    warn!(
                        path = %path.display(),
                        version = doc.schema_version,
                        "Unsupported state version, starting fresh"
                    );
                    StateDocument::default()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt state file, starting fresh");
                    StateDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument::default(),
            Err(source) => return Err(StateError::StateIo { path, source }),
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy, persist it, then publish it.
    async fn update<T>(&self, change: impl FnOnce(&mut StateDocument) -> T) -> Result<T, StateError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let value = change(&mut next);

        let bytes = serde_json::to_vec_pretty(&next).context(EncodeSnafu)?;
        atomic_write(&self.path, &bytes)
            .await
            .context(StateIoSnafu { path: &self.path })?;

        *doc = next;
        Ok(value)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn asset(&self, key: &AssetKey) -> Result<Option<AssetRecord>, StateError> {
        Ok(self.doc.lock().await.assets.get(key).cloned())
    }

    async fn set_status(
        &self,
        key: &AssetKey,
        status: AssetStatus,
        run_id: &str,
    ) -> Result<(), StateError> {
        self.update(|doc| doc.set_status(key, status, run_id)).await
    }

    async fn mark_succeeded(
        &self,
        key: &AssetKey,
        run_id: &str,
    ) -> Result<MaterializationMark, StateError> {
        self.update(|doc| doc.mark_succeeded(key, run_id)).await
    }

    async fn mark_failed(
        &self,
        key: &AssetKey,
        run_id: &str,
        error: &str,
    ) -> Result<(), StateError> {
        self.update(|doc| doc.mark_failed(key, run_id, error)).await
    }

    async fn mark_skipped(
        &self,
        key: &AssetKey,
        run_id: &str,
        reason: &str,
    ) -> Result<(), StateError> {
        self.update(|doc| doc.mark_skipped(key, run_id, reason)).await
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
        self.update(|doc| {
            doc.sensors.insert(sensor.to_string(), cursor.clone());
        })
        .await
    }

    async fn pending_runs(&self) -> Result<Vec<RunRequest>, StateError> {
        Ok(self.doc.lock().await.pending_runs.clone())
    }

    async fn save_pending_runs(&self, runs: &[RunRequest]) -> Result<(), StateError> {
        self.update(|doc| doc.pending_runs = runs.to_vec()).await
    }
}
