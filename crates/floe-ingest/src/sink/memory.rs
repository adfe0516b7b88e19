//! In-process warehouse.

use std::collections::HashMap;

use arrow::array::RecordBatch;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::WarehouseClient;
use crate::error::WriteError;

/// Tables held in memory. Promotion is a move under the lock.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Vec<RecordBatch>>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total rows in a table, or `None` if it does not exist.
    pub async fn row_count(&self, table: &str) -> Option<usize> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|batches| batches.iter().map(RecordBatch::num_rows).sum())
    }
}

#[async_trait]
impl WarehouseClient for MemoryWarehouse {
    async fn write(
        &self,
        table: &str,
        batch: &RecordBatch,
        truncate: bool,
    ) -> Result<(), WriteError> {
        let mut tables = self.tables.lock().await;
        let batches = tables.entry(table.to_string()).or_default();
        if truncate {
            batches.clear();
        }
        batches.push(batch.clone());
        Ok(())
    }

    async fn promote(&self, staging: &str, table: &str) -> Result<(), WriteError> {
        let mut tables = self.tables.lock().await;
        let batches = tables
            .remove(staging)
            .ok_or_else(|| WriteError::MissingStaging {
                staging: staging.to_string(),
            })?;
        tables.insert(table.to_string(), batches);
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<(), WriteError> {
        self.tables.lock().await.remove(table);
        Ok(())
    }

    async fn read_table(&self, table: &str) -> Result<Option<Vec<RecordBatch>>, WriteError> {
        Ok(self.tables.lock().await.get(table).cloned())
    }
}
