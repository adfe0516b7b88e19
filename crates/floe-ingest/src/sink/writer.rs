//! Replace-disposition table writer.
//!
//! All batches of a run land in a staging side table. The first batch
//! truncates it, so leftovers from an interrupted run are discarded. On
//! `commit` the staging table is promoted over the live table in one step;
//! on `abort` it is dropped. A failed run never leaves the live table
//! partially loaded.

use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use tracing::{debug, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{BatchWritten, TableReplaced, WriteConflict};

use super::locks::{TableLock, TableLocks};
use super::traits::WarehouseClient;
use crate::error::WriteError;

/// Name of the staging side table for `table`.
pub fn staging_table_name(table: &str) -> String {
    format!("_staging_{table}")
}

/// Summary of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStats {
    pub table: String,
    pub batches_written: usize,
    pub rows_written: usize,
}

/// Writes one run's batches to a table with replace semantics.
pub struct DestinationWriter {
    client: Arc<dyn WarehouseClient>,
    table: String,
    staging: String,
    schema: SchemaRef,
    batches_written: usize,
    rows_written: usize,
    _lock: TableLock,
}

impl DestinationWriter {
    /// Take the table's write lock and prepare a staging table.
    ///
    /// Fails with `ConcurrentWriteConflict` if another writer holds the lock.
    pub fn begin(
        client: Arc<dyn WarehouseClient>,
        locks: &TableLocks,
        table: &str,
        schema: SchemaRef,
    ) -> Result<Self, WriteError> {
        let Some(lock) = locks.try_acquire(table) else {
            emit!(WriteConflict {
                target: table.to_string(),
            });
            return Err(WriteError::ConcurrentWriteConflict {
                table: table.to_string(),
            });
        };

        debug!(table, "Began table write");

        Ok(Self {
            client,
            table: table.to_string(),
            staging: staging_table_name(table),
            schema,
            batches_written: 0,
            rows_written: 0,
            _lock: lock,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Write one batch to the staging table.
    pub async fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), WriteError> {
        if batch.schema().fields() != self.schema.fields() {
            return Err(WriteError::SchemaMismatch {
                table: self.table.clone(),
            });
        }

        let truncate = self.batches_written == 0;
        self.client.write(&self.staging, batch, truncate).await?;

        self.batches_written += 1;
        self.rows_written += batch.num_rows();

        emit!(BatchWritten {
            rows: batch.num_rows() as u64,
            target: self.table.clone(),
        });
        Ok(())
    }

    /// Promote the staged data over the live table and release the lock.
    ///
    /// A run that wrote nothing still replaces the table with an empty one.
    pub async fn commit(mut self) -> Result<WriteStats, WriteError> {
        if self.batches_written == 0 {
            let empty = RecordBatch::new_empty(self.schema.clone());
            self.client.write(&self.staging, &empty, true).await?;
        }

        if let Err(e) = self.client.promote(&self.staging, &self.table).await {
            self.drop_staging().await;
            return Err(e);
        }

        emit!(TableReplaced {
            target: self.table.clone(),
        });
        info!(
            table = %self.table,
            batches = self.batches_written,
            rows = self.rows_written,
            "Replaced table"
        );

        Ok(WriteStats {
            table: std::mem::take(&mut self.table),
            batches_written: self.batches_written,
            rows_written: self.rows_written,
        })
    }

    /// Discard the staged data. The live table is untouched.
    pub async fn abort(self) {
        warn!(table = %self.table, rows = self.rows_written, "Aborting table write");
        self.drop_staging().await;
    }

    async fn drop_staging(&self) {
        if let Err(e) = self.client.drop_table(&self.staging).await {
            warn!(table = %self.table, staging = %self.staging, error = %e, "Failed to drop staging table");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryWarehouse;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]))
    }

    fn batch(values: Vec<i64>) -> RecordBatch {
        RecordBatch::try_new(schema(), vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    #[tokio::test]
    async fn test_commit_replaces_live_table() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let locks = TableLocks::new();
        warehouse.write("t", &batch(vec![1, 2, 3]), true).await.unwrap();

        let mut writer = DestinationWriter::begin(warehouse.clone(), &locks, "t", schema()).unwrap();
        writer.write_batch(&batch(vec![7])).await.unwrap();
        writer.write_batch(&batch(vec![8, 9])).await.unwrap();
        let stats = writer.commit().await.unwrap();

        assert_eq!(stats.batches_written, 2);
        assert_eq!(stats.rows_written, 3);
        assert_eq!(warehouse.row_count("t").await, Some(3));
        assert_eq!(warehouse.table_names().await, vec!["t"]);
        assert!(!locks.is_locked("t"));
    }

    #[tokio::test]
    async fn test_abort_leaves_live_table() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let locks = TableLocks::new();
        warehouse.write("t", &batch(vec![1, 2]), true).await.unwrap();

        let mut writer = DestinationWriter::begin(warehouse.clone(), &locks, "t", schema()).unwrap();
        writer.write_batch(&batch(vec![5])).await.unwrap();
        writer.abort().await;

        assert_eq!(warehouse.row_count("t").await, Some(2));
        assert_eq!(warehouse.row_count(&staging_table_name("t")).await, None);
    }

    #[tokio::test]
    async fn test_empty_run_replaces_with_empty_table() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let locks = TableLocks::new();
        warehouse.write("t", &batch(vec![1]), true).await.unwrap();

        let writer = DestinationWriter::begin(warehouse.clone(), &locks, "t", schema()).unwrap();
        writer.commit().await.unwrap();

        assert_eq!(warehouse.row_count("t").await, Some(0));
    }

    #[tokio::test]
    async fn test_concurrent_writers_conflict() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let locks = TableLocks::new();

        let first = DestinationWriter::begin(warehouse.clone(), &locks, "t", schema()).unwrap();
        let second = DestinationWriter::begin(warehouse.clone(), &locks, "t", schema());
        assert!(matches!(
            second,
            Err(WriteError::ConcurrentWriteConflict { .. })
        ));

        first.abort().await;
        assert!(DestinationWriter::begin(warehouse, &locks, "t", schema()).is_ok());
    }

    #[tokio::test]
    async fn test_schema_mismatch_rejected() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let locks = TableLocks::new();
        let other = Arc::new(Schema::new(vec![Field::new("w", DataType::Int64, true)]));
        let wrong = RecordBatch::try_new(other, vec![Arc::new(Int64Array::from(vec![1]))]).unwrap();

        let mut writer = DestinationWriter::begin(warehouse, &locks, "t", schema()).unwrap();
        let err = writer.write_batch(&wrong).await.unwrap_err();
        assert!(matches!(err, WriteError::SchemaMismatch { .. }));
    }
}
