//! Warehouse boundary.
//!
//! The destination's storage engine stays behind this trait. The writer only
//! needs four operations: append or truncate-and-write a batch, swap a staged
//! table in, drop a table and read a table back.

use arrow::array::RecordBatch;
use async_trait::async_trait;

use crate::error::WriteError;

/// Client for the destination warehouse.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Write a batch to `table`, creating it if needed.
    ///
    /// With `truncate` the table's previous contents are discarded first.
    async fn write(
        &self,
        table: &str,
        batch: &RecordBatch,
        truncate: bool,
    ) -> Result<(), WriteError>;

    /// Replace `table` with the contents of `staging` in one step.
    ///
    /// On success `staging` no longer exists. On failure `table` is unchanged.
    async fn promote(&self, staging: &str, table: &str) -> Result<(), WriteError>;

    /// Remove a table. Dropping a missing table is not an error.
    async fn drop_table(&self, table: &str) -> Result<(), WriteError>;

    /// Read every batch of a table in write order, or `None` if it does not exist.
    async fn read_table(&self, table: &str) -> Result<Option<Vec<RecordBatch>>, WriteError>;
}
