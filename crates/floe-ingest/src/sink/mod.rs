//! Destination side: replace-disposition writer and warehouse clients.

mod locks;
mod memory;
mod parquet;
mod traits;
mod writer;

pub use locks::{TableLock, TableLocks};
pub use memory::MemoryWarehouse;
pub use self::parquet::ParquetWarehouse;
pub use traits::WarehouseClient;
pub use writer::{DestinationWriter, WriteStats, staging_table_name};
