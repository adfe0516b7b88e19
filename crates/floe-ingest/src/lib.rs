//! floe-ingest: load directories of delimited files into warehouse tables.
//!
//! - `source/` - file discovery, schema inference and union, chunked reading
//! - `sink/` - staged replace writer, table locks, warehouse clients
//! - `ingest` - one collection end to end, with cancellation between batches

pub mod config;
pub mod error;
pub mod ingest;
pub mod sink;
pub mod source;

pub use config::{CollectionConfig, CollectionKey, DecodePolicy, SOURCE_FILE_COLUMN, WriteDisposition};
pub use error::{ExtractError, IngestError, WriteError};
pub use ingest::{IngestReport, ingest_collection};
pub use sink::{DestinationWriter, MemoryWarehouse, ParquetWarehouse, TableLocks, WarehouseClient, WriteStats};
pub use source::{ChunkedExtractor, ExtractStats, ExtractedBatch};
