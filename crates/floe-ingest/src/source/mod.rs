//! Source side: file discovery, schema inference and chunked reading.

mod inference;
mod listing;
mod reader;

pub use inference::{ColumnType, FileSchema, InferOptions, infer_file_schema, union_schemas};
pub use listing::list_source_files;
pub use reader::{ChunkedExtractor, ExtractStats, ExtractedBatch};
