//! Error types for extraction and table writing.

use std::path::PathBuf;

use snafu::prelude::*;

/// Errors raised while listing, inferring or reading source files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// Directory missing, or the glob matched nothing.
    #[snafu(display("No source files matching '{glob}' in {}", path.display()))]
    SourceNotFound { path: PathBuf, glob: String },

    /// A column appears with incompatible types in different files.
    #[snafu(display(
        "Column '{column}' is {existing} in earlier files but {incoming} in {}",
        file.display()
    ))]
    SchemaConflict {
        column: String,
        file: PathBuf,
        existing: String,
        incoming: String,
    },

    /// A header row names the same column twice.
    #[snafu(display("Duplicate column '{column}' in header of {}", file.display()))]
    DuplicateColumn { column: String, file: PathBuf },

    /// A file has no header row.
    #[snafu(display("Missing header row in {}", file.display()))]
    MissingHeader { file: PathBuf },

    /// A row could not be decoded against the unified schema.
    #[snafu(display("Malformed record in {} at line {line}: {message}", file.display()))]
    RecordDecode {
        file: PathBuf,
        line: u64,
        message: String,
    },

    /// The file glob could not be compiled.
    #[snafu(display("Invalid glob '{glob}': {source}"))]
    InvalidGlob { glob: String, source: globset::Error },

    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("CSV error in {}: {source}", path.display()))]
    Csv {
        path: PathBuf,
        source: csv_async::Error,
    },

    /// Arrow rejected the assembled batch.
    #[snafu(display("Failed to assemble record batch: {source}"))]
    BatchAssembly { source: arrow::error::ArrowError },
}

/// Errors raised by the destination writer and warehouse clients.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// Another run holds the table's write lock.
    #[snafu(display("Table '{table}' is already being written by another run"))]
    ConcurrentWriteConflict { table: String },

    /// The destination rejected a write.
    #[snafu(display("Write to '{table}' failed: {message}"))]
    WriteFailure { table: String, message: String },

    /// A batch does not match the schema the writer was opened with.
    #[snafu(display("Batch schema does not match table '{table}'"))]
    SchemaMismatch { table: String },

    /// Promotion found no staged data.
    #[snafu(display("Staging table '{staging}' does not exist"))]
    MissingStaging { staging: String },

    #[snafu(display("IO error on {}: {source}", path.display()))]
    WarehouseIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Parquet error for '{table}': {source}"))]
    Parquet {
        table: String,
        source: parquet::errors::ParquetError,
    },

    #[snafu(display("Arrow error for '{table}': {source}"))]
    Arrow {
        table: String,
        source: arrow::error::ArrowError,
    },
}

/// Errors from loading one collection end to end.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    #[snafu(display("Extraction failed: {source}"))]
    Extract { source: ExtractError },

    #[snafu(display("Write failed: {source}"))]
    Write { source: WriteError },

    /// Cancellation was requested between batches; the live table is unchanged.
    #[snafu(display("Ingestion of '{table}' cancelled"))]
    Cancelled { table: String },
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled { .. })
    }
}
