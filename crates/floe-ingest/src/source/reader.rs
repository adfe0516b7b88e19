//! Chunked extraction of a collection into Arrow record batches.
//!
//! The extractor holds at most one open file and one partially built batch,
//! so memory is bounded by `chunk_size` regardless of collection size.
//! Batches fill across file boundaries: only the final batch of a run may
//! hold fewer than `chunk_size` rows.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use arrow::datatypes::{DataType, SchemaRef};
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use snafu::ResultExt;
use tokio::fs::File;
use tracing::{debug, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{BatchExtracted, RecordsSkipped};

use super::inference::{
    InferOptions, infer_file_schema, parse_bool, parse_float, read_header, union_schemas,
};
use super::listing::list_source_files;
use crate::config::{CollectionConfig, DecodePolicy};
use crate::error::{BatchAssemblySnafu, CsvSnafu, ExtractError, IoSnafu};

/// One batch handed to the writer.
#[derive(Debug, Clone)]
pub struct ExtractedBatch {
    pub batch: RecordBatch,
    /// Files that contributed rows to this batch, in read order.
    pub source_files: Vec<PathBuf>,
    /// Zero-based position of this batch in the run.
    pub sequence: usize,
}

/// Counters for a finished or in-progress extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files_read: usize,
    pub rows_emitted: usize,
    pub records_skipped: usize,
    pub batches_emitted: usize,
}

/// A file currently being read.
struct OpenFile {
    path: PathBuf,
    /// Value written to the `_source_file` column.
    label: String,
    reader: AsyncReader<File>,
    /// For each header column, its index in the collection schema.
    mapping: Vec<usize>,
}

/// Streams a collection as a sequence of record batches of `chunk_size` rows.
pub struct ChunkedExtractor {
    target: String,
    schema: SchemaRef,
    chunk_size: usize,
    policy: DecodePolicy,
    delimiter: u8,
    include_source_file: bool,
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    record: StringRecord,
    stats: ExtractStats,
    exhausted: bool,
}

impl ChunkedExtractor {
    /// List the collection's files and infer the unified schema.
    ///
    /// Fails before any batch is produced on `SourceNotFound`,
    /// `SchemaConflict` or a bad header.
    pub async fn open(target: &str, config: &CollectionConfig) -> Result<Self, ExtractError> {
        let files = list_source_files(config, target).await?;
        let delimiter = config.delimiter_byte().unwrap_or(b',');

        let options = InferOptions {
            delimiter,
            sample_rows: config.infer_sample_rows,
        };
        let mut file_schemas = Vec::with_capacity(files.len());
        for file in &files {
            file_schemas.push(infer_file_schema(file, options).await?);
        }
        let schema = union_schemas(&file_schemas, config.include_source_file)?;

        info!(
            target = %target,
            files = files.len(),
            columns = schema.fields().len(),
            chunk_size = config.chunk_size,
            "Opened collection"
        );

        Ok(Self {
            target: target.to_string(),
            schema,
            chunk_size: config.chunk_size.max(1),
            policy: config.on_decode_error,
            delimiter,
            include_source_file: config.include_source_file,
            pending: files.into(),
            current: None,
            record: StringRecord::new(),
            stats: ExtractStats::default(),
            exhausted: false,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn stats(&self) -> ExtractStats {
        self.stats
    }

    /// Produce the next batch, or `None` once every file is consumed.
    ///
    /// After an error or `None` the extractor is exhausted and keeps
    /// returning `None`.
    pub async fn next_batch(&mut self) -> Result<Option<ExtractedBatch>, ExtractError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.fill_batch().await {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.exhausted = true;
                debug!(target = %self.target, stats = ?self.stats, "Extraction complete");
                Ok(None)
            }
            Err(e) => {
                self.exhausted = true;
                self.current = None;
                Err(e)
            }
        }
    }

    async fn fill_batch(&mut self) -> Result<Option<ExtractedBatch>, ExtractError> {
        let mut builder =
            BatchBuilder::new(&self.schema, self.chunk_size, self.include_source_file);
        let mut source_files = Vec::new();

        while builder.len() < self.chunk_size {
            if self.current.is_none() && !self.open_next_file().await? {
                break;
            }
            let Some(file) = self.current.as_mut() else {
                break;
            };

            let more = file
                .reader
                .read_record(&mut self.record)
                .await
                .context(CsvSnafu { path: &file.path })?;
            if !more {
                self.stats.files_read += 1;
                self.current = None;
                continue;
            }

            match decode_row(&self.record, &file.mapping, &builder.types) {
                Ok(cells) => {
                    let label = self.include_source_file.then_some(file.label.as_str());
                    builder.append(&cells, label);
                    if source_files.last() != Some(&file.path) {
                        source_files.push(file.path.clone());
                    }
                }
                Err(message) => {
                    let line = self.record.position().map_or(0, |p| p.line());
                    match self.policy {
                        DecodePolicy::Fail => {
                            return Err(ExtractError::RecordDecode {
                                file: file.path.clone(),
                                line,
                                message,
                            });
                        }
                        DecodePolicy::Skip => {
                            warn!(
                                target = %self.target,
                                file = %file.path.display(),
                                line,
                                error = %message,
                                "Skipping malformed record"
                            );
                            self.stats.records_skipped += 1;
                            emit!(RecordsSkipped {
                                count: 1,
                                target: self.target.clone(),
                            });
                        }
                    }
                }
            }
        }

        if builder.len() == 0 {
            return Ok(None);
        }

        let rows = builder.len();
        let batch = builder.finish(self.schema.clone())?;
        let sequence = self.stats.batches_emitted;
        self.stats.batches_emitted += 1;
        self.stats.rows_emitted += rows;

        emit!(BatchExtracted {
            rows: rows as u64,
            target: self.target.clone(),
        });
        debug!(target = %self.target, sequence, rows, "Extracted batch");

        Ok(Some(ExtractedBatch {
            batch,
            source_files,
            sequence,
        }))
    }

    /// Open the next pending file. Returns false when none remain.
    async fn open_next_file(&mut self) -> Result<bool, ExtractError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(false);
        };

        let handle = File::open(&path).await.context(IoSnafu { path: &path })?;
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .create_reader(handle);
        let headers = read_header(&mut reader, &path).await?;

        let mapping = headers
            .iter()
            .map(|name| {
                self.schema
                    .index_of(name)
                    .map_err(|source| ExtractError::BatchAssembly { source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target = %self.target, file = %path.display(), "Reading file");

        self.current = Some(OpenFile {
            label: file_label(&path),
            path,
            reader,
            mapping,
        });
        Ok(true)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A cell decoded against its column type.
#[derive(Debug, Clone, Copy)]
enum Cell<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'a str),
}

/// Decode every cell of a row before anything is appended, so a bad cell
/// leaves the batch untouched. Returns one cell per schema column.
fn decode_row<'a>(
    record: &'a StringRecord,
    mapping: &[usize],
    types: &[DataType],
) -> Result<Vec<Cell<'a>>, String> {
    if record.len() != mapping.len() {
        return Err(format!(
            "expected {} fields, found {}",
            mapping.len(),
            record.len()
        ));
    }

    let mut cells = vec![Cell::Null; types.len()];
    for (raw, &column) in record.iter().zip(mapping) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        cells[column] = match &types[column] {
            DataType::Int64 => trimmed
                .parse::<i64>()
                .map(Cell::Int)
                .map_err(|_| format!("expected integer, found '{trimmed}'"))?,
            DataType::Float64 => parse_float(trimmed)
                .map(Cell::Float)
                .ok_or_else(|| format!("expected number, found '{trimmed}'"))?,
            DataType::Boolean => parse_bool(trimmed)
                .map(Cell::Bool)
                .ok_or_else(|| format!("expected boolean, found '{trimmed}'"))?,
            _ => Cell::Text(raw),
        };
    }
    Ok(cells)
}

enum ColumnBuilder {
    Bool(BooleanBuilder),
    Int(Int64Builder),
    Float(Float64Builder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn new(data_type: &DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Boolean => ColumnBuilder::Bool(BooleanBuilder::with_capacity(capacity)),
            DataType::Int64 => ColumnBuilder::Int(Int64Builder::with_capacity(capacity)),
            DataType::Float64 => ColumnBuilder::Float(Float64Builder::with_capacity(capacity)),
            _ => ColumnBuilder::Text(StringBuilder::with_capacity(capacity, capacity * 16)),
        }
    }

    fn append(&mut self, cell: Cell<'_>) {
        match (self, cell) {
            (ColumnBuilder::Bool(b), Cell::Bool(v)) => b.append_value(v),
            (ColumnBuilder::Int(b), Cell::Int(v)) => b.append_value(v),
            (ColumnBuilder::Float(b), Cell::Float(v)) => b.append_value(v),
            (ColumnBuilder::Text(b), Cell::Text(v)) => b.append_value(v),
            (builder, _) => builder.append_null(),
        }
    }

    fn append_null(&mut self) {
        match self {
            ColumnBuilder::Bool(b) => b.append_null(),
            ColumnBuilder::Int(b) => b.append_null(),
            ColumnBuilder::Float(b) => b.append_null(),
            ColumnBuilder::Text(b) => b.append_null(),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::Bool(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Text(mut b) => Arc::new(b.finish()),
        }
    }
}

/// Column builders for one batch, plus the trailing source file column.
struct BatchBuilder {
    types: Vec<DataType>,
    columns: Vec<ColumnBuilder>,
    source_file: Option<StringBuilder>,
    rows: usize,
}

impl BatchBuilder {
    fn new(schema: &SchemaRef, capacity: usize, has_source_column: bool) -> Self {
        let mut types: Vec<DataType> = schema
            .fields()
            .iter()
            .map(|f| f.data_type().clone())
            .collect();

        // The source file column is filled per row rather than decoded.
        if has_source_column {
            types.pop();
        }

        Self {
            columns: types
                .iter()
                .map(|t| ColumnBuilder::new(t, capacity))
                .collect(),
            types,
            source_file: has_source_column
                .then(|| StringBuilder::with_capacity(capacity, capacity * 16)),
            rows: 0,
        }
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn append(&mut self, cells: &[Cell<'_>], source_file: Option<&str>) {
        for (builder, cell) in self.columns.iter_mut().zip(cells) {
            builder.append(*cell);
        }
        if let Some(builder) = self.source_file.as_mut() {
            builder.append_value(source_file.unwrap_or_default());
        }
        self.rows += 1;
    }

    fn finish(self, schema: SchemaRef) -> Result<RecordBatch, ExtractError> {
        let mut arrays: Vec<ArrayRef> = self.columns.into_iter().map(ColumnBuilder::finish).collect();
        if let Some(mut builder) = self.source_file {
            arrays.push(Arc::new(builder.finish()));
        }
        RecordBatch::try_new(schema, arrays).context(BatchAssemblySnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::Int64Type;
    use tempfile::TempDir;

    use crate::config::SOURCE_FILE_COLUMN;

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    async fn drain(extractor: &mut ChunkedExtractor) -> Vec<ExtractedBatch> {
        let mut batches = Vec::new();
        while let Some(batch) = extractor.next_batch().await.unwrap() {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test]
    async fn test_batches_span_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.csv", "id,name\n1,x\n2,y\n3,z\n");
        write(&dir, "b.csv", "id,name\n4,w\n5,v\n");

        let config = CollectionConfig::new(dir.path()).with_chunk_size(2);
        let mut extractor = ChunkedExtractor::open("t", &config).await.unwrap();
        let batches = drain(&mut extractor).await;

        let sizes: Vec<_> = batches.iter().map(|b| b.batch.num_rows()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[1].source_files.len(), 2);
        assert_eq!(batches[2].sequence, 2);

        let stats = extractor.stats();
        assert_eq!(stats.files_read, 2);
        assert_eq!(stats.rows_emitted, 5);
        assert_eq!(stats.batches_emitted, 3);

        // Exhausted extractors keep returning None.
        assert!(extractor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_columns_are_null() {
        let dir = TempDir::new().unwrap();
        write(&dir, "1.csv", "a,b\n1,one\n");
        write(&dir, "2.csv", "b,c\ntwo,2.5\n");

        let config = CollectionConfig::new(dir.path());
        let mut extractor = ChunkedExtractor::open("t", &config).await.unwrap();
        let batch = extractor.next_batch().await.unwrap().unwrap().batch;

        assert_eq!(batch.num_rows(), 2);
        let names: Vec<_> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", SOURCE_FILE_COLUMN]);

        let a = batch.column(0).as_primitive::<Int64Type>();
        assert_eq!(a.value(0), 1);
        assert!(a.is_null(1));
        assert!(batch.column(2).is_null(0));

        let files = batch.column(3).as_string::<i32>();
        assert_eq!(files.value(0), "1.csv");
        assert_eq!(files.value(1), "2.csv");
    }

    #[tokio::test]
    async fn test_skip_policy_drops_bad_rows() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.csv", "id,flag\n1,true\n2,false,extra\n3,false\n");

        let config = CollectionConfig::new(dir.path()).with_source_file_column(false);
        let mut extractor = ChunkedExtractor::open("t", &config).await.unwrap();
        let batches = drain(&mut extractor).await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].batch.num_rows(), 2);
        assert_eq!(extractor.stats().records_skipped, 1);
    }

    #[tokio::test]
    async fn test_fail_policy_reports_line() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.csv", "id\n1\n2\n");
        write(&dir, "b.csv", "id\n3\nfour\n");

        let config = CollectionConfig::new(dir.path())
            .with_decode_policy(DecodePolicy::Fail)
            .with_chunk_size(10);
        // Sample one row per file so "four" stays out of the inferred type.
        let config = CollectionConfig {
            infer_sample_rows: Some(1),
            ..config
        };
        let mut extractor = ChunkedExtractor::open("t", &config).await.unwrap();

        let err = extractor.next_batch().await.unwrap_err();
        match err {
            ExtractError::RecordDecode { file, line, .. } => {
                assert!(file.ends_with("b.csv"));
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(extractor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schema_conflict_fails_open() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.csv", "id\n1\n");
        write(&dir, "b.csv", "id\nabc\n");

        let config = CollectionConfig::new(dir.path());
        let result = ChunkedExtractor::open("t", &config).await;
        assert!(matches!(result, Err(ExtractError::SchemaConflict { .. })));
    }
}
