//! Column type inference for delimited files.
//!
//! Each file is inferred independently from its header and data rows, then
//! the per-file schemas are unioned into the collection schema:
//!
//! | earlier   | incoming  | result      |
//! |-----------|-----------|-------------|
//! | T         | T         | T           |
//! | Null      | T         | T           |
//! | Int64     | Float64   | Float64     |
//! | other     | other     | conflict    |
//!
//! Within one file a column mixing numbers and text is simply text; across
//! files the same mix is a `SchemaConflict`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use csv_async::{AsyncReaderBuilder, StringRecord};
use snafu::ResultExt;
use tracing::debug;

use crate::config::SOURCE_FILE_COLUMN;
use crate::error::{CsvSnafu, ExtractError, IoSnafu};

/// Type observed for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Only empty cells seen so far.
    Null,
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl ColumnType {
    /// Classify a single cell. Empty or whitespace-only cells are `Null`.
    pub fn of_cell(cell: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() {
            ColumnType::Null
        } else if parse_bool(cell).is_some() {
            ColumnType::Boolean
        } else if cell.parse::<i64>().is_ok() {
            ColumnType::Int64
        } else if parse_float(cell).is_some() {
            ColumnType::Float64
        } else {
            ColumnType::Utf8
        }
    }

    /// Combine two observations from the same file. Never fails.
    fn widen(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Null, t) | (t, ColumnType::Null) => t,
            (ColumnType::Int64, ColumnType::Float64) | (ColumnType::Float64, ColumnType::Int64) => {
                ColumnType::Float64
            }
            _ => ColumnType::Utf8,
        }
    }

    /// Combine types of the same column from different files.
    fn unify(self, other: Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ColumnType::Null, t) | (t, ColumnType::Null) => Some(t),
            (ColumnType::Int64, ColumnType::Float64) | (ColumnType::Float64, ColumnType::Int64) => {
                Some(ColumnType::Float64)
            }
            _ => None,
        }
    }

    /// Arrow type for the column. Columns that never held a value are text.
    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Null | ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ColumnType::Null => "null",
            ColumnType::Boolean => "boolean",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Utf8 => "utf8",
        }
    }
}

pub(crate) fn parse_bool(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse a float, rejecting spellings like "nan" or "inf" that carry no digits.
pub(crate) fn parse_float(cell: &str) -> Option<f64> {
    if !cell.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    cell.parse::<f64>().ok()
}

/// Columns and inferred types of one file, in header order.
#[derive(Debug, Clone)]
pub struct FileSchema {
    pub path: PathBuf,
    pub columns: Vec<(String, ColumnType)>,
}

/// Options controlling per-file inference.
#[derive(Debug, Clone, Copy)]
pub struct InferOptions {
    pub delimiter: u8,
    /// Stop after this many data rows. `None` scans the whole file.
    pub sample_rows: Option<usize>,
}

/// Read a file's header and scan its rows to infer column types.
///
/// Rows whose field count differs from the header are ignored here; the
/// reader reports them under the collection's decode policy.
pub async fn infer_file_schema(
    path: &Path,
    options: InferOptions,
) -> Result<FileSchema, ExtractError> {
    let file = tokio::fs::File::open(path)
        .await
        .context(IoSnafu { path })?;
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .create_reader(file);

    let headers = read_header(&mut reader, path).await?;
    let mut types = vec![ColumnType::Null; headers.len()];

    let mut record = StringRecord::new();
    let mut scanned = 0usize;
    while options.sample_rows.is_none_or(|limit| scanned < limit)
        && reader
            .read_record(&mut record)
            .await
            .context(CsvSnafu { path })?
    {
        scanned += 1;
        if record.len() != headers.len() {
            continue;
        }
        for (slot, cell) in types.iter_mut().zip(record.iter()) {
            *slot = slot.widen(ColumnType::of_cell(cell));
        }
    }

    debug!(file = %path.display(), rows = scanned, columns = headers.len(), "Inferred file schema");

    Ok(FileSchema {
        path: path.to_path_buf(),
        columns: headers.into_iter().zip(types).collect(),
    })
}

/// Read and validate the header row: non-empty, names trimmed and unique.
pub(crate) async fn read_header<R>(
    reader: &mut csv_async::AsyncReader<R>,
    path: &Path,
) -> Result<Vec<String>, ExtractError>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let header = reader.headers().await.context(CsvSnafu { path })?;
    let names: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();

    if names.is_empty() || names.iter().all(String::is_empty) {
        return Err(ExtractError::MissingHeader {
            file: path.to_path_buf(),
        });
    }

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(ExtractError::DuplicateColumn {
                column: name.clone(),
                file: path.to_path_buf(),
            });
        }
    }

    Ok(names)
}

/// Union per-file schemas into the collection schema.
///
/// Columns keep first-seen order. Every column is nullable. When
/// `include_source_file` is set a non-null `_source_file` column is appended.
pub fn union_schemas(
    files: &[FileSchema],
    include_source_file: bool,
) -> Result<SchemaRef, ExtractError> {
    let mut columns: Vec<(String, ColumnType)> = Vec::new();

    for file in files {
        for (name, incoming) in &file.columns {
            if include_source_file && name == SOURCE_FILE_COLUMN {
                return Err(ExtractError::DuplicateColumn {
                    column: name.clone(),
                    file: file.path.clone(),
                });
            }

            match columns.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, existing)) => {
                    *existing =
                        existing
                            .unify(*incoming)
                            .ok_or_else(|| ExtractError::SchemaConflict {
                                column: name.clone(),
                                file: file.path.clone(),
                                existing: existing.name().to_string(),
                                incoming: incoming.name().to_string(),
                            })?;
                }
                None => columns.push((name.clone(), *incoming)),
            }
        }
    }

    let mut fields: Vec<Field> = columns
        .into_iter()
        .map(|(name, ty)| Field::new(name, ty.to_arrow(), true))
        .collect();
    if include_source_file {
        fields.push(Field::new(SOURCE_FILE_COLUMN, DataType::Utf8, false));
    }

    Ok(Arc::new(Schema::new(fields)))
}
