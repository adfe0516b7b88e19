//! Local directory warehouse storing tables as Parquet files.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//! ├── _staging_loans/          # written table: flat part files
//! │   ├── part-00000.parquet
//! │   └── part-00001.parquet
//! └── loans/                   # promoted table: versioned snapshots
//!     ├── _current             # "v3"
//!     └── v3/
//!         └── part-00000.parquet
//! ```
//!
//! `promote` renames the staged directory to the next version and then
//! switches `_current` with an atomic write, so readers see either the old
//! or the new snapshot. Superseded versions are removed afterwards.

use std::io;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use snafu::ResultExt;
use tracing::{debug, warn};

use floe_core::fs::{atomic_write, remove_dir_if_exists};

use super::traits::WarehouseClient;
use crate::error::{ArrowSnafu, ParquetSnafu, WarehouseIoSnafu, WriteError};

const CURRENT_POINTER: &str = "_current";
const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Warehouse rooted at a local directory.
#[derive(Debug, Clone)]
pub struct ParquetWarehouse {
    root: PathBuf,
}

impl ParquetWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, WriteError> {
        let valid = !table.is_empty()
            && table != "."
            && table != ".."
            && !table.contains(['/', '\\']);
        if !valid {
            return Err(WriteError::WriteFailure {
                table: table.to_string(),
                message: "invalid table name".to_string(),
            });
        }
        Ok(self.root.join(table))
    }

    /// Directory holding the readable part files of a table, if it exists.
    async fn data_dir(&self, table: &str) -> Result<Option<PathBuf>, WriteError> {
        let dir = self.table_dir(table)?;
        if !path_exists(&dir).await? {
            return Ok(None);
        }
        match read_current(&dir).await? {
            Some(version) => Ok(Some(dir.join(version_name(version)))),
            None => Ok(Some(dir)),
        }
    }
}

fn version_name(version: u64) -> String {
    format!("v{version}")
}

fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.parse().ok()
}

fn part_name(index: usize) -> String {
    format!("{PART_PREFIX}{index:05}{PART_SUFFIX}")
}

fn is_part_file(name: &str) -> bool {
    name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX)
}

async fn path_exists(path: &Path) -> Result<bool, WriteError> {
    tokio::fs::try_exists(path)
        .await
        .context(WarehouseIoSnafu { path })
}

async fn read_current(dir: &Path) -> Result<Option<u64>, WriteError> {
    let pointer = dir.join(CURRENT_POINTER);
    match tokio::fs::read_to_string(&pointer).await {
        Ok(content) => Ok(parse_version(content.trim())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(WriteError::WarehouseIo {
            path: pointer,
            source,
        }),
    }
}

/// Names of the entries directly inside `dir`, sorted.
async fn list_names(dir: &Path) -> Result<Vec<String>, WriteError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context(WarehouseIoSnafu { path: dir })?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(WarehouseIoSnafu { path: dir })?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Writer properties fixed per build so identical batches encode to
/// identical bytes.
fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_created_by(format!("floe {}", env!("CARGO_PKG_VERSION")))
        .build()
}

fn encode_batch(table: &str, batch: &RecordBatch) -> Result<Vec<u8>, WriteError> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(writer_properties()))
        .context(ParquetSnafu { table })?;
    writer.write(batch).context(ParquetSnafu { table })?;
    writer.close().context(ParquetSnafu { table })?;
    Ok(buffer)
}

fn decode_file(table: &str, content: Bytes) -> Result<Vec<RecordBatch>, WriteError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(content)
        .context(ParquetSnafu { table })?
        .build()
        .context(ParquetSnafu { table })?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu { table })
}

#[async_trait]
impl WarehouseClient for ParquetWarehouse {
    async fn write(
        &self,
        table: &str,
        batch: &RecordBatch,
        truncate: bool,
    ) -> Result<(), WriteError> {
        let dir = self.table_dir(table)?;
        if truncate {
            remove_dir_if_exists(&dir)
                .await
                .context(WarehouseIoSnafu { path: &dir })?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .context(WarehouseIoSnafu { path: &dir })?;

        let index = list_names(&dir)
            .await?
            .iter()
            .filter(|name| is_part_file(name))
            .count();
        let path = dir.join(part_name(index));

        let content = encode_batch(table, batch)?;
        tokio::fs::write(&path, &content)
            .await
            .context(WarehouseIoSnafu { path: &path })?;

        debug!(table, part = index, bytes = content.len(), "Wrote part file");
        Ok(())
    }

    async fn promote(&self, staging: &str, table: &str) -> Result<(), WriteError> {
        let staging_dir = self.table_dir(staging)?;
        if !path_exists(&staging_dir).await? {
            return Err(WriteError::MissingStaging {
                staging: staging.to_string(),
            });
        }

        let dir = self.table_dir(table)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .context(WarehouseIoSnafu { path: &dir })?;

        let names = list_names(&dir).await?;
        let next = names
            .iter()
            .filter_map(|name| parse_version(name))
            .max()
            .map_or(1, |v| v + 1);
        let version_dir = dir.join(version_name(next));

        tokio::fs::rename(&staging_dir, &version_dir)
            .await
            .context(WarehouseIoSnafu {
                path: &version_dir,
            })?;
        atomic_write(&dir.join(CURRENT_POINTER), version_name(next).as_bytes())
            .await
            .context(WarehouseIoSnafu {
                path: dir.join(CURRENT_POINTER),
            })?;

        // Old snapshots and flat part files are unreachable now.
        for name in names {
            let path = dir.join(&name);
            let result = if parse_version(&name).is_some() {
                remove_dir_if_exists(&path).await
            } else if is_part_file(&name) {
                tokio::fs::remove_file(&path).await
            } else {
                continue;
            };
            if let Err(e) = result {
                warn!(table, path = %path.display(), error = %e, "Failed to remove superseded data");
            }
        }

        debug!(table, staging, version = next, "Promoted table");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<(), WriteError> {
        let dir = self.table_dir(table)?;
        remove_dir_if_exists(&dir)
            .await
            .context(WarehouseIoSnafu { path: dir })
    }

    async fn read_table(&self, table: &str) -> Result<Option<Vec<RecordBatch>>, WriteError> {
        let Some(dir) = self.data_dir(table).await? else {
            return Ok(None);
        };

        let mut batches = Vec::new();
        for name in list_names(&dir).await? {
            if !is_part_file(&name) {
                continue;
            }
            let path = dir.join(&name);
            let content = tokio::fs::read(&path)
                .await
                .context(WarehouseIoSnafu { path: &path })?;
            batches.extend(decode_file(table, Bytes::from(content))?);
        }
        Ok(Some(batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use tempfile::TempDir;

    fn batch(ids: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let names: Vec<String> = ids.iter().map(|i| format!("row-{i}")).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn rows(batches: &[RecordBatch]) -> usize {
        batches.iter().map(RecordBatch::num_rows).sum()
    }

    #[tokio::test]
    async fn test_write_and_read_flat_table() {
        let dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::new(dir.path());

        warehouse.write("t", &batch(vec![1, 2]), true).await.unwrap();
        warehouse.write("t", &batch(vec![3]), false).await.unwrap();

        let batches = warehouse.read_table("t").await.unwrap().unwrap();
        assert_eq!(rows(&batches), 3);
        assert!(dir.path().join("t").join("part-00001.parquet").exists());
        assert!(warehouse.read_table("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_replaces_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::new(dir.path());

        warehouse.write("_staging_t", &batch(vec![1, 2, 3]), true).await.unwrap();
        warehouse.promote("_staging_t", "t").await.unwrap();
        warehouse.write("_staging_t", &batch(vec![4]), true).await.unwrap();
        warehouse.promote("_staging_t", "t").await.unwrap();

        let table_dir = dir.path().join("t");
        assert_eq!(
            std::fs::read_to_string(table_dir.join(CURRENT_POINTER)).unwrap(),
            "v2"
        );
        assert!(!table_dir.join("v1").exists());
        assert!(!dir.path().join("_staging_t").exists());

        let batches = warehouse.read_table("t").await.unwrap().unwrap();
        assert_eq!(rows(&batches), 1);
    }

    #[tokio::test]
    async fn test_identical_batches_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::new(dir.path());

        warehouse.write("a", &batch(vec![1, 2]), true).await.unwrap();
        warehouse.write("b", &batch(vec![1, 2]), true).await.unwrap();

        let a = std::fs::read(dir.path().join("a").join("part-00000.parquet")).unwrap();
        let b = std::fs::read(dir.path().join("b").join("part-00000.parquet")).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_staging_and_bad_names() {
        let dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::new(dir.path());

        let err = warehouse.promote("_staging_x", "x").await.unwrap_err();
        assert!(matches!(err, WriteError::MissingStaging { .. }));

        let err = warehouse.write("../x", &batch(vec![1]), true).await.unwrap_err();
        assert!(matches!(err, WriteError::WriteFailure { .. }));

        warehouse.drop_table("never_created").await.unwrap();
    }
}
