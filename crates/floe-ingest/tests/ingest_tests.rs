//! Integration tests for loading collections end to end.
//!
//! Run with: cargo test -p floe-ingest --test ingest_tests

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::{AsArray, RecordBatch};
use arrow::datatypes::Int64Type;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use floe_ingest::error::WriteError;
use floe_ingest::{
    CollectionConfig, CollectionKey, IngestError, MemoryWarehouse, ParquetWarehouse, TableLocks,
    WarehouseClient, ingest_collection,
};

fn write_ids(dir: &Path, name: &str, ids: std::ops::Range<i64>) {
    let mut content = String::from("id,label\n");
    for id in ids {
        content.push_str(&format!("{id},item-{id}\n"));
    }
    std::fs::write(dir.join(name), content).unwrap();
}

fn ids(batches: &[RecordBatch]) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
        .collect()
}

/// Fails every write after the first `allowed`.
struct FlakyWarehouse {
    inner: MemoryWarehouse,
    allowed: usize,
    writes: AtomicUsize,
}

#[async_trait]
impl WarehouseClient for FlakyWarehouse {
    async fn write(&self, table: &str, batch: &RecordBatch, truncate: bool) -> Result<(), WriteError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(WriteError::WriteFailure {
                table: table.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.inner.write(table, batch, truncate).await
    }

    async fn promote(&self, staging: &str, table: &str) -> Result<(), WriteError> {
        self.inner.promote(staging, table).await
    }

    async fn drop_table(&self, table: &str) -> Result<(), WriteError> {
        self.inner.drop_table(table).await
    }

    async fn read_table(&self, table: &str) -> Result<Option<Vec<RecordBatch>>, WriteError> {
        self.inner.read_table(table).await
    }
}

#[tokio::test]
async fn test_chunking_preserves_rows_for_any_chunk_size() {
    let dir = TempDir::new().unwrap();
    write_ids(dir.path(), "a.csv", 0..5);
    write_ids(dir.path(), "b.csv", 5..8);
    write_ids(dir.path(), "c.csv", 8..8);
    write_ids(dir.path(), "d.csv", 8..21);

    let key = CollectionKey::new("items");
    for chunk_size in [1, 2, 3, 7, 20, 21, 100] {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let config = CollectionConfig::new(dir.path()).with_chunk_size(chunk_size);

        let report = ingest_collection(
            &key,
            &config,
            warehouse.clone(),
            &TableLocks::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.rows_written, 21, "chunk_size {chunk_size}");
        assert_eq!(report.files_read, 4);
        let (last, full) = report.batch_rows.split_last().unwrap();
        assert!(full.iter().all(|&n| n == chunk_size));
        assert!(*last >= 1 && *last <= chunk_size);

        let batches = warehouse.read_table("items").await.unwrap().unwrap();
        assert_eq!(ids(&batches), (0..21).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_reload_is_byte_identical() {
    let source = TempDir::new().unwrap();
    write_ids(source.path(), "a.csv", 0..40);
    write_ids(source.path(), "b.csv", 40..55);

    let out = TempDir::new().unwrap();
    let warehouse = Arc::new(ParquetWarehouse::new(out.path()));
    let key = CollectionKey::new("items");
    let config = CollectionConfig::new(source.path()).with_chunk_size(16);

    let snapshot = |version: &str| -> Vec<Vec<u8>> {
        let dir = out.path().join("items").join(version);
        let mut names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        names.iter().map(|p| std::fs::read(p).unwrap()).collect()
    };

    let locks = TableLocks::new();
    let token = CancellationToken::new();
    ingest_collection(&key, &config, warehouse.clone(), &locks, &token)
        .await
        .unwrap();
    let first = snapshot("v1");

    ingest_collection(&key, &config, warehouse.clone(), &locks, &token)
        .await
        .unwrap();
    let second = snapshot("v2");

    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
    assert!(!out.path().join("items").join("v1").exists());

    let batches = warehouse.read_table("items").await.unwrap().unwrap();
    assert_eq!(ids(&batches).len(), 55);
}

#[tokio::test]
async fn test_failed_write_keeps_live_table() {
    let dir = TempDir::new().unwrap();
    write_ids(dir.path(), "a.csv", 0..30);

    let warehouse = Arc::new(FlakyWarehouse {
        inner: MemoryWarehouse::new(),
        allowed: 2,
        writes: AtomicUsize::new(0),
    });
    let key = CollectionKey::new("items");
    let config = CollectionConfig::new(dir.path()).with_chunk_size(10);
    let previous = {
        let old_dir = TempDir::new().unwrap();
        std::fs::write(old_dir.path().join("old.csv"), "id,label\n1,old\n2,old\n").unwrap();
        let mut extractor = floe_ingest::ChunkedExtractor::open(
            "items",
            &CollectionConfig::new(old_dir.path()),
        )
        .await
        .unwrap();
        extractor.next_batch().await.unwrap().unwrap().batch
    };
    warehouse.inner.write("items", &previous, true).await.unwrap();

    let err = ingest_collection(
        &key,
        &config,
        warehouse.clone(),
        &TableLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Write {
            source: WriteError::WriteFailure { .. }
        }
    ));
    assert_eq!(warehouse.inner.row_count("items").await, Some(2));
    assert_eq!(warehouse.inner.table_names().await, vec!["items"]);
}

#[tokio::test]
async fn test_cancelled_ingest_leaves_table_untouched() {
    let dir = TempDir::new().unwrap();
    write_ids(dir.path(), "a.csv", 0..10);

    let warehouse = Arc::new(MemoryWarehouse::new());
    let token = CancellationToken::new();
    token.cancel();

    let err = ingest_collection(
        &CollectionKey::new("items"),
        &CollectionConfig::new(dir.path()),
        warehouse.clone(),
        &TableLocks::new(),
        &token,
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert!(warehouse.table_names().await.is_empty());
}

#[tokio::test]
async fn test_header_only_files_replace_with_empty_table() {
    let dir = TempDir::new().unwrap();
    write_ids(dir.path(), "a.csv", 0..0);

    let warehouse = Arc::new(MemoryWarehouse::new());
    let report = ingest_collection(
        &CollectionKey::new("items"),
        &CollectionConfig::new(dir.path()),
        warehouse.clone(),
        &TableLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.rows_written, 0);
    assert!(report.batch_rows.is_empty());
    assert_eq!(warehouse.row_count("items").await, Some(0));
}

#[tokio::test]
async fn test_held_table_lock_conflicts() {
    let dir = TempDir::new().unwrap();
    write_ids(dir.path(), "a.csv", 0..3);

    let locks = TableLocks::new();
    let _held = locks.try_acquire("items").unwrap();

    let err = ingest_collection(
        &CollectionKey::new("items"),
        &CollectionConfig::new(dir.path()),
        Arc::new(MemoryWarehouse::new()),
        &locks,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Write {
            source: WriteError::ConcurrentWriteConflict { .. }
        }
    ));
}

#[tokio::test]
async fn test_missing_source_fails_before_writing() {
    let dir = TempDir::new().unwrap();
    let warehouse = Arc::new(MemoryWarehouse::new());

    let err = ingest_collection(
        &CollectionKey::new("items"),
        &CollectionConfig::new(dir.path().join("absent")),
        warehouse.clone(),
        &TableLocks::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Extract { .. }));
    assert!(warehouse.table_names().await.is_empty());
}
