//! Load one collection into its table.

use std::sync::Arc;

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{CollectionConfig, CollectionKey};
use crate::error::{ExtractSnafu, IngestError, WriteSnafu};
use crate::sink::{DestinationWriter, TableLocks, WarehouseClient};
use crate::source::ChunkedExtractor;

/// Outcome of a successful collection load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub table: String,
    pub batches: usize,
    /// Row count of each batch, in order.
    pub batch_rows: Vec<usize>,
    pub rows_written: usize,
    pub records_skipped: usize,
    pub files_read: usize,
}

/// Extract every file of a collection and replace its table.
///
/// Cancellation is checked between batches. Any error or cancellation aborts
/// the write, leaving the live table as it was.
pub async fn ingest_collection(
    key: &CollectionKey,
    config: &CollectionConfig,
    client: Arc<dyn WarehouseClient>,
    locks: &TableLocks,
    shutdown: &CancellationToken,
) -> Result<IngestReport, IngestError> {
    let table = config.table_name(key).to_string();

    let mut extractor = ChunkedExtractor::open(key.id(), config)
        .await
        .context(ExtractSnafu)?;
    let mut writer = DestinationWriter::begin(client, locks, &table, extractor.schema())
        .context(WriteSnafu)?;

    let mut batch_rows = Vec::new();
    loop {
        if shutdown.is_cancelled() {
            writer.abort().await;
            return Err(IngestError::Cancelled { table });
        }

        let next = match extractor.next_batch().await {
            Ok(next) => next,
            Err(source) => {
                writer.abort().await;
                return Err(IngestError::Extract { source });
            }
        };
        let Some(extracted) = next else {
            break;
        };

        if let Err(source) = writer.write_batch(&extracted.batch).await {
            writer.abort().await;
            return Err(IngestError::Write { source });
        }
        batch_rows.push(extracted.batch.num_rows());
    }

    if shutdown.is_cancelled() {
        writer.abort().await;
        return Err(IngestError::Cancelled { table });
    }

    let written = writer.commit().await.context(WriteSnafu)?;
    let stats = extractor.stats();

    info!(
        target = %key,
        table = %table,
        batches = written.batches_written,
        rows = written.rows_written,
        skipped = stats.records_skipped,
        files = stats.files_read,
        "Collection ingested"
    );

    Ok(IngestReport {
        table,
        batches: written.batches_written,
        batch_rows,
        rows_written: written.rows_written,
        records_skipped: stats.records_skipped,
        files_read: stats.files_read,
    })
}
