//! Source file discovery.
//!
//! Files are matched by name (not by full path) against the collection glob
//! and returned in lexicographic order, which fixes the row order of a run.

use std::io;
use std::path::PathBuf;

use snafu::ResultExt;
use tracing::debug;

use floe_core::emit;
use floe_core::metrics::events::FilesDiscovered;

use crate::config::CollectionConfig;
use crate::error::{ExtractError, InvalidGlobSnafu, IoSnafu};

/// List the regular files directly inside the collection directory whose
/// names match its glob, sorted lexicographically.
///
/// A missing directory and an empty match set are both `SourceNotFound`.
pub async fn list_source_files(
    config: &CollectionConfig,
    target: &str,
) -> Result<Vec<PathBuf>, ExtractError> {
    let matcher = config.matcher().context(InvalidGlobSnafu {
        glob: config.glob.clone(),
    })?;

    let mut entries = match tokio::fs::read_dir(&config.path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found(config)),
        Err(source) => {
            return Err(ExtractError::Io {
                path: config.path.clone(),
                source,
            });
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.context(IoSnafu {
        path: config.path.clone(),
    })? {
        let path = entry.path();
        let name_matches = path
            .file_name()
            .is_some_and(|name| matcher.is_match(name));
        if !name_matches {
            continue;
        }

        // metadata() follows symlinks, so linked files are included.
        let metadata = tokio::fs::metadata(&path)
            .await
            .context(IoSnafu { path: path.clone() })?;
        if metadata.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(not_found(config));
    }

    files.sort();

    emit!(FilesDiscovered {
        count: files.len() as u64,
        target: target.to_string(),
    });
    debug!(target = %target, files = files.len(), "Listed source files");

    Ok(files)
}

fn not_found(config: &CollectionConfig) -> ExtractError {
    ExtractError::SourceNotFound {
        path: config.path.clone(),
        glob: config.glob.clone(),
    }
}
