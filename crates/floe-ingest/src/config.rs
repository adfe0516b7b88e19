//! Source collection configuration.

use std::fmt;
use std::path::PathBuf;

use floe_core::config::{ComponentKey, Resource};
use floe_core::error::ConfigError;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

/// Name of the per-row column recording which file a row came from.
pub const SOURCE_FILE_COLUMN: &str = "_source_file";

/// Identifier for a source collection (e.g. "loans", "customers").
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionKey(ComponentKey);

impl CollectionKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(ComponentKey::new(id))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do with a row that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Drop the row, log it and count it.
    #[default]
    Skip,
    /// Fail the extraction on the first malformed row.
    Fail,
}

/// How a run's batches are applied to the destination table.
///
/// Only full replacement is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    #[default]
    Replace,
}

/// One directory of like-typed delimited files loaded into one table.
///
/// ```yaml
/// collections:
///   loans:
///     path: Data/fact_db
///     glob: "*.csv"
///     chunk_size: 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    /// Directory containing the source files.
    pub path: PathBuf,
    /// File name pattern, matched against names directly inside `path`.
    #[serde(default = "default_glob")]
    pub glob: String,
    /// Destination table name. Defaults to the collection key.
    #[serde(default)]
    pub table: Option<String>,
    /// Maximum rows per batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub on_decode_error: DecodePolicy,
    /// Rows per file scanned for type inference. `None` scans every row.
    #[serde(default)]
    pub infer_sample_rows: Option<usize>,
    /// Add a `_source_file` column naming each row's origin file.
    #[serde(default = "default_include_source_file")]
    pub include_source_file: bool,
    #[serde(default)]
    pub write_disposition: WriteDisposition,
}

fn default_glob() -> String {
    "*.csv".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_delimiter() -> char {
    ','
}

fn default_include_source_file() -> bool {
    true
}

impl CollectionConfig {
    /// A collection with default settings reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            glob: default_glob(),
            table: None,
            chunk_size: default_chunk_size(),
            delimiter: default_delimiter(),
            on_decode_error: DecodePolicy::default(),
            infer_sample_rows: None,
            include_source_file: default_include_source_file(),
            write_disposition: WriteDisposition::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.on_decode_error = policy;
        self
    }

    pub fn with_source_file_column(mut self, include: bool) -> Self {
        self.include_source_file = include;
        self
    }

    /// Destination table for this collection.
    pub fn table_name<'a>(&'a self, key: &'a CollectionKey) -> &'a str {
        self.table.as_deref().unwrap_or(key.id())
    }

    /// Compile the file name pattern.
    pub fn matcher(&self) -> Result<GlobMatcher, globset::Error> {
        Ok(Glob::new(&self.glob)?.compile_matcher())
    }

    /// The delimiter as a single byte, if it is ASCII.
    pub fn delimiter_byte(&self) -> Option<u8> {
        u8::try_from(self.delimiter).ok().filter(u8::is_ascii)
    }

    /// Exclusive resources: the destination table.
    pub fn resources(&self, key: &CollectionKey) -> Vec<Resource> {
        vec![Resource::table(self.table_name(key))]
    }

    /// Check the settings that serde cannot.
    pub fn validate(&self, key: &CollectionKey) -> Result<(), ConfigError> {
        let collection = key.id().to_string();

        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptySourcePathForCollection { collection });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize { collection });
        }
        if let Err(e) = self.matcher() {
            return Err(ConfigError::InvalidGlob {
                collection,
                glob: self.glob.clone(),
                message: e.to_string(),
            });
        }
        if self.delimiter_byte().is_none() {
            return Err(ConfigError::InvalidDelimiter {
                collection,
                delimiter: self.delimiter,
            });
        }
        Ok(())
    }
}
