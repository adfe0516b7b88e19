//! Common error types shared across the floe crates.
//!
//! Configuration, metrics and service setup errors live here. Domain errors
//! (extraction, writing, graph execution) are defined next to the code that
//! raises them.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source path is empty for a specific collection.
    #[snafu(display("Collection '{collection}' has empty source path"))]
    EmptySourcePathForCollection { collection: String },

    /// Chunk size must be at least one row.
    #[snafu(display("Collection '{collection}' has chunk_size 0 (must be >= 1)"))]
    InvalidChunkSize { collection: String },

    /// Glob pattern could not be compiled.
    #[snafu(display("Collection '{collection}' has invalid glob '{glob}': {message}"))]
    InvalidGlob {
        collection: String,
        glob: String,
        message: String,
    },

    /// Delimiter must be a single ASCII character.
    #[snafu(display("Collection '{collection}' has delimiter {delimiter:?}, expected a single ASCII character"))]
    InvalidDelimiter { collection: String, delimiter: char },

    /// A job, schedule or sensor references an asset that is not defined.
    #[snafu(display("{context} references unknown asset '{asset}'"))]
    UnknownAsset { context: String, asset: String },

    /// A schedule or sensor references a job that is not defined.
    #[snafu(display("{context} references unknown job '{job}'"))]
    UnknownJob { context: String, job: String },

    /// Cron expression could not be parsed.
    #[snafu(display("Schedule '{schedule}' has invalid cron expression '{expression}': {message}"))]
    InvalidCron {
        schedule: String,
        expression: String,
        message: String,
    },

    /// Sensor monitors no assets.
    #[snafu(display("Sensor '{sensor}' must monitor at least one asset"))]
    EmptySensor { sensor: String },

    /// Transform command is empty.
    #[snafu(display("Transform '{name}' has an empty command"))]
    EmptyCommand { name: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Resource conflict detected (e.g., two collections loading the same table).
    #[snafu(display("Resource conflict: {message}"))]
    ResourceConflict { message: String },

    /// Duplicate component keys found across config files.
    #[snafu(display("Duplicate component keys: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

// ============ Service Setup Errors ============

/// Errors that can occur while setting up services (before running).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceSetupError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize metrics.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },

    /// The application failed to construct its services.
    #[snafu(display("Failed to build services: {source}"))]
    Build {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
