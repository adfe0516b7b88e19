//! floe-core: shared infrastructure for the floe crates.
//!
//! - `config/` - YAML loading, env interpolation, multi-file merge, keys
//! - `metrics/` - metric events and the Prometheus endpoint
//! - `topology/` - service runner with shared shutdown
//! - `polling` - interval-driven processor loop
//! - `signal` - graceful shutdown on termination signals
//! - `fs` - atomic local file writes
//! - `app` - binary startup lifecycle

pub mod app;
pub mod config;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod topology;
pub mod tracing;

pub use app::{AppConfig, Application};
pub use config::{CliArgs, ComponentKey, ConfigPath, GlobalConfig, MetricsConfig, Resource};
pub use error::{ConfigError, MetricsError, ServiceSetupError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, run_polling_loop};
pub use signal::{shutdown_signal, spawn_shutdown_handler};
pub use topology::{Service, ServiceContext, ServiceRunner, random_jitter, run_services};
pub use self::tracing::init_tracing;
