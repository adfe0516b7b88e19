//! Application abstraction shared by binaries.
//!
//! `Application::<C>::run()` owns the startup lifecycle so a binary's
//! `main` stays a one-liner.

use std::future::Future;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{CliArgs, ConfigPath, GlobalConfig, MetricsConfig};
use crate::error::ConfigError;
use crate::signal::spawn_shutdown_handler;
use crate::topology::{Service, ServiceContext, run_services};
use crate::tracing::init_tracing;

/// A configuration that knows how to build and run its services.
pub trait AppConfig: Sized + Sync {
    type Service: Service;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load config from paths with validation.
    fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError>;

    fn global(&self) -> &GlobalConfig;

    fn metrics(&self) -> &MetricsConfig;

    /// Log a summary of what was loaded.
    fn log_startup_info(&self);

    /// Build the long-running services.
    fn create_services(
        &self,
        context: ServiceContext,
    ) -> impl Future<Output = Result<Vec<Self::Service>, Self::Error>> + Send;

    /// Run one job to completion. Returns `true` when every asset succeeded.
    fn run_job(
        &self,
        job: &str,
        context: ServiceContext,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Application runner that handles the full startup lifecycle.
pub struct Application<C: AppConfig> {
    config: C,
}

impl<C: AppConfig> Application<C> {
    /// Parse arguments, load config and run until shutdown.
    pub fn run() -> ExitCode {
        init_tracing();

        let args = CliArgs::parse();
        let paths = args.config_paths();

        if paths.is_empty() {
            eprintln!("Error: no config files or directories specified");
            return ExitCode::FAILURE;
        }

        info!("Loading config from {} source(s)", paths.len());

        let app = match Self::from_paths(&paths) {
            Ok(app) => app,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        };

        if args.check {
            println!("Configuration OK");
            return ExitCode::SUCCESS;
        }

        app.execute(args.run_job.as_deref())
    }

    /// Load config from paths (useful for testing).
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config = C::from_paths(paths)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    fn execute(self, run_job: Option<&str>) -> ExitCode {
        self.config.log_startup_info();

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                eprintln!("Failed to start async runtime: {e}");
                return ExitCode::FAILURE;
            }
        };

        match run_job {
            Some(job) => runtime.block_on(self.execute_job(job)),
            None => runtime.block_on(self.execute_services()),
        }
    }

    async fn execute_job(&self, job: &str) -> ExitCode {
        let shutdown = CancellationToken::new();
        spawn_shutdown_handler(shutdown.clone());
        if let Err(e) = crate::metrics::init_without_endpoint() {
            warn!(error = %e, "Metrics recorder unavailable");
        }

        let context = ServiceContext::new(self.config.global(), shutdown);
        match self.config.run_job(job, context).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => {
                error!(job, "Job run finished with failed assets");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Job '{job}' could not run: {e}");
                ExitCode::FAILURE
            }
        }
    }

    async fn execute_services(&self) -> ExitCode {
        let result = run_services(
            &self.config.metrics().address,
            self.config.global(),
            |context| self.config.create_services(context),
        )
        .await;

        match result {
            Ok(0) => ExitCode::SUCCESS,
            Ok(failures) => {
                eprintln!("{failures} service(s) failed");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Startup failed: {e}");
                ExitCode::FAILURE
            }
        }
    }
}
