//! Service runner.
//!
//! A process hosts several independent services (schedule timers, sensor
//! poll loops, the run dispatcher). They share one cancellation token and are
//! started with optional jitter.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use snafu::ResultExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::GlobalConfig;
use crate::error::{AddressParseSnafu, BuildSnafu, MetricsSnafu, ServiceSetupError};
use crate::signal::spawn_shutdown_handler;

/// Shared resources handed to every service.
#[derive(Clone)]
pub struct ServiceContext {
    /// Process-wide limit on concurrently materializing assets.
    pub global_semaphore: Option<Arc<Semaphore>>,
    /// Maximum jitter in seconds to add to poll intervals.
    pub poll_jitter_secs: u64,
    /// Cancellation token for graceful shutdown.
    pub shutdown: CancellationToken,
}

impl ServiceContext {
    pub fn new(global: &GlobalConfig, shutdown: CancellationToken) -> Self {
        Self {
            global_semaphore: global.total_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            poll_jitter_secs: global.poll_jitter_secs,
            shutdown,
        }
    }
}

/// A self-contained unit that runs until shutdown or failure.
pub trait Service: Send + 'static {
    type Key: Clone + Display + Send + 'static;
    type Error: std::error::Error + Send + 'static;

    fn key(&self) -> &Self::Key;

    /// Whether this service should start after the jittered delay.
    fn jittered_start(&self) -> bool {
        true
    }

    fn run(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Runs a set of services to completion.
pub struct ServiceRunner<S: Service> {
    services: Vec<S>,
    shutdown: CancellationToken,
    poll_jitter_secs: u64,
}

impl<S: Service> ServiceRunner<S> {
    pub fn new(services: Vec<S>, shutdown: CancellationToken, poll_jitter_secs: u64) -> Self {
        Self {
            services,
            shutdown,
            poll_jitter_secs,
        }
    }

    /// Run every service; returns once all of them have exited.
    ///
    /// Returns the number of services that ended with an error or panicked.
    pub async fn run(self) -> usize {
        let mut handles: JoinSet<(S::Key, Result<(), S::Error>)> = JoinSet::new();

        for service in self.services {
            let shutdown = self.shutdown.clone();
            let key = service.key().clone();
            let start_jitter = if service.jittered_start() {
                random_jitter(self.poll_jitter_secs)
            } else {
                Duration::ZERO
            };

            handles.spawn(async move {
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_ms = start_jitter.as_millis(),
                        "Delaying service start for jitter"
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        return (key, Ok(()));
                    }
                }

                let result = service.run().await;
                (key, result)
            });
        }

        info!("Spawned {} services", handles.len());

        let mut failures = 0;
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((key, Ok(()))) => info!(target = %key, "Service stopped"),
                Ok((key, Err(e))) => {
                    failures += 1;
                    error!(target = %key, error = %e, "Service failed");
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "Service task panicked");
                }
            }
        }

        info!("All services stopped");
        failures
    }
}

/// Initialize metrics, build services and run them until shutdown.
///
/// `create_services` receives the shared context and may perform async setup
/// (opening state stores, preparing warehouse directories).
pub async fn run_services<S, F, Fut, E>(
    metrics_address: &str,
    global: &GlobalConfig,
    create_services: F,
) -> Result<usize, ServiceSetupError>
where
    S: Service,
    F: FnOnce(ServiceContext) -> Fut,
    Fut: Future<Output = Result<Vec<S>, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let addr = metrics_address.parse().context(AddressParseSnafu)?;
    crate::metrics::init_global(addr).context(MetricsSnafu)?;

    let shutdown = CancellationToken::new();
    let context = ServiceContext::new(global, shutdown.clone());

    let services = create_services(context)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        .context(BuildSnafu)?;

    spawn_shutdown_handler(shutdown.clone());
    let runner = ServiceRunner::new(services, shutdown, global.poll_jitter_secs);
    Ok(runner.run().await)
}

/// Random duration in `[0, max_secs)`.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_random_jitter_zero() {
        assert_eq!(random_jitter(0), Duration::ZERO);
    }

    #[test]
    fn test_random_jitter_within_bounds() {
        for _ in 0..100 {
            assert!(random_jitter(3) < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_context_semaphore() {
        let ctx = ServiceContext::new(&GlobalConfig::with_concurrency(2), CancellationToken::new());
        assert_eq!(ctx.global_semaphore.unwrap().available_permits(), 2);

        let ctx = ServiceContext::new(&GlobalConfig::default(), CancellationToken::new());
        assert!(ctx.global_semaphore.is_none());
    }

    #[derive(Debug, snafu::Snafu)]
    #[snafu(display("service failed"))]
    struct Failed;

    struct TestService {
        key: String,
        fail: bool,
        shutdown: CancellationToken,
        stopped: Arc<AtomicUsize>,
    }

    impl Service for TestService {
        type Key = String;
        type Error = Failed;

        fn key(&self) -> &String {
            &self.key
        }

        async fn run(self) -> Result<(), Failed> {
            if self.fail {
                return Err(Failed);
            }
            self.shutdown.cancelled().await;
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runner_counts_failures_and_waits_for_shutdown() {
        let shutdown = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let services = vec![
            TestService {
                key: "ok".into(),
                fail: false,
                shutdown: shutdown.clone(),
                stopped: stopped.clone(),
            },
            TestService {
                key: "bad".into(),
                fail: true,
                shutdown: shutdown.clone(),
                stopped: stopped.clone(),
            },
        ];

        let runner = ServiceRunner::new(services, shutdown.clone(), 0);
        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
