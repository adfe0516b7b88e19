//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and HTTP endpoint

pub mod events;
pub mod server;

pub use server::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test, init_without_endpoint,
};

/// Emit a metric event.
///
/// ```ignore
/// use floe_core::emit;
/// use floe_core::metrics::events::BatchExtracted;
///
/// emit!(BatchExtracted { rows: 100, target: "loans".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use crate::emit;
