//! Common configuration types shared by the ingestion and orchestration crates.

mod component_key;
mod global;
mod loader;
mod path;
mod resource;
mod vars;

pub use component_key::ComponentKey;
pub use global::GlobalConfig;
pub use loader::{Mergeable, load_from_paths, merge_unique};
pub use path::{CliArgs, ConfigPath, is_yaml_file};
pub use resource::Resource;
pub use vars::{InterpolationResult, interpolate};

use serde::{Deserialize, Serialize};

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

impl MetricsConfig {
    /// Merge values from another MetricsConfig (last-write-wins).
    pub fn merge_from(&mut self, other: Self) {
        if other.address != default_metrics_address() {
            self.address = other.address;
        }
    }
}

fn default_metrics_address() -> String {
    crate::metrics::DEFAULT_METRICS_ADDR.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_merge_keeps_explicit_address() {
        let mut base = MetricsConfig {
            address: "127.0.0.1:9100".to_string(),
        };
        base.merge_from(MetricsConfig::default());
        assert_eq!(base.address, "127.0.0.1:9100");

        base.merge_from(MetricsConfig {
            address: "127.0.0.1:9200".to_string(),
        });
        assert_eq!(base.address, "127.0.0.1:9200");
    }
}
