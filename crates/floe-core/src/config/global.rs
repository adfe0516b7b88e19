//! Process-wide configuration.

use serde::{Deserialize, Serialize};

/// Options that apply to every component running in the process.
///
/// ```
/// use floe_core::config::GlobalConfig;
///
/// let config = GlobalConfig::default();
/// assert_eq!(config.total_concurrency, None);
/// assert_eq!(config.poll_jitter_secs, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Upper bound on assets materializing at the same time across all runs.
    ///
    /// `None` leaves parallelism bounded only by the dependency topology.
    #[serde(default)]
    pub total_concurrency: Option<usize>,

    /// Maximum random delay (seconds) added to poll intervals and service starts.
    #[serde(default)]
    pub poll_jitter_secs: u64,
}

impl GlobalConfig {
    /// Create a GlobalConfig with a specific concurrency limit.
    pub fn with_concurrency(limit: usize) -> Self {
        Self {
            total_concurrency: Some(limit),
            ..Self::default()
        }
    }

    /// Merge values from another GlobalConfig (last explicit value wins).
    pub fn merge_from(&mut self, other: Self) {
        if other.total_concurrency.is_some() {
            self.total_concurrency = other.total_concurrency;
        }
        if other.poll_jitter_secs != 0 {
            self.poll_jitter_secs = other.poll_jitter_secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = "total_concurrency: 8\npoll_jitter_secs: 5";
        let config: GlobalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.total_concurrency, Some(8));
        assert_eq!(config.poll_jitter_secs, 5);
    }

    #[test]
    fn test_yaml_empty() {
        let config: GlobalConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_merge_from() {
        let mut base = GlobalConfig::with_concurrency(4);
        base.merge_from(GlobalConfig {
            total_concurrency: None,
            poll_jitter_secs: 3,
        });
        assert_eq!(base.total_concurrency, Some(4));
        assert_eq!(base.poll_jitter_secs, 3);
    }
}
