//! Generic component identifier.
//!
//! Specialized as `CollectionKey` for source collections and as `AssetKey` /
//! `JobKey` in the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generic identifier for any configured component.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKey(String);

impl ComponentKey {
    /// Create a new component key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Derive a key from the last segment of a filesystem path.
    ///
    /// Returns "default" if no non-empty segment exists.
    ///
    /// ```
    /// use floe_core::config::ComponentKey;
    ///
    /// assert_eq!(ComponentKey::from_path("Data/fact_db").id(), "fact_db");
    /// assert_eq!(ComponentKey::from_path("Data/customer/").id(), "customer");
    /// assert_eq!(ComponentKey::from_path("").id(), "default");
    /// ```
    pub fn from_path(path: &str) -> Self {
        let key = path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or("default");

        Self(key.to_string())
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ComponentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ComponentKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}
