//! Asset and job identifiers.

use std::fmt;

use floe_core::ComponentKey;
use serde::{Deserialize, Serialize};

/// Identifier for an asset (e.g. "loans", "transform").
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(ComponentKey);

impl AssetKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(ComponentKey::new(id))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier for a job.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(ComponentKey);

impl JobKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(ComponentKey::new(id))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
