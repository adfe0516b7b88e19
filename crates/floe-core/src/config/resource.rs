//! Exclusive resource declarations and conflict detection.
//!
//! Components declare the resources they need exclusively so that two
//! components claiming the same destination table are rejected when the
//! configuration is validated, instead of failing at write time.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

/// A resource that cannot be shared between components.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// A destination table name.
    Table(String),
    /// A directory path (state directory, warehouse root, etc.)
    Directory(String),
}

impl Resource {
    pub fn table(name: &str) -> Self {
        Self::Table(name.to_string())
    }

    /// Create a directory resource; trailing slashes are ignored.
    pub fn directory(path: &str) -> Self {
        Self::Directory(path.trim_end_matches('/').to_string())
    }

    /// Find resources claimed by more than one component.
    ///
    /// ```
    /// use floe_core::config::Resource;
    ///
    /// let conflicts = Resource::conflicts(vec![
    ///     ("loans", vec![Resource::table("loans")]),
    ///     ("loans_backfill", vec![Resource::table("loans")]),
    ///     ("customers", vec![Resource::table("customers")]),
    /// ]);
    /// assert_eq!(conflicts.len(), 1);
    /// assert!(conflicts[&Resource::table("loans")].contains("loans_backfill"));
    /// ```
    pub fn conflicts<K>(
        components: impl IntoIterator<Item = (K, Vec<Resource>)>,
    ) -> HashMap<Resource, BTreeSet<K>>
    where
        K: Ord + Clone,
    {
        let mut claims: HashMap<Resource, BTreeSet<K>> = HashMap::new();

        for (key, resources) in components {
            for resource in resources {
                claims.entry(resource).or_default().insert(key.clone());
            }
        }

        claims.retain(|_, keys| keys.len() > 1);
        claims
    }

    /// Render conflicts as a single deterministic message.
    pub fn describe_conflicts<K: fmt::Display>(conflicts: &HashMap<Resource, BTreeSet<K>>) -> String {
        let mut lines: Vec<String> = conflicts
            .iter()
            .map(|(resource, keys)| {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                format!("{resource} claimed by: {}", keys.join(", "))
            })
            .collect();
        lines.sort();
        lines.join("; ")
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(name) => write!(f, "table:{name}"),
            Self::Directory(path) => write!(f, "directory:{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflicts() {
        let conflicts = Resource::conflicts(vec![
            ("loans", vec![Resource::table("loans")]),
            ("customers", vec![Resource::table("customers")]),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_directory_normalization() {
        assert_eq!(
            Resource::directory("warehouse/staging/"),
            Resource::directory("warehouse/staging")
        );
    }

    #[test]
    fn test_describe_conflicts() {
        let conflicts = Resource::conflicts(vec![
            ("b", vec![Resource::table("t")]),
            ("a", vec![Resource::table("t")]),
        ]);
        assert_eq!(
            Resource::describe_conflicts(&conflicts),
            "table:t claimed by: a, b"
        );
    }
}
