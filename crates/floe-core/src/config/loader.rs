//! Multi-file configuration loading.

use std::path::Path;

use indexmap::IndexMap;

use crate::config::{ConfigPath, GlobalConfig, MetricsConfig, interpolate, is_yaml_file};
use crate::error::ConfigError;

/// Trait for configs that can be assembled from several YAML files.
///
/// Components (the keyed map returned by `components_mut`) must be unique
/// across files. Everything else merges last-write-wins, and implementors can
/// fold in extra keyed sections through `merge_sections`.
pub trait Mergeable: Sized + Default {
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Display;
    type Component;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;
    fn global_mut(&mut self) -> &mut GlobalConfig;
    fn metrics_mut(&mut self) -> &mut MetricsConfig;
    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    /// Merge implementor-specific sections from `other`.
    fn merge_sections(&mut self, _other: &mut Self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components_mut()
            .keys()
            .filter(|key| self.components_mut().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        self.merge_sections(&mut other)?;

        for (key, component) in other.components_mut().drain(..) {
            self.components_mut().insert(key, component);
        }

        self.global_mut()
            .merge_from(std::mem::take(other.global_mut()));
        self.metrics_mut()
            .merge_from(std::mem::take(other.metrics_mut()));
        Ok(())
    }
}

/// Merge a keyed section, rejecting keys already present.
pub fn merge_unique<K, V>(
    target: &mut IndexMap<K, V>,
    other: &mut IndexMap<K, V>,
) -> Result<(), ConfigError>
where
    K: Eq + std::hash::Hash + std::fmt::Display,
{
    let duplicates: Vec<String> = other
        .keys()
        .filter(|key| target.contains_key(*key))
        .map(|key| key.to_string())
        .collect();

    if !duplicates.is_empty() {
        return Err(ConfigError::DuplicateComponents { keys: duplicates });
    }

    target.extend(other.drain(..));
    Ok(())
}

/// Load and merge configuration from files and directories, in order.
///
/// Errors from every path are collected before returning.
pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let (location, loaded) = match path {
            ConfigPath::File(file_path) => (file_path, load_file::<C>(file_path)),
            ConfigPath::Dir(dir_path) => (dir_path, load_dir::<C>(dir_path)),
        };
        merge_into(&mut config, location, loaded, &mut errors);
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

fn merge_into<C: Mergeable>(
    config: &mut C,
    location: &Path,
    loaded: Result<C, ConfigError>,
    errors: &mut Vec<String>,
) {
    let result = loaded.and_then(|partial| config.merge(partial));
    if let Err(e) = result {
        errors.push(format!("{}: {}", location.display(), e));
    }
}

fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    C::parse_yaml(&result.text)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    files.sort();

    let mut config = C::default();
    let mut errors = Vec::new();
    for path in files {
        let loaded = load_file::<C>(&path);
        merge_into(&mut config, &path, loaded, &mut errors);
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}
