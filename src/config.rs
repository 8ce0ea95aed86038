//! Sync and merge tuning
//!
//! Loaded from JSON; every field has a default, so `{}` is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Commits the base search may load before giving up on history.
    pub max_walk_commits: Option<usize>,
    /// Fall back to snapshots when no common ancestor is reachable.
    pub snapshot_fallback: bool,
    /// Fetch the unknown history of both heads in one transfer before walking.
    pub prefetch: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_walk_commits: None,
            snapshot_fallback: true,
            prefetch: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub merge: MergeConfig,
    /// Save a snapshot whenever a sync lands on a level divisible by this.
    pub snapshot_every: Option<u64>,
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert!(config.merge.snapshot_fallback);
        assert_eq!(config.merge.max_walk_commits, None);
    }

    #[test]
    fn test_partial_override() {
        let config =
            SyncConfig::from_json_str(r#"{"merge": {"max_walk_commits": 50}, "snapshot_every": 10}"#).unwrap();
        assert_eq!(config.merge.max_walk_commits, Some(50));
        assert!(config.merge.prefetch);
        assert_eq!(config.snapshot_every, Some(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"merge": {"snapshot_fallback": false}}"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert!(!config.merge.snapshot_fallback);
        assert!(matches!(
            SyncConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            SyncConfig::from_json_str("{not json"),
            Err(ConfigError::DeserializationError(_))
        ));
    }
}
