//! Synchronization defaults, read from the `[sync]` table of a TOML file

use crate::conflict::ComparisonMode;
use crate::error::{Result, SyncError};
use crate::merger::MergeStrategy;
use crate::replicator::ReplicationStrategy;
use crate::resolver::ResolutionStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub resolution_strategy: ResolutionStrategy,
    pub merge_strategy: MergeStrategy,
    pub replication_strategy: ReplicationStrategy,
    pub comparison: ComparisonMode,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    sync: SyncSettings,
}

impl SyncSettings {
    /// Parse the `[sync]` table; other tables are ignored and a missing table yields defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: SettingsDocument = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse sync settings: {}", e)))?;
        Ok(document.sync)
    }

    /// Read settings from a file shared with other sections; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let exists = fs::try_exists(path)
            .await
            .map_err(|e| SyncError::Config(format!("Failed to stat {}: {}", path.display(), e)))?;
        if !exists {
            debug!(path = %path.display(), "Sync settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::Config(format!("Failed to read sync settings: {}", e)))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.resolution_strategy, ResolutionStrategy::LatestWins);
        assert_eq!(settings.merge_strategy, MergeStrategy::Merge);
        assert_eq!(settings.replication_strategy, ReplicationStrategy::FullCopy);
        assert_eq!(settings.comparison, ComparisonMode::Rendered);
    }

    #[test]
    fn test_sync_table_alongside_other_sections() {
        let settings = SyncSettings::from_toml_str(
            r#"
            [cache]
            max_size = 10

            [sync]
            resolution_strategy = "keep_source"
            comparison = "structural"
            "#,
        )
        .unwrap();

        assert_eq!(settings.resolution_strategy, ResolutionStrategy::KeepSource);
        assert_eq!(settings.comparison, ComparisonMode::Structural);
        assert_eq!(settings.merge_strategy, MergeStrategy::Merge);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = SyncSettings::from_toml_str("[sync]\nresolution_strategy = \"coin_flip\"\n")
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SyncSettings::load(dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(settings, SyncSettings::default());
    }
}
