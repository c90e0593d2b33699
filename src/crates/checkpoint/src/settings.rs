//! Checkpoint settings and their loader
//!
//! Settings come from, in increasing precedence:
//! 1. Built-in defaults
//! 2. A TOML file (`agentflow.toml` by convention)
//! 3. `AGENTFLOW_*` environment variables
//!
//! String values of the form `${VAR_NAME}` are expanded from the environment.
//!
//! ```toml
//! [cache]
//! max_size = 500
//! default_ttl_secs = 600
//!
//! [limits]
//! max_checkpoints_per_thread = 50
//!
//! [storage]
//! backend = "file"
//! directory = "${HOME}/.agentflow/checkpoints"
//! ```

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Default ceiling on a single checkpoint's serialized payload
pub const MAX_CHECKPOINT_SIZE_MB: u64 = 100;
/// Default ceiling on checkpoints held per thread
pub const MAX_CHECKPOINTS_PER_THREAD: usize = 100;
/// Checkpoints younger than this are never cleaned up
pub const MIN_CHECKPOINT_AGE_HOURS_FOR_CLEANUP: i64 = 1;
/// Age after which automatic checkpoints become eligible for cleanup
pub const AUTO_CHECKPOINT_CLEANUP_HOURS: i64 = 24;
/// Age after which error checkpoints become eligible for cleanup
pub const ERROR_CHECKPOINT_CLEANUP_HOURS: i64 = 72;
/// Expiration window given to error checkpoints
pub const ERROR_CHECKPOINT_EXPIRATION_HOURS: i64 = 72;
/// Expiration window given to milestone checkpoints
pub const MILESTONE_CHECKPOINT_EXPIRATION_HOURS: i64 = 168;

const ENV_PREFIX: &str = "AGENTFLOW_";

/// Top-level checkpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub limits: LimitSettings,

    #[serde(default)]
    pub expiration: ExpirationSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Cache sizing and lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of cached checkpoints
    pub max_size: usize,

    /// Lifetime of an entry when none is given; absent means entries never expire
    pub default_ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_secs: Some(3600),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

/// Validation and cleanup limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitSettings {
    pub max_checkpoint_size_mb: u64,
    pub max_checkpoints_per_thread: usize,
    pub min_age_hours_for_cleanup: i64,
    pub auto_cleanup_hours: i64,
    pub error_cleanup_hours: i64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_checkpoint_size_mb: MAX_CHECKPOINT_SIZE_MB,
            max_checkpoints_per_thread: MAX_CHECKPOINTS_PER_THREAD,
            min_age_hours_for_cleanup: MIN_CHECKPOINT_AGE_HOURS_FOR_CLEANUP,
            auto_cleanup_hours: AUTO_CHECKPOINT_CLEANUP_HOURS,
            error_cleanup_hours: ERROR_CHECKPOINT_CLEANUP_HOURS,
        }
    }
}

impl LimitSettings {
    pub fn max_checkpoint_size_bytes(&self) -> u64 {
        self.max_checkpoint_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Expiration windows applied by the factory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpirationSettings {
    pub error_hours: i64,
    pub milestone_hours: i64,
}

impl Default for ExpirationSettings {
    fn default() -> Self {
        Self {
            error_hours: ERROR_CHECKPOINT_EXPIRATION_HOURS,
            milestone_hours: MILESTONE_CHECKPOINT_EXPIRATION_HOURS,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Directory used by the file backend
    pub directory: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            directory: ".agentflow/checkpoints".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn directory_path(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
}

impl CheckpointSettings {
    /// Parse settings from TOML text; missing sections take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut settings: CheckpointSettings = toml::from_str(content)
            .map_err(|e| CheckpointError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.resolve_env_vars();
        Ok(settings)
    }

    /// Expand `${VAR_NAME}` references in string fields
    pub fn resolve_env_vars(&mut self) {
        self.storage.directory = expand_env_var(&self.storage.directory);
    }

    /// Apply `AGENTFLOW_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(env_override)
    }

    /// Apply overrides from any key lookup; keys are given without the `AGENTFLOW_` prefix
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CACHE_MAX_SIZE") {
            self.cache.max_size = parse_override("CACHE_MAX_SIZE", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL_SECS") {
            self.cache.default_ttl_secs = if value.trim().is_empty() || value == "none" {
                None
            } else {
                Some(parse_override("CACHE_TTL_SECS", &value)?)
            };
        }
        if let Some(value) = lookup("MAX_CHECKPOINTS_PER_THREAD") {
            self.limits.max_checkpoints_per_thread =
                parse_override("MAX_CHECKPOINTS_PER_THREAD", &value)?;
        }
        if let Some(value) = lookup("STORAGE_BACKEND") {
            self.storage.backend = match value.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "file" => StorageBackend::File,
                other => {
                    return Err(CheckpointError::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }
        if let Some(value) = lookup("STORAGE_DIR") {
            self.storage.directory = expand_env_var(&value);
        }
        Ok(())
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CheckpointError::Config(format!("Invalid value for {}{}: {}", ENV_PREFIX, key, value))
    })
}

fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Loads [`CheckpointSettings`] from disk and the environment
pub struct SettingsLoader {
    path: PathBuf,
}

impl SettingsLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields defaults, a malformed one is an error
    pub async fn load(&self) -> Result<CheckpointSettings> {
        self.load_with(env_override).await
    }

    /// Load settings with overrides drawn from `lookup` rather than the process environment
    pub async fn load_with<F>(&self, lookup: F) -> Result<CheckpointSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = if fs::try_exists(&self.path).await? {
            let content = fs::read_to_string(&self.path).await.map_err(|e| {
                CheckpointError::Config(format!("Failed to read settings: {}", e))
            })?;
            debug!(path = %self.path.display(), "Loaded checkpoint settings file");
            CheckpointSettings::from_toml_str(&content)?
        } else {
            debug!(path = %self.path.display(), "Settings file not found, using defaults");
            CheckpointSettings::default()
        };

        settings.apply_overrides(lookup)?;
        info!(
            backend = ?settings.storage.backend,
            cache_max_size = settings.cache.max_size,
            "Checkpoint settings loaded"
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_constants() {
        let settings = CheckpointSettings::default();
        assert_eq!(settings.limits.max_checkpoint_size_mb, 100);
        assert_eq!(settings.limits.max_checkpoints_per_thread, 100);
        assert_eq!(settings.limits.min_age_hours_for_cleanup, 1);
        assert_eq!(settings.expiration.error_hours, 72);
        assert_eq!(settings.expiration.milestone_hours, 168);
        assert_eq!(settings.cache.default_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_partial_toml() {
        let settings = CheckpointSettings::from_toml_str(
            r#"
            [cache]
            max_size = 10

            [storage]
            backend = "file"
            "#,
        )
        .unwrap();

        assert_eq!(settings.cache.max_size, 10);
        assert_eq!(settings.cache.default_ttl_secs, Some(3600));
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.limits, LimitSettings::default());
    }

    #[test]
    fn test_malformed_toml() {
        let err = CheckpointSettings::from_toml_str("[cache\nmax_size = ").unwrap_err();
        assert!(matches!(err, CheckpointError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let mut env = HashMap::new();
        env.insert("CACHE_MAX_SIZE", "42");
        env.insert("CACHE_TTL_SECS", "none");
        env.insert("STORAGE_BACKEND", "FILE");

        let mut settings = CheckpointSettings::default();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.cache.max_size, 42);
        assert_eq!(settings.cache.default_ttl_secs, None);
        assert_eq!(settings.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_invalid_override() {
        let mut settings = CheckpointSettings::default();
        let err = settings
            .apply_overrides(|key| (key == "CACHE_MAX_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Config(_)));
    }

    #[tokio::test]
    async fn test_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SettingsLoader::new(dir.path().join("absent.toml"));
        let settings = loader.load_with(|_| None).await.unwrap();
        assert_eq!(settings, CheckpointSettings::default());
    }

    #[tokio::test]
    async fn test_loader_applies_injected_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SettingsLoader::new(dir.path().join("absent.toml"));
        let settings = loader
            .load_with(|key| (key == "CACHE_MAX_SIZE").then(|| "7".to_string()))
            .await
            .unwrap();
        assert_eq!(settings.cache.max_size, 7);
    }

    #[test]
    fn test_size_limit_saturates() {
        let limits = LimitSettings {
            max_checkpoint_size_mb: u64::MAX,
            ..LimitSettings::default()
        };
        assert_eq!(limits.max_checkpoint_size_bytes(), u64::MAX);
    }

    #[tokio::test]
    async fn test_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentflow.toml");
        tokio::fs::write(&path, "[limits]\nmax_checkpoints_per_thread = 5\n")
            .await
            .unwrap();

        let settings = SettingsLoader::new(&path).load_with(|_| None).await.unwrap();
        assert_eq!(settings.limits.max_checkpoints_per_thread, 5);
    }
}
