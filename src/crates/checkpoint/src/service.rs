//! Checkpoint service façade: validation, cache and repository composed
//!
//! [`CheckpointService`] is the interface application code talks to;
//! [`CheckpointManager`] is its implementation over any [`CheckpointRepository`].
//!
//! ```text
//!            save_checkpoint                      load_checkpoint
//!                  │                                     │
//!                  ▼                                     ▼
//!        ┌──────────────────┐                 ┌──────────────────┐
//!        │ CheckpointValidator (fail fast)    │ CheckpointCache  │── hit ──► return
//!        └────────┬─────────┘                 └────────┬─────────┘
//!                 ▼                                    │ miss
//!        ┌──────────────────┐                          ▼
//!        │   Repository     │◄─────────────── Repository.load ──► populate cache
//!        └────────┬─────────┘
//!                 ▼
//!        cache.set(id, checkpoint)
//! ```
//!
//! Validation errors are raised before the repository is written to. Repository errors
//! propagate unchanged. A cache miss is never an error.
//!
//! The cache and repository are not kept coherent against writers that bypass this
//! manager: one writer per checkpoint stream is assumed.

use crate::cache::{CacheStats, CheckpointCache};
use crate::checkpoint::{
    saturating_days, Checkpoint, CheckpointMetadata, CheckpointStatistics, CheckpointStatus,
    CheckpointTuple, PendingWrite, RunnableConfig,
};
use crate::error::{CheckpointError, Result};
use crate::factory::CheckpointFactory;
use crate::file::FileCheckpointRepository;
use crate::memory::InMemoryCheckpointRepository;
use crate::repository::{CheckpointFilter, CheckpointRepository, StoredWrite};
use crate::settings::{CheckpointSettings, StorageBackend};
use crate::validator::CheckpointValidator;
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lazy stream of checkpoint tuples; each call to `list_checkpoints` starts a fresh query
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Repository figures with the cache layered in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointStats {
    pub repository: CheckpointStatistics,
    pub cache: CacheStats,
}

/// Outcome of [`CheckpointService::health_check`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub total_checkpoints: Option<usize>,
    pub cache_entries: usize,
    pub cache_max_size: usize,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checkpoint operations exposed to application code
#[async_trait]
pub trait CheckpointService: Send + Sync {
    /// Validate and persist a checkpoint, returning the config that addresses it
    async fn save_checkpoint(
        &self,
        config: &RunnableConfig,
        checkpoint: Checkpoint,
        metadata: Option<CheckpointMetadata>,
    ) -> Result<RunnableConfig>;

    /// Load by `checkpoint_id`, or the newest active checkpoint of the thread when absent
    ///
    /// Archived, expired and corrupted checkpoints are only reachable by id.
    async fn load_checkpoint(&self, config: &RunnableConfig) -> Result<Option<Arc<Checkpoint>>>;

    async fn load_checkpoint_tuple(&self, config: &RunnableConfig)
        -> Result<Option<CheckpointTuple>>;

    /// Checkpoints newest first; `before` cuts off at the checkpoint it addresses
    fn list_checkpoints(
        &self,
        config: Option<&RunnableConfig>,
        filter: Option<CheckpointFilter>,
        before: Option<&RunnableConfig>,
        limit: Option<usize>,
    ) -> CheckpointStream;

    /// Record writes against the checkpoint addressed by `config`
    async fn put_writes(
        &self,
        config: &RunnableConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()>;

    async fn delete_checkpoint(&self, config: &RunnableConfig) -> Result<bool>;

    /// Delete checkpoints older than `max_age_days` that the cleanup policy allows
    async fn cleanup_old_checkpoints(&self, max_age_days: i64) -> Result<usize>;

    async fn get_checkpoint_stats(&self) -> Result<CheckpointStats>;

    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Default [`CheckpointService`] implementation
#[derive(Clone)]
pub struct CheckpointManager {
    repository: Arc<dyn CheckpointRepository>,
    cache: Arc<CheckpointCache>,
    validator: CheckpointValidator,
    factory: CheckpointFactory,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("cache", &self.cache)
            .field("validator", &self.validator)
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    pub fn new(
        repository: Arc<dyn CheckpointRepository>,
        cache: Arc<CheckpointCache>,
        validator: CheckpointValidator,
        factory: CheckpointFactory,
    ) -> Self {
        Self {
            repository,
            cache,
            validator,
            factory,
        }
    }

    /// Wire a manager over `repository` with cache, validator and factory built from settings
    pub fn from_settings(
        repository: Arc<dyn CheckpointRepository>,
        settings: &CheckpointSettings,
    ) -> Self {
        Self::new(
            repository,
            Arc::new(CheckpointCache::from_settings(&settings.cache)),
            CheckpointValidator::with_limits(settings.limits.clone()),
            CheckpointFactory::with_expiration(settings.expiration.clone()),
        )
    }

    /// Build a manager including the storage backend the settings select
    pub async fn open(settings: &CheckpointSettings) -> Result<Self> {
        let repository: Arc<dyn CheckpointRepository> = match settings.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryCheckpointRepository::new()),
            StorageBackend::File => Arc::new(
                FileCheckpointRepository::open(settings.storage.directory_path()).await?,
            ),
        };
        info!(backend = ?settings.storage.backend, "Checkpoint manager ready");
        Ok(Self::from_settings(repository, settings))
    }

    /// In-memory manager with default settings
    pub fn in_memory() -> Self {
        Self::from_settings(
            Arc::new(InMemoryCheckpointRepository::new()),
            &CheckpointSettings::default(),
        )
    }

    pub fn cache(&self) -> &Arc<CheckpointCache> {
        &self.cache
    }

    pub fn factory(&self) -> &CheckpointFactory {
        &self.factory
    }

    pub fn validator(&self) -> &CheckpointValidator {
        &self.validator
    }

    pub fn repository(&self) -> &Arc<dyn CheckpointRepository> {
        &self.repository
    }

    fn require_checkpoint_id(&self, config: &RunnableConfig) -> Result<String> {
        self.factory
            .extract_checkpoint_id(config)
            .ok_or_else(|| CheckpointError::validation("config is missing configurable.checkpoint_id"))
    }

    /// Write through to the repository, then refresh the cache entry
    async fn persist(&self, checkpoint: Checkpoint) -> Result<Arc<Checkpoint>> {
        if !self.repository.save(&checkpoint).await? {
            return Err(CheckpointError::Storage(format!(
                "repository did not store checkpoint {}",
                checkpoint.id
            )));
        }
        let checkpoint = Arc::new(checkpoint);
        self.cache
            .set(checkpoint.id.clone(), Arc::clone(&checkpoint), None);
        Ok(checkpoint)
    }

    fn tuple_for(
        checkpoint: Checkpoint,
        config: Option<&RunnableConfig>,
        writes: Vec<StoredWrite>,
    ) -> CheckpointTuple {
        let checkpoint_ns = config
            .map(|c| c.checkpoint_ns().to_string())
            .unwrap_or_default();
        let thread_id = checkpoint
            .thread_id
            .clone()
            .or_else(|| config.and_then(|c| c.thread_id()).map(str::to_string));

        let mut tuple_config = config.cloned().unwrap_or_default();
        tuple_config.configurable.thread_id = thread_id.clone();
        tuple_config.configurable.checkpoint_id = Some(checkpoint.id.clone());

        let parent_config = checkpoint.metadata.parents.get(&checkpoint_ns).map(|parent_id| {
            let mut parent = RunnableConfig::new()
                .with_checkpoint_ns(checkpoint_ns.clone())
                .with_checkpoint_id(parent_id.clone());
            parent.configurable.thread_id = thread_id.clone();
            parent
        });

        let pending: Vec<PendingWrite> = writes.into_iter().map(StoredWrite::into_pending).collect();
        let tuple = CheckpointTuple::new(tuple_config, checkpoint).with_pending_writes(pending);
        match parent_config {
            Some(parent) => tuple.with_parent_config(parent),
            None => tuple,
        }
    }

    /// Restore a checkpoint: refuses unless it is restorable, then counts the restore
    pub async fn restore_checkpoint(&self, config: &RunnableConfig) -> Result<Arc<Checkpoint>> {
        let checkpoint = self
            .load_checkpoint(config)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(format!("{:?}", config.configurable)))?;

        if !checkpoint.can_restore() {
            return Err(CheckpointError::validation(format!(
                "checkpoint {} cannot be restored (status {}, expired {})",
                checkpoint.id,
                checkpoint.status.as_str(),
                checkpoint.is_expired()
            )));
        }

        let mut restored = (*checkpoint).clone();
        restored.record_restore();
        info!(
            checkpoint_id = %restored.id,
            restore_count = restored.metadata.restore_count,
            "Restored checkpoint"
        );
        self.persist(restored).await
    }

    /// Move a checkpoint to the archived state
    pub async fn archive_checkpoint(&self, config: &RunnableConfig) -> Result<bool> {
        let Some(checkpoint) = self.load_checkpoint(config).await? else {
            return Ok(false);
        };
        let mut archived = (*checkpoint).clone();
        archived.mark_archived();
        self.persist(archived).await?;
        Ok(true)
    }
}

#[async_trait]
impl CheckpointService for CheckpointManager {
    #[tracing::instrument(skip_all, fields(thread_id = ?config.thread_id()))]
    async fn save_checkpoint(
        &self,
        config: &RunnableConfig,
        checkpoint: Checkpoint,
        metadata: Option<CheckpointMetadata>,
    ) -> Result<RunnableConfig> {
        let mut checkpoint = match metadata {
            Some(metadata) => checkpoint.with_metadata(metadata),
            None => checkpoint,
        };

        if checkpoint.thread_id.is_none() {
            checkpoint.thread_id = self.factory.extract_thread_id(config);
        }
        if let Some(parent_id) = self.factory.extract_checkpoint_id(config) {
            if parent_id != checkpoint.id {
                checkpoint
                    .metadata
                    .parents
                    .entry(config.checkpoint_ns().to_string())
                    .or_insert(parent_id);
            }
        }
        checkpoint.refresh_metadata();

        self.validator.validate_checkpoint(&checkpoint)?;

        if let Some(thread_id) = checkpoint.thread_id.clone() {
            if self.repository.load(&checkpoint.id).await?.is_none() {
                let count = self
                    .repository
                    .count(&CheckpointFilter::for_thread(thread_id))
                    .await?;
                self.validator.validate_thread_checkpoint_limit(count)?;
            }
        }

        let saved = self.persist(checkpoint).await?;
        debug!(
            checkpoint_id = %saved.id,
            checkpoint_type = saved.checkpoint_type.as_str(),
            size_bytes = saved.metadata.size_bytes,
            "Saved checkpoint"
        );

        let mut saved_config = config.clone();
        saved_config.configurable.thread_id = saved.thread_id.clone();
        saved_config.configurable.checkpoint_id = Some(saved.id.clone());
        Ok(saved_config)
    }

    async fn load_checkpoint(&self, config: &RunnableConfig) -> Result<Option<Arc<Checkpoint>>> {
        let checkpoint_id = match self.factory.extract_checkpoint_id(config) {
            Some(id) => id,
            None => {
                let thread_id = self.factory.extract_thread_id(config).ok_or_else(|| {
                    CheckpointError::validation("config carries neither thread_id nor checkpoint_id")
                })?;
                let latest = self
                    .repository
                    .list(
                        &CheckpointFilter::for_thread(thread_id.clone())
                            .with_status(CheckpointStatus::Active)
                            .with_limit(1),
                    )
                    .await?
                    .into_iter()
                    .next();
                debug!(thread_id = %thread_id, found = latest.is_some(), "Resolved latest checkpoint");
                return Ok(latest.map(|checkpoint| {
                    let checkpoint = Arc::new(checkpoint);
                    self.cache
                        .set(checkpoint.id.clone(), Arc::clone(&checkpoint), None);
                    checkpoint
                }));
            }
        };

        if let Some(hit) = self.cache.get(&checkpoint_id) {
            debug!(checkpoint_id = %checkpoint_id, "Checkpoint cache hit");
            return Ok(Some(hit));
        }

        debug!(checkpoint_id = %checkpoint_id, "Checkpoint cache miss");
        match self.repository.load(&checkpoint_id).await? {
            Some(checkpoint) => {
                let checkpoint = Arc::new(checkpoint);
                self.cache
                    .set(checkpoint_id, Arc::clone(&checkpoint), None);
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn load_checkpoint_tuple(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<CheckpointTuple>> {
        let Some(checkpoint) = self.load_checkpoint(config).await? else {
            return Ok(None);
        };
        let writes = self.repository.load_writes(&checkpoint.id).await?;
        Ok(Some(Self::tuple_for(
            (*checkpoint).clone(),
            Some(config),
            writes,
        )))
    }

    fn list_checkpoints(
        &self,
        config: Option<&RunnableConfig>,
        filter: Option<CheckpointFilter>,
        before: Option<&RunnableConfig>,
        limit: Option<usize>,
    ) -> CheckpointStream {
        let repository = Arc::clone(&self.repository);
        let config = config.cloned();
        let before_id = before.and_then(|b| b.checkpoint_id()).map(str::to_string);

        let mut filter = filter.unwrap_or_default();
        if let Some(thread_id) = config.as_ref().and_then(|c| c.thread_id()) {
            filter.thread_id = Some(thread_id.to_string());
        }
        if limit.is_some() {
            filter.limit = limit;
        }

        Box::pin(try_stream! {
            if let Some(before_id) = before_id {
                let anchor = repository
                    .load(&before_id)
                    .await?
                    .ok_or_else(|| CheckpointError::NotFound(before_id.clone()))?;
                filter.before = Some(match filter.before {
                    Some(existing) if existing < anchor.ts => existing,
                    _ => anchor.ts,
                });
            }

            for checkpoint in repository.list(&filter).await? {
                let writes = repository.load_writes(&checkpoint.id).await?;
                yield CheckpointManager::tuple_for(checkpoint, config.as_ref(), writes);
            }
        })
    }

    async fn put_writes(
        &self,
        config: &RunnableConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()> {
        let checkpoint_id = self.require_checkpoint_id(config)?;

        if let Some((index, _)) = writes
            .iter()
            .enumerate()
            .find(|(_, (channel, _))| channel.trim().is_empty())
        {
            return Err(CheckpointError::validation(format!(
                "write #{} has an empty channel name",
                index
            )));
        }

        let stored: Vec<StoredWrite> = writes
            .into_iter()
            .map(|(channel, value)| StoredWrite {
                task_id: task_id.to_string(),
                task_path: task_path.to_string(),
                channel,
                value,
            })
            .collect();

        debug!(checkpoint_id = %checkpoint_id, task_id, count = stored.len(), "Storing pending writes");
        self.repository.save_writes(&checkpoint_id, stored).await
    }

    async fn delete_checkpoint(&self, config: &RunnableConfig) -> Result<bool> {
        let checkpoint_id = self.require_checkpoint_id(config)?;
        self.cache.delete(&checkpoint_id);
        let deleted = self.repository.delete(&checkpoint_id).await?;
        debug!(checkpoint_id = %checkpoint_id, deleted, "Deleted checkpoint");
        Ok(deleted)
    }

    async fn cleanup_old_checkpoints(&self, max_age_days: i64) -> Result<usize> {
        let now = Utc::now();
        let max_age = saturating_days(max_age_days);
        let candidates = self.repository.list(&CheckpointFilter::new()).await?;

        let mut removed = 0;
        for checkpoint in candidates {
            if checkpoint.age_at(now) <= max_age {
                continue;
            }
            if !self.validator.should_cleanup_checkpoint_at(&checkpoint, now) {
                continue;
            }
            self.cache.delete(&checkpoint.id);
            if self.repository.delete(&checkpoint.id).await? {
                removed += 1;
            }
        }

        info!(removed, max_age_days, "Cleaned up old checkpoints");
        Ok(removed)
    }

    async fn get_checkpoint_stats(&self) -> Result<CheckpointStats> {
        Ok(CheckpointStats {
            repository: self.repository.get_statistics().await?,
            cache: self.cache.stats(),
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let (total, error) = match self.repository.count(&CheckpointFilter::new()).await {
            Ok(total) => (Some(total), None),
            Err(e) => {
                warn!(error = %e, "Checkpoint repository health check failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(HealthStatus {
            healthy: error.is_none(),
            total_checkpoints: total,
            cache_entries: self.cache.size(),
            cache_max_size: self.cache.max_size(),
            checked_at: Utc::now(),
            error,
        })
    }
}
