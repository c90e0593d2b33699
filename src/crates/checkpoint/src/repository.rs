//! Storage abstraction the checkpoint service persists through
//!
//! [`CheckpointRepository`] is the seam for storage backends. The crate ships two:
//! [`InMemoryCheckpointRepository`](crate::memory::InMemoryCheckpointRepository) and
//! [`FileCheckpointRepository`](crate::file::FileCheckpointRepository). Any other
//! backend (SQL, key-value store, object storage) implements the same trait.
//!
//! # Contract
//!
//! - `save` upserts by checkpoint id.
//! - `list` returns matches newest first (by `ts`) and honors `filter.limit`.
//! - `delete` also drops writes stored against the checkpoint.
//! - Errors are returned as-is; the service does not reinterpret them.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use agentflow_checkpoint::{Checkpoint, CheckpointFilter, CheckpointRepository, Result, StoredWrite};
//! use async_trait::async_trait;
//!
//! struct RedisCheckpointRepository { client: redis::Client }
//!
//! #[async_trait]
//! impl CheckpointRepository for RedisCheckpointRepository {
//!     async fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
//!         let document = serde_json::to_string(checkpoint)?;
//!         // SET checkpoint:{id} document
//!         Ok(true)
//!     }
//!     // load, delete, list, cleanup_expired, get_statistics, save_writes, load_writes ...
//! }
//! ```

use crate::checkpoint::{
    Checkpoint, CheckpointId, CheckpointStatistics, CheckpointStatus, CheckpointType,
    PendingWrite,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Criteria for selecting checkpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointFilter {
    pub thread_id: Option<String>,
    pub status: Option<CheckpointStatus>,
    pub checkpoint_type: Option<CheckpointType>,
    /// Only checkpoints created strictly before this instant
    pub before: Option<DateTime<Utc>>,
    /// Exact matches against `metadata.custom_data`
    pub custom_data: HashMap<String, Value>,
    pub limit: Option<usize>,
}

impl CheckpointFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: CheckpointStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, checkpoint_type: CheckpointType) -> Self {
        self.checkpoint_type = Some(checkpoint_type);
        self
    }

    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_data.insert(key.into(), value);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a checkpoint satisfies every criterion except `limit`
    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        if let Some(thread_id) = &self.thread_id {
            if checkpoint.thread_id.as_ref() != Some(thread_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if checkpoint.status != status {
                return false;
            }
        }
        if let Some(checkpoint_type) = self.checkpoint_type {
            if checkpoint.checkpoint_type != checkpoint_type {
                return false;
            }
        }
        if let Some(before) = self.before {
            if checkpoint.ts >= before {
                return false;
            }
        }
        self.custom_data
            .iter()
            .all(|(key, value)| checkpoint.metadata.custom_data.get(key) == Some(value))
    }

    /// Filter, order newest first, and truncate to `limit`
    pub fn apply<I>(&self, checkpoints: I) -> Vec<Checkpoint>
    where
        I: IntoIterator<Item = Checkpoint>,
    {
        let mut selected: Vec<Checkpoint> =
            checkpoints.into_iter().filter(|c| self.matches(c)).collect();
        selected.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// A write recorded against a checkpoint by a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredWrite {
    pub task_id: String,
    #[serde(default)]
    pub task_path: String,
    pub channel: String,
    pub value: Value,
}

impl StoredWrite {
    pub fn into_pending(self) -> PendingWrite {
        (self.channel, self.value)
    }
}

/// Persistence backend for checkpoints
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Insert or replace a checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool>;

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// Delete a checkpoint and its writes, reporting whether it existed
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// Matching checkpoints, newest first
    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>>;

    async fn count(&self, filter: &CheckpointFilter) -> Result<usize> {
        let unlimited = CheckpointFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.list(&unlimited).await?.len())
    }

    /// Delete checkpoints that are past their expiry or marked expired
    async fn cleanup_expired(&self) -> Result<usize> {
        let expired: Vec<CheckpointId> = self
            .list(&CheckpointFilter::new())
            .await?
            .into_iter()
            .filter(|c| c.status == CheckpointStatus::Expired || c.is_expired())
            .map(|c| c.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.delete(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_statistics(&self) -> Result<CheckpointStatistics> {
        let checkpoints = self.list(&CheckpointFilter::new()).await?;
        Ok(CheckpointStatistics::from_checkpoints(&checkpoints))
    }

    /// Append writes to a checkpoint
    async fn save_writes(&self, checkpoint_id: &str, writes: Vec<StoredWrite>) -> Result<()>;

    /// Writes recorded against a checkpoint, in insertion order
    async fn load_writes(&self, checkpoint_id: &str) -> Result<Vec<StoredWrite>>;
}
