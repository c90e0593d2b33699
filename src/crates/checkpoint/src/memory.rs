//! In-memory checkpoint repository for development and testing
//!
//! [`InMemoryCheckpointRepository`] keeps every checkpoint in a `tokio::sync::RwLock`
//! guarded map. It is the reference [`CheckpointRepository`]: complete, fast, and gone
//! when the process exits.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  InMemoryCheckpointRepository                │
//! │  Arc<RwLock<HashMap<id, StoredCheckpoint>>>  │
//! │    id ─► checkpoint + pending writes         │
//! └──────────────────────────────────────────────┘
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::repository::{CheckpointFilter, CheckpointRepository, StoredWrite};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    checkpoint: Checkpoint,
    writes: Vec<StoredWrite>,
}

type CheckpointStorage = Arc<RwLock<HashMap<String, StoredCheckpoint>>>;

/// Thread-safe in-memory repository
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointRepository {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        let storage = self.storage.read().await;
        let mut threads: Vec<_> = storage
            .values()
            .filter_map(|entry| entry.checkpoint.thread_id.as_deref())
            .collect();
        threads.sort_unstable();
        threads.dedup();
        threads.len()
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Drop everything, for test isolation
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut storage = self.storage.write().await;
        match storage.get_mut(&checkpoint.id) {
            Some(entry) => entry.checkpoint = checkpoint.clone(),
            None => {
                storage.insert(
                    checkpoint.id.clone(),
                    StoredCheckpoint {
                        checkpoint: checkpoint.clone(),
                        writes: Vec::new(),
                    },
                );
            }
        }
        Ok(true)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(checkpoint_id).map(|entry| entry.checkpoint.clone()))
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let mut storage = self.storage.write().await;
        Ok(storage.remove(checkpoint_id).is_some())
    }

    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;
        let candidates: Vec<Checkpoint> = storage
            .values()
            .filter(|entry| filter.matches(&entry.checkpoint))
            .map(|entry| entry.checkpoint.clone())
            .collect();
        Ok(filter.apply(candidates))
    }

    async fn count(&self, filter: &CheckpointFilter) -> Result<usize> {
        let storage = self.storage.read().await;
        Ok(storage
            .values()
            .filter(|entry| filter.matches(&entry.checkpoint))
            .count())
    }

    async fn save_writes(&self, checkpoint_id: &str, writes: Vec<StoredWrite>) -> Result<()> {
        let mut storage = self.storage.write().await;
        match storage.get_mut(checkpoint_id) {
            Some(entry) => {
                entry.writes.extend(writes);
                Ok(())
            }
            None => Err(CheckpointError::NotFound(checkpoint_id.to_string())),
        }
    }

    async fn load_writes(&self, checkpoint_id: &str) -> Result<Vec<StoredWrite>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(checkpoint_id)
            .map(|entry| entry.writes.clone())
            .unwrap_or_default())
    }
}
