//! # agentflow-checkpoint - Checkpoint Persistence for Agent Threads
//!
//! Saves, caches, validates and restores snapshots of agent conversation threads.
//!
//! ## Overview
//!
//! A [`Checkpoint`] is a snapshot of a thread's state at one point in time. Checkpoints
//! enable resuming after failures, rolling back to a milestone, and replicating one
//! thread's state into another (see the `agentflow-threads` crate).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CheckpointService (trait) ◄── CheckpointManager            │
//! │        │                                                    │
//! │        ├── CheckpointValidator   size, metadata, limits     │
//! │        ├── CheckpointFactory     typed construction         │
//! │        ├── CheckpointCache       LRU + TTL, thread-safe     │
//! │        └── CheckpointRepository  (trait)                    │
//! │               ├── InMemoryCheckpointRepository              │
//! │               └── FileCheckpointRepository                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Checkpoint lifecycle
//!
//! Every checkpoint has a [`CheckpointStatus`] (`active`, `expired`, `corrupted`,
//! `archived`) and a [`CheckpointType`] (`auto`, `manual`, `error`, `milestone`). Only
//! active, unexpired checkpoints can be restored. Error checkpoints expire after 72 hours
//! and milestones after a week; cleanup never removes manual or milestone checkpoints.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use agentflow_checkpoint::{
//!     Checkpoint, CheckpointManager, CheckpointService, CheckpointType, RunnableConfig,
//! };
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> agentflow_checkpoint::Result<()> {
//! let manager = CheckpointManager::in_memory();
//! let config = RunnableConfig::for_thread("thread-1");
//!
//! let mut state = HashMap::new();
//! state.insert("messages".to_string(), json!(["hello"]));
//! let checkpoint = Checkpoint::for_thread("thread-1", state, CheckpointType::Manual);
//!
//! let saved = manager.save_checkpoint(&config, checkpoint, None).await?;
//! let loaded = manager.load_checkpoint(&saved).await?;
//! assert!(loaded.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`SettingsLoader`] reads [`CheckpointSettings`] from TOML, expands `${VAR}` references
//! and applies `AGENTFLOW_*` environment overrides. A missing file yields defaults.
//!
//! ```toml
//! [cache]
//! max_size = 1000
//! default_ttl_secs = 3600
//!
//! [limits]
//! max_checkpoint_size_mb = 100
//! max_checkpoints_per_thread = 100
//!
//! [storage]
//! backend = "file"
//! directory = "${HOME}/.agentflow/checkpoints"
//! ```

pub mod cache;
pub mod checkpoint;
pub mod error;
pub mod factory;
pub mod file;
pub mod memory;
pub mod repository;
pub mod serializer;
pub mod service;
pub mod settings;
pub mod validator;

pub use cache::{CacheStats, CheckpointCache};
pub use checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointId, CheckpointMetadata,
    CheckpointSource, CheckpointStatistics, CheckpointStatus, CheckpointTuple, CheckpointType,
    Configurable, PendingWrite, RunnableConfig,
};
pub use error::{CheckpointError, Result};
pub use factory::CheckpointFactory;
pub use file::FileCheckpointRepository;
pub use memory::InMemoryCheckpointRepository;
pub use repository::{CheckpointFilter, CheckpointRepository, StoredWrite};
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use service::{
    CheckpointManager, CheckpointService, CheckpointStats, CheckpointStream, HealthStatus,
};
pub use settings::{
    CacheSettings, CheckpointSettings, ExpirationSettings, LimitSettings, SettingsLoader,
    StorageBackend, StorageSettings,
};
pub use validator::CheckpointValidator;
