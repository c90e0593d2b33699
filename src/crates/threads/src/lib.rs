//! # agentflow-threads - State Synchronization Between Agent Threads
//!
//! Detects field-level conflicts between two thread states, settles them with a
//! [`ResolutionStrategy`], and replicates or merges state across threads.
//!
//! ```text
//! ┌───────────────────┐   ┌───────────────────┐   ┌───────────────────┐
//! │ ConflictDetector  │──►│ ConflictResolver  │──►│ apply_updates     │
//! │ value/type/shape  │   │ keep/latest/merge │   │ target state      │
//! └───────────────────┘   └───────────────────┘   └───────────────────┘
//!
//! StateReplicator  full / selective / reference / incremental copies
//! StateMerger      overwrite / merge / keep-first over a list of states
//! ThreadSynchronizer drives all of the above against a CheckpointService
//! ```
//!
//! ## Detecting and resolving
//!
//! ```rust
//! use agentflow_threads::{ConflictDetector, ConflictResolver, ResolutionStrategy, State};
//! use serde_json::json;
//!
//! let source: State = [("x".to_string(), json!(1))].into_iter().collect();
//! let target: State = [("x".to_string(), json!(2))].into_iter().collect();
//!
//! let conflicts = ConflictDetector::new().detect_conflicts(&source, &target);
//! let resolved = ConflictResolver::new().resolve_conflicts(conflicts, ResolutionStrategy::KeepSource);
//! let updates = resolved.into_updates().unwrap();
//! assert_eq!(updates["x"], Some(json!(1)));
//! ```
//!
//! Strategies that leave conflicts open (`Manual`) make
//! [`ResolvedConflicts::into_updates`] fail with [`SyncError::UnresolvedConflicts`],
//! so unresolved fields can never be applied by accident.

use serde_json::Value;
use std::collections::HashMap;

pub mod conflict;
pub mod error;
pub mod merger;
pub mod replicator;
pub mod resolver;
pub mod settings;
pub mod synchronizer;

/// Thread state: field name to JSON value
pub type State = HashMap<String, Value>;

pub use conflict::{
    extract_timestamp, ComparisonMode, ConflictDetector, ConflictType, Resolution, StateConflict,
};
pub use error::{Result, SyncError};
pub use merger::{MergeStrategy, StateMerger};
pub use replicator::{
    ReplicationPermissions, ReplicationStrategy, StateReplicator, REPLICATION_KEY, REQUIRED_KEYS,
};
pub use resolver::{
    apply_updates, ConflictResolver, ResolutionStrategy, ResolvedConflicts, StateUpdates,
};
pub use settings::SyncSettings;
pub use synchronizer::{thread_context, SyncReport, ThreadSynchronizer};
