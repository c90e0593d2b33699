//! Replication of one thread's state into another thread's context
//!
//! The source is a thread context map carrying `thread_id`, `state` and `config`
//! (plus optionally `checkpoint_id`). Copy strategies stamp a `_replication` entry
//! describing how and when the copy was made.

use crate::error::{Result, SyncError};
use crate::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Key under which replication metadata is stamped
pub const REPLICATION_KEY: &str = "_replication";

/// Keys a source must carry to be replicated
pub const REQUIRED_KEYS: [&str; 3] = ["thread_id", "state", "config"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStrategy {
    /// Deep copy of everything plus replication metadata
    #[default]
    FullCopy,
    /// Copy of the fields not prefixed with `_`
    SelectiveCopy,
    /// Pointer to the source thread and checkpoint; no state is copied
    ReferenceOnly,
    /// Full copy whose metadata also names the target thread
    Incremental,
}

impl ReplicationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationStrategy::FullCopy => "full_copy",
            ReplicationStrategy::SelectiveCopy => "selective_copy",
            ReplicationStrategy::ReferenceOnly => "reference_only",
            ReplicationStrategy::Incremental => "incremental",
        }
    }
}

/// What the caller may do with the source and target threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPermissions {
    /// Source state may be copied out
    pub read: bool,
    /// Target thread may receive replicated data
    pub write: bool,
}

impl Default for ReplicationPermissions {
    fn default() -> Self {
        Self::full()
    }
}

impl ReplicationPermissions {
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    /// Reference records never expose source state, so only `write` is required
    fn check(&self, strategy: ReplicationStrategy) -> Result<()> {
        if !self.write {
            return Err(SyncError::PermissionDenied(
                "write access to the target thread is required".into(),
            ));
        }
        if strategy != ReplicationStrategy::ReferenceOnly && !self.read {
            return Err(SyncError::PermissionDenied(format!(
                "{} requires read access to the source state",
                strategy.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StateReplicator;

impl StateReplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn replicate_state(
        &self,
        source_state: &State,
        target_thread_id: &str,
        strategy: ReplicationStrategy,
        permissions: ReplicationPermissions,
    ) -> Result<State> {
        self.replicate_state_at(source_state, target_thread_id, strategy, permissions, Utc::now())
    }

    pub fn replicate_state_at(
        &self,
        source_state: &State,
        target_thread_id: &str,
        strategy: ReplicationStrategy,
        permissions: ReplicationPermissions,
        now: DateTime<Utc>,
    ) -> Result<State> {
        permissions.check(strategy)?;

        let replicated = match strategy {
            ReplicationStrategy::FullCopy => {
                let mut copy = source_state.clone();
                copy.insert(
                    REPLICATION_KEY.to_string(),
                    json!({
                        "strategy": strategy.as_str(),
                        "replicated_at": now.to_rfc3339(),
                    }),
                );
                copy
            }
            ReplicationStrategy::SelectiveCopy => source_state
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            ReplicationStrategy::ReferenceOnly => {
                let mut reference = State::new();
                reference.insert(
                    "source_thread_id".into(),
                    source_state.get("thread_id").cloned().unwrap_or(Value::Null),
                );
                reference.insert("checkpoint_id".into(), checkpoint_id_of(source_state));
                reference.insert("created_at".into(), json!(now.to_rfc3339()));
                reference
            }
            ReplicationStrategy::Incremental => {
                let mut copy = source_state.clone();
                copy.insert(
                    REPLICATION_KEY.to_string(),
                    json!({
                        "strategy": strategy.as_str(),
                        "replicated_at": now.to_rfc3339(),
                        "target_thread_id": target_thread_id,
                    }),
                );
                copy
            }
        };

        Ok(replicated)
    }

    /// Whether `source_state` carries every key in [`REQUIRED_KEYS`]
    pub fn validate_state_compatibility(&self, source_state: &State) -> bool {
        REQUIRED_KEYS.iter().all(|key| source_state.contains_key(*key))
    }
}

/// `checkpoint_id` at the top level, else inside `config.configurable`
fn checkpoint_id_of(source_state: &State) -> Value {
    source_state
        .get("checkpoint_id")
        .cloned()
        .or_else(|| {
            source_state
                .get("config")?
                .get("configurable")?
                .get("checkpoint_id")
                .cloned()
        })
        .unwrap_or(Value::Null)
}
