//! Core checkpoint data structures for thread state persistence
//!
//! This module defines the value types of the checkpoint system: **[`Checkpoint`]**,
//! **[`CheckpointMetadata`]**, **[`RunnableConfig`]**, **[`CheckpointTuple`]** and
//! **[`CheckpointStatistics`]**. A checkpoint is one persisted snapshot of a thread's state;
//! its metadata carries the audit trail (step, parents, tags, restore history, expiry).
//!
//! # Lifecycle
//!
//! ```text
//!                 mark_expired() / expires_at passed
//!            ┌──────────────────────────────────────► EXPIRED
//!            │
//!  ACTIVE ───┼──── mark_corrupted() ────────────────► CORRUPTED
//!            │
//!            └──── mark_archived() ─────────────────► ARCHIVED
//! ```
//!
//! Status transitions are one-way. Nothing moves a checkpoint back to
//! [`CheckpointStatus::Active`].
//!
//! # Serialized form
//!
//! [`Checkpoint::to_json`] produces a document with the top-level keys `id`,
//! `channel_values`, `channel_versions`, `versions_seen`, `status`, `checkpoint_type`,
//! `ts` (RFC 3339), `metadata`, `thread_id` and `state_data`.
//! [`Checkpoint::from_json`] reverses it field for field.
//!
//! # Run configuration
//!
//! Every service call is keyed by a [`RunnableConfig`], which serializes to:
//!
//! ```text
//! {"configurable": {"thread_id": "...", "checkpoint_ns": "", "checkpoint_id": null}}
//! ```

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Pending write pair: (channel, value)
pub type PendingWrite = (String, Value);

/// Channel version type - can be int, float, or string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChannelVersion {
    Int(i64),
    Float(f64),
    String(String),
}

impl ChannelVersion {
    /// Get the next version, or `None` for string versions which are managed by the caller
    pub fn next(&self) -> Option<Self> {
        match self {
            ChannelVersion::Int(v) => Some(ChannelVersion::Int(v + 1)),
            ChannelVersion::Float(v) => Some(ChannelVersion::Float(v + 1.0)),
            ChannelVersion::String(_) => None,
        }
    }
}

/// Mapping from channel name to version
pub type ChannelVersions = HashMap<String, ChannelVersion>;

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    #[default]
    Active,
    Expired,
    Corrupted,
    Archived,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Corrupted => "corrupted",
            Self::Archived => "archived",
        }
    }
}

/// Why a checkpoint was taken; drives expiration and cleanup policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointType {
    /// Taken automatically by the workflow loop
    #[default]
    Auto,
    /// Requested by a user; never cleaned up automatically
    Manual,
    /// Captured when a run failed
    Error,
    /// Marks a notable point in a thread; never cleaned up automatically
    Milestone,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Error => "error",
            Self::Milestone => "milestone",
        }
    }
}

/// Metadata source type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from an input to invoke/stream/batch
    Input,
    /// Checkpoint created from inside the execution loop
    Loop,
    /// Checkpoint created from a manual state update
    Update,
    /// Checkpoint created as a copy of another checkpoint
    Fork,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Ordering hint within a thread, never negative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// The IDs of the parent checkpoints
    /// Mapping from checkpoint namespace to checkpoint ID
    #[serde(default)]
    pub parents: HashMap<String, CheckpointId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Serialized payload size, recomputed whenever a checkpoint is built
    #[serde(default)]
    pub size_bytes: i64,

    #[serde(default)]
    pub restore_count: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restored_at: Option<DateTime<Utc>>,

    /// Free-form data supplied by callers
    #[serde(default)]
    pub custom_data: HashMap<String, Value>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            source: None,
            step: None,
            parents: HashMap::new(),
            thread_id: None,
            title: None,
            description: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            size_bytes: 0,
            restore_count: 0,
            last_restored_at: None,
            custom_data: HashMap::new(),
        }
    }
}

impl CheckpointMetadata {
    /// Create a new checkpoint metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Set parent checkpoints
    pub fn with_parents(mut self, parents: HashMap<String, CheckpointId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Add custom metadata
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_data.insert(key.into(), value);
        self
    }

    /// Add a tag unless already present; tags keep insertion order
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.touch();
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// State snapshot at a given point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Unique, non-empty identifier
    pub id: CheckpointId,

    /// Mapping from channel name to the channel's value
    #[serde(default)]
    pub channel_values: HashMap<String, Value>,

    /// The versions of the channels at the time of the checkpoint
    #[serde(default)]
    pub channel_versions: ChannelVersions,

    /// Map from node ID to map from channel name to version seen
    #[serde(default)]
    pub versions_seen: HashMap<String, ChannelVersions>,

    #[serde(default)]
    pub status: CheckpointStatus,

    #[serde(default)]
    pub checkpoint_type: CheckpointType,

    /// Creation timestamp
    pub ts: DateTime<Utc>,

    pub metadata: CheckpointMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Thread-scoped state payload, used alongside or instead of `channel_values`
    #[serde(default)]
    pub state_data: HashMap<String, Value>,
}

impl Checkpoint {
    /// Create a new checkpoint with a generated id
    pub fn new(
        channel_values: HashMap<String, Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            channel_values,
            channel_versions,
            versions_seen,
        )
    }

    /// Create a new checkpoint with a caller-supplied id
    ///
    /// An empty `id` is replaced by a generated one.
    pub fn with_id(
        id: impl Into<CheckpointId>,
        channel_values: HashMap<String, Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
    ) -> Self {
        let mut id = id.into();
        if id.is_empty() {
            id = Uuid::new_v4().to_string();
        }
        let ts = Utc::now();
        let mut checkpoint = Self {
            id,
            channel_values,
            channel_versions,
            versions_seen,
            status: CheckpointStatus::Active,
            checkpoint_type: CheckpointType::Auto,
            ts,
            metadata: CheckpointMetadata::default(),
            thread_id: None,
            state_data: HashMap::new(),
        };
        checkpoint.refresh_metadata();
        checkpoint
    }

    /// Create a checkpoint carrying thread-scoped state
    pub fn for_thread(
        thread_id: impl Into<String>,
        state_data: HashMap<String, Value>,
        checkpoint_type: CheckpointType,
    ) -> Self {
        let thread_id = thread_id.into();
        let mut checkpoint = Self::new(HashMap::new(), HashMap::new(), HashMap::new());
        checkpoint.thread_id = Some(thread_id.clone());
        checkpoint.metadata.thread_id = Some(thread_id);
        checkpoint.checkpoint_type = checkpoint_type;
        checkpoint.state_data = state_data;
        checkpoint.refresh_metadata();
        checkpoint
    }

    /// Create an empty checkpoint
    pub fn empty() -> Self {
        Self::new(HashMap::new(), HashMap::new(), HashMap::new())
    }

    /// Set the state payload and recompute the size
    pub fn with_state_data(mut self, state_data: HashMap<String, Value>) -> Self {
        self.state_data = state_data;
        self.refresh_metadata();
        self
    }

    /// Attach metadata, keeping the checkpoint's own creation time and size
    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self.refresh_metadata();
        self
    }

    /// Backdate the checkpoint; `metadata.created_at` follows `ts`
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self.metadata.created_at = ts;
        self
    }

    /// Re-establish the construction invariants: `created_at` mirrors `ts` and
    /// `size_bytes` matches the current payload.
    pub fn refresh_metadata(&mut self) {
        self.metadata.created_at = self.ts;
        self.metadata.size_bytes = self.serialized_size() as i64;
        if self.metadata.thread_id.is_none() {
            self.metadata.thread_id = self.thread_id.clone();
        }
    }

    /// Size in bytes of the JSON-serialized state payload
    pub fn serialized_size(&self) -> usize {
        let payload = (
            &self.channel_values,
            &self.channel_versions,
            &self.versions_seen,
            &self.state_data,
        );
        serde_json::to_vec(&payload).map(|bytes| bytes.len()).unwrap_or(0)
    }

    /// The state this checkpoint carries: `state_data` when present, else `channel_values`
    pub fn state(&self) -> &HashMap<String, Value> {
        if self.state_data.is_empty() {
            &self.channel_values
        } else {
            &self.state_data
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.metadata.expires_at, Some(expires_at) if now > expires_at)
    }

    /// Non-empty id, active, and not past its expiry
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.status == CheckpointStatus::Active && !self.is_expired()
    }

    pub fn can_restore(&self) -> bool {
        self.is_valid() && self.status != CheckpointStatus::Corrupted
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.ts
    }

    pub fn mark_expired(&mut self) {
        self.set_status(CheckpointStatus::Expired);
    }

    pub fn mark_corrupted(&mut self) {
        self.set_status(CheckpointStatus::Corrupted);
    }

    pub fn mark_archived(&mut self) {
        self.set_status(CheckpointStatus::Archived);
    }

    fn set_status(&mut self, status: CheckpointStatus) {
        self.status = status;
        self.metadata.touch();
    }

    /// Expire `hours` from now
    ///
    /// A window past the end of representable time clears the expiry.
    pub fn set_expiration(&mut self, hours: i64) {
        self.metadata.expires_at = shift_hours(Utc::now(), hours);
        self.metadata.touch();
    }

    /// Push the expiry back by `hours`; starts from now when no expiry is set
    pub fn extend_expiration(&mut self, hours: i64) {
        let base = self.metadata.expires_at.unwrap_or_else(Utc::now);
        self.metadata.expires_at = shift_hours(base, hours);
        self.metadata.touch();
    }

    /// Count one restore of this checkpoint
    pub fn record_restore(&mut self) {
        let now = Utc::now();
        self.metadata.restore_count += 1;
        self.metadata.last_restored_at = Some(now);
        self.metadata.updated_at = now;
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.metadata.add_tag(tag);
    }

    /// Serialize to the JSON document form
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a checkpoint from its JSON document form
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// The `configurable` section of a [`RunnableConfig`]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Configurable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub checkpoint_ns: String,

    #[serde(default)]
    pub checkpoint_id: Option<CheckpointId>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Configuration keying every checkpoint operation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunnableConfig {
    #[serde(default)]
    pub configurable: Configurable,

    /// Additional configuration
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl RunnableConfig {
    /// Create a new, empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration addressing the latest checkpoint of a thread
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self::new().with_thread_id(thread_id)
    }

    /// Set the thread ID
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.configurable.thread_id = Some(thread_id.into());
        self
    }

    /// Set the checkpoint ID
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.configurable.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the checkpoint namespace
    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.configurable.checkpoint_ns = checkpoint_ns.into();
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.configurable.thread_id.as_deref()
    }

    pub fn checkpoint_id(&self) -> Option<&str> {
        self.configurable.checkpoint_id.as_deref()
    }

    pub fn checkpoint_ns(&self) -> &str {
        &self.configurable.checkpoint_ns
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A checkpoint viewed together with the config that addresses it
///
/// Built per query and never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    /// Configuration for this checkpoint
    pub config: RunnableConfig,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Metadata associated with the checkpoint
    pub metadata: CheckpointMetadata,

    /// Parent configuration (if any)
    pub parent_config: Option<RunnableConfig>,

    /// Writes recorded against this checkpoint, in insertion order
    pub pending_writes: Option<Vec<PendingWrite>>,
}

impl CheckpointTuple {
    /// Create a new checkpoint tuple; metadata defaults to the checkpoint's own
    pub fn new(config: RunnableConfig, checkpoint: Checkpoint) -> Self {
        let metadata = checkpoint.metadata.clone();
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
            pending_writes: None,
        }
    }

    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the parent configuration
    pub fn with_parent_config(mut self, parent_config: RunnableConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }

    pub fn with_pending_writes(mut self, writes: Vec<PendingWrite>) -> Self {
        self.pending_writes = Some(writes);
        self
    }
}

/// Aggregate figures over a set of checkpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointStatistics {
    pub total_checkpoints: usize,
    pub active_checkpoints: usize,
    pub expired_checkpoints: usize,
    pub corrupted_checkpoints: usize,
    pub archived_checkpoints: usize,
    pub thread_count: usize,
    pub total_size_bytes: i64,
    pub average_size_bytes: f64,
    pub by_type: HashMap<String, usize>,
    pub oldest_checkpoint: Option<DateTime<Utc>>,
    pub newest_checkpoint: Option<DateTime<Utc>>,
}

impl CheckpointStatistics {
    /// Tally statistics over the given checkpoints
    pub fn from_checkpoints<'a>(checkpoints: impl IntoIterator<Item = &'a Checkpoint>) -> Self {
        let mut stats = Self::default();
        let mut threads = HashSet::new();

        for checkpoint in checkpoints {
            stats.total_checkpoints += 1;
            match checkpoint.status {
                CheckpointStatus::Active => stats.active_checkpoints += 1,
                CheckpointStatus::Expired => stats.expired_checkpoints += 1,
                CheckpointStatus::Corrupted => stats.corrupted_checkpoints += 1,
                CheckpointStatus::Archived => stats.archived_checkpoints += 1,
            }
            *stats
                .by_type
                .entry(checkpoint.checkpoint_type.as_str().to_string())
                .or_insert(0) += 1;
            stats.total_size_bytes += checkpoint.metadata.size_bytes;
            if let Some(thread_id) = &checkpoint.thread_id {
                threads.insert(thread_id.clone());
            }
            stats.oldest_checkpoint = Some(match stats.oldest_checkpoint {
                Some(oldest) if oldest <= checkpoint.ts => oldest,
                _ => checkpoint.ts,
            });
            stats.newest_checkpoint = Some(match stats.newest_checkpoint {
                Some(newest) if newest >= checkpoint.ts => newest,
                _ => checkpoint.ts,
            });
        }

        stats.thread_count = threads.len();
        if stats.total_checkpoints > 0 {
            stats.average_size_bytes =
                stats.total_size_bytes as f64 / stats.total_checkpoints as f64;
        }
        stats
    }
}

/// `hours` as a duration, clamped to the representable range
pub(crate) fn saturating_hours(hours: i64) -> Duration {
    Duration::try_hours(hours).unwrap_or(if hours < 0 { Duration::MIN } else { Duration::MAX })
}

/// `days` as a duration, clamped to the representable range
pub(crate) fn saturating_days(days: i64) -> Duration {
    Duration::try_days(days).unwrap_or(if days < 0 { Duration::MIN } else { Duration::MAX })
}

/// Expiry `hours` after `base`: `None` when that lies past the last representable
/// instant, the epoch when it lies before the first
fn shift_hours(base: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    match base.checked_add_signed(saturating_hours(hours)) {
        Some(at) => Some(at),
        None if hours < 0 => Some(DateTime::<Utc>::default()),
        None => None,
    }
}
