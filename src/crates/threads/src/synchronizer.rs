//! Thread-to-thread synchronization over the checkpoint service
//!
//! ```text
//!   source thread ──latest──┐
//!                           ├─► ConflictDetector ─► ConflictResolver ─► apply to target state
//!   target thread ──latest──┘                                             │
//!                                                                          ▼
//!                                                      new checkpoint on target thread
//! ```

use crate::conflict::{ConflictDetector, StateConflict};
use crate::error::{Result, SyncError};
use crate::merger::{MergeStrategy, StateMerger};
use crate::replicator::{ReplicationPermissions, ReplicationStrategy, StateReplicator};
use crate::resolver::{apply_updates, ConflictResolver, ResolutionStrategy};
use crate::settings::SyncSettings;
use crate::State;
use agentflow_checkpoint::{
    Checkpoint, CheckpointService, CheckpointSource, CheckpointType, RunnableConfig,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one [`ThreadSynchronizer::synchronize`] call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub source_thread: String,
    pub target_thread: String,
    pub strategy: ResolutionStrategy,
    pub conflicts: Vec<StateConflict>,
    pub resolved: Vec<String>,
    pub unresolved: Vec<String>,
    /// Config of the checkpoint written to the target; `None` when nothing changed
    pub checkpoint: Option<RunnableConfig>,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Synchronizes, replicates and merges thread state
pub struct ThreadSynchronizer {
    service: Arc<dyn CheckpointService>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    replicator: StateReplicator,
    merger: StateMerger,
    settings: SyncSettings,
}

impl std::fmt::Debug for ThreadSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSynchronizer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ThreadSynchronizer {
    pub fn new(service: Arc<dyn CheckpointService>) -> Self {
        Self::with_settings(service, SyncSettings::default())
    }

    pub fn with_settings(service: Arc<dyn CheckpointService>, settings: SyncSettings) -> Self {
        Self {
            service,
            detector: ConflictDetector::with_mode(settings.comparison),
            resolver: ConflictResolver::new(),
            replicator: StateReplicator::new(),
            merger: StateMerger::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Arc<Checkpoint>>> {
        Ok(self
            .service
            .load_checkpoint(&RunnableConfig::for_thread(thread_id))
            .await?)
    }

    async fn require_latest(&self, thread_id: &str) -> Result<Arc<Checkpoint>> {
        self.latest(thread_id)
            .await?
            .ok_or_else(|| SyncError::MissingState(thread_id.to_string()))
    }

    /// Config for a new checkpoint on `thread_id`, parented to its current latest
    fn child_config(thread_id: &str, parent: Option<&Checkpoint>) -> RunnableConfig {
        let config = RunnableConfig::for_thread(thread_id);
        match parent {
            Some(parent) => config.with_checkpoint_id(parent.id.clone()),
            None => config,
        }
    }

    /// Conflicts between the latest states of two threads, without resolving them
    pub async fn detect(&self, source_thread: &str, target_thread: &str) -> Result<Vec<StateConflict>> {
        let source = self.require_latest(source_thread).await?;
        let target = self.latest(target_thread).await?;
        let empty = State::new();
        let target_state = target.as_deref().map(Checkpoint::state).unwrap_or(&empty);
        Ok(self.detector.detect_conflicts(source.state(), target_state))
    }

    /// Bring the target thread in line with the source thread
    ///
    /// Resolved conflicts are applied to the target's latest state and written as a
    /// new checkpoint on the target thread. Unresolved conflicts keep the target's
    /// value and are listed in the report. Nothing is written when the outcome
    /// matches the target or would leave it empty.
    pub async fn synchronize(
        &self,
        source_thread: &str,
        target_thread: &str,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<SyncReport> {
        let strategy = strategy.unwrap_or(self.settings.resolution_strategy);
        let source = self.require_latest(source_thread).await?;
        let target = self.latest(target_thread).await?;

        let target_state = target
            .as_deref()
            .map(|c| c.state().clone())
            .unwrap_or_default();
        let conflicts = self.detector.detect_conflicts(source.state(), &target_state);
        let resolved = self.resolver.resolve_conflicts(conflicts, strategy);

        let mut merged = target_state.clone();
        apply_updates(&mut merged, resolved.resolved_updates());

        let checkpoint = if merged == target_state {
            debug!(source_thread, target_thread, "Target already in sync");
            None
        } else if merged.is_empty() {
            warn!(
                source_thread,
                target_thread,
                "Resolutions would leave the target without state, nothing written"
            );
            None
        } else {
            let mut checkpoint = Checkpoint::for_thread(target_thread, merged, CheckpointType::Auto);
            checkpoint.metadata.source = Some(CheckpointSource::Update);
            checkpoint
                .metadata
                .custom_data
                .insert("synced_from".into(), json!(source_thread));
            checkpoint
                .metadata
                .custom_data
                .insert("sync_strategy".into(), json!(strategy.as_str()));

            let config = Self::child_config(target_thread, target.as_deref());
            Some(self.service.save_checkpoint(&config, checkpoint, None).await?)
        };

        let report = SyncReport {
            source_thread: source_thread.to_string(),
            target_thread: target_thread.to_string(),
            strategy,
            resolved: resolved.resolved_paths(),
            unresolved: resolved.unresolved_paths(),
            conflicts: resolved.into_conflicts(),
            checkpoint,
            synced_at: Utc::now(),
        };

        if report.is_complete() {
            info!(
                source_thread,
                target_thread,
                strategy = strategy.as_str(),
                conflicts = report.conflicts.len(),
                written = report.checkpoint.is_some(),
                "Synchronized threads"
            );
        } else {
            warn!(
                source_thread,
                target_thread,
                unresolved = report.unresolved.len(),
                "Synchronization left conflicts unresolved"
            );
        }
        Ok(report)
    }

    /// Replicate the latest state of `source_thread` into a new checkpoint on `target_thread`
    pub async fn replicate(
        &self,
        source_thread: &str,
        target_thread: &str,
        strategy: Option<ReplicationStrategy>,
        permissions: ReplicationPermissions,
    ) -> Result<RunnableConfig> {
        let source = self.require_latest(source_thread).await?;
        let context = thread_context(source_thread, &source)?;
        self.replicate_context(&context, target_thread, strategy, permissions)
            .await
    }

    /// Replicate an explicit thread context map into `target_thread`
    pub async fn replicate_context(
        &self,
        context: &State,
        target_thread: &str,
        strategy: Option<ReplicationStrategy>,
        permissions: ReplicationPermissions,
    ) -> Result<RunnableConfig> {
        if !self.replicator.validate_state_compatibility(context) {
            return Err(SyncError::IncompatibleState(
                "thread context must carry thread_id, state and config".into(),
            ));
        }

        let strategy = strategy.unwrap_or(self.settings.replication_strategy);
        let replicated =
            self.replicator
                .replicate_state(context, target_thread, strategy, permissions)?;

        let target = self.latest(target_thread).await?;
        let mut checkpoint = Checkpoint::for_thread(target_thread, replicated, CheckpointType::Auto);
        checkpoint.metadata.source = Some(CheckpointSource::Fork);
        checkpoint
            .metadata
            .custom_data
            .insert("replication_strategy".into(), json!(strategy.as_str()));
        if let Some(source_thread) = context.get("thread_id") {
            checkpoint
                .metadata
                .custom_data
                .insert("replicated_from".into(), source_thread.clone());
        }

        let config = Self::child_config(target_thread, target.as_deref());
        let saved = self.service.save_checkpoint(&config, checkpoint, None).await?;
        info!(
            target_thread,
            strategy = strategy.as_str(),
            checkpoint_id = ?saved.checkpoint_id(),
            "Replicated thread state"
        );
        Ok(saved)
    }

    /// Merge the latest states of several threads; nothing is written
    pub async fn merge_threads(
        &self,
        thread_ids: &[&str],
        strategy: Option<MergeStrategy>,
    ) -> Result<State> {
        let mut states = Vec::with_capacity(thread_ids.len());
        for thread_id in thread_ids {
            states.push(self.require_latest(thread_id).await?.state().clone());
        }
        Ok(self
            .merger
            .merge_states(&states, strategy.or(Some(self.settings.merge_strategy)), &[]))
    }
}

/// Context map for a thread's latest checkpoint: `thread_id`, `checkpoint_id`, `state`, `config`
pub fn thread_context(thread_id: &str, checkpoint: &Checkpoint) -> Result<State> {
    let config = RunnableConfig::for_thread(thread_id).with_checkpoint_id(checkpoint.id.clone());
    let mut context = State::new();
    context.insert("thread_id".into(), json!(thread_id));
    context.insert("checkpoint_id".into(), json!(checkpoint.id));
    context.insert(
        "state".into(),
        Value::Object(checkpoint.state().clone().into_iter().collect()),
    );
    context.insert("config".into(), config.to_json()?);
    Ok(context)
}
