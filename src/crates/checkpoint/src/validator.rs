//! Structural and business-rule checks applied before persistence

use crate::checkpoint::{saturating_hours, Checkpoint, CheckpointMetadata, CheckpointType};
use crate::error::{CheckpointError, Result};
use crate::settings::LimitSettings;
use chrono::{DateTime, Utc};

/// Validates checkpoints and decides cleanup eligibility
///
/// Pure: no method touches storage, every check either passes or returns
/// [`CheckpointError::Validation`].
#[derive(Debug, Clone, Default)]
pub struct CheckpointValidator {
    limits: LimitSettings,
}

impl CheckpointValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: LimitSettings) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &LimitSettings {
        &self.limits
    }

    pub fn validate_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.id.is_empty() {
            return Err(CheckpointError::validation("checkpoint id must not be empty"));
        }

        if checkpoint.channel_values.is_empty() && checkpoint.state_data.is_empty() {
            return Err(CheckpointError::validation(format!(
                "checkpoint {} carries no state: channel_values and state_data are both empty",
                checkpoint.id
            )));
        }

        let size = checkpoint.serialized_size() as u64;
        let max = self.limits.max_checkpoint_size_bytes();
        if size > max {
            return Err(CheckpointError::validation(format!(
                "checkpoint {} is {} bytes, exceeding the {} MB limit",
                checkpoint.id, size, self.limits.max_checkpoint_size_mb
            )));
        }

        self.validate_metadata(&checkpoint.metadata)
    }

    pub fn validate_metadata(&self, metadata: &CheckpointMetadata) -> Result<()> {
        if metadata.size_bytes < 0 {
            return Err(CheckpointError::validation(format!(
                "size_bytes must not be negative, got {}",
                metadata.size_bytes
            )));
        }
        if metadata.restore_count < 0 {
            return Err(CheckpointError::validation(format!(
                "restore_count must not be negative, got {}",
                metadata.restore_count
            )));
        }
        if let Some(step) = metadata.step {
            if step < 0 {
                return Err(CheckpointError::validation(format!(
                    "step must not be negative, got {}",
                    step
                )));
            }
        }
        Ok(())
    }

    /// Fails once a thread already holds the maximum number of checkpoints
    pub fn validate_thread_checkpoint_limit(&self, current_count: usize) -> Result<()> {
        if current_count >= self.limits.max_checkpoints_per_thread {
            return Err(CheckpointError::validation(format!(
                "thread already holds {} checkpoints (limit {})",
                current_count, self.limits.max_checkpoints_per_thread
            )));
        }
        Ok(())
    }

    pub fn should_cleanup_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        self.should_cleanup_checkpoint_at(checkpoint, Utc::now())
    }

    /// Cleanup policy evaluated at `now`
    ///
    /// Manual and milestone checkpoints are kept. Anything younger than the minimum
    /// cleanup age is kept. Error checkpoints go after `error_cleanup_hours`, automatic
    /// ones after `auto_cleanup_hours`.
    pub fn should_cleanup_checkpoint_at(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> bool {
        let age = checkpoint.age_at(now);
        if age < saturating_hours(self.limits.min_age_hours_for_cleanup) {
            return false;
        }

        match checkpoint.checkpoint_type {
            CheckpointType::Manual | CheckpointType::Milestone => false,
            CheckpointType::Error => age > saturating_hours(self.limits.error_cleanup_hours),
            CheckpointType::Auto => age > saturating_hours(self.limits.auto_cleanup_hours),
        }
    }
}
