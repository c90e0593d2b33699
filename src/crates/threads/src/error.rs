//! Error types for thread synchronization

use agentflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while synchronizing, replicating or merging thread state
#[derive(Error, Debug)]
pub enum SyncError {
    /// Underlying checkpoint service failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Source state lacks the keys replication needs
    #[error("Incompatible state: {0}")]
    IncompatibleState(String),

    /// Conflicts left without a resolution, by field path
    #[error("Unresolved conflicts: {}", .0.join(", "))]
    UnresolvedConflicts(Vec<String>),

    /// Thread has no checkpoint to read state from
    #[error("No state found for thread: {0}")]
    MissingState(String),

    /// Replication not allowed by the given permissions
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Settings could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}
