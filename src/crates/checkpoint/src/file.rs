//! File-backed checkpoint repository
//!
//! One document per checkpoint under the configured directory, plus one document per
//! checkpoint holding its pending writes:
//!
//! ```text
//! <directory>/
//!   3f2a...e1.json          checkpoint document
//!   writes/
//!     3f2a...e1.json        Vec<StoredWrite>
//! ```
//!
//! Documents are written to a temporary file and renamed into place, so a reader
//! never sees a partially written checkpoint.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::repository::{CheckpointFilter, CheckpointRepository, StoredWrite};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const WRITES_DIR: &str = "writes";

/// Repository persisting checkpoints as files in a directory
#[derive(Debug)]
pub struct FileCheckpointRepository<S = JsonSerializer> {
    directory: PathBuf,
    serializer: S,
    /// Serializes every mutation; temp files are named after their target
    write_lock: Mutex<()>,
}

impl FileCheckpointRepository<JsonSerializer> {
    /// Open (creating if needed) a JSON repository at `directory`
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(directory, JsonSerializer::new()).await
    }
}

impl<S: SerializerProtocol> FileCheckpointRepository<S> {
    pub async fn with_serializer(directory: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(directory.join(WRITES_DIR)).await?;
        debug!(directory = %directory.display(), "Opened file checkpoint repository");
        Ok(Self {
            directory,
            serializer,
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(&self, checkpoint_id: &str) -> Result<String> {
        let safe = !checkpoint_id.is_empty()
            && checkpoint_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !checkpoint_id.starts_with('.');
        if !safe {
            return Err(CheckpointError::Storage(format!(
                "checkpoint id cannot be used as a file name: {:?}",
                checkpoint_id
            )));
        }
        Ok(format!("{}.{}", checkpoint_id, self.serializer.extension()))
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> Result<PathBuf> {
        Ok(self.directory.join(self.file_name(checkpoint_id)?))
    }

    fn writes_path(&self, checkpoint_id: &str) -> Result<PathBuf> {
        Ok(self
            .directory
            .join(WRITES_DIR)
            .join(self.file_name(checkpoint_id)?))
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_optional(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Checkpoint>> {
        let extension = self.serializer.extension();
        let mut checkpoints = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let bytes = fs::read(&path).await?;
            checkpoints.push(self.serializer.loads(&bytes)?);
        }
        Ok(checkpoints)
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointRepository for FileCheckpointRepository<S> {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let path = self.checkpoint_path(&checkpoint.id)?;
        let bytes = self.serializer.dumps(checkpoint)?;
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&path, bytes).await?;
        Ok(true)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(checkpoint_id)?;
        match self.read_optional(&path).await? {
            Some(bytes) => Ok(Some(self.serializer.loads(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let existed = self
            .remove_optional(&self.checkpoint_path(checkpoint_id)?)
            .await?;
        self.remove_optional(&self.writes_path(checkpoint_id)?)
            .await?;
        Ok(existed)
    }

    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>> {
        Ok(filter.apply(self.load_all().await?))
    }

    async fn save_writes(&self, checkpoint_id: &str, writes: Vec<StoredWrite>) -> Result<()> {
        if !fs::try_exists(self.checkpoint_path(checkpoint_id)?).await? {
            return Err(CheckpointError::NotFound(checkpoint_id.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let path = self.writes_path(checkpoint_id)?;
        let mut stored: Vec<StoredWrite> = match self.read_optional(&path).await? {
            Some(bytes) => self.serializer.loads(&bytes)?,
            None => Vec::new(),
        };
        stored.extend(writes);
        let bytes = self.serializer.dumps(&stored)?;
        self.write_atomic(&path, bytes).await
    }

    async fn load_writes(&self, checkpoint_id: &str) -> Result<Vec<StoredWrite>> {
        let path = self.writes_path(checkpoint_id)?;
        match self.read_optional(&path).await? {
            Some(bytes) => self.serializer.loads(&bytes),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointType;
    use serde_json::json;
    use std::collections::HashMap;

    fn checkpoint(thread: &str) -> Checkpoint {
        let mut state = HashMap::new();
        state.insert("messages".to_string(), json!(["hi"]));
        Checkpoint::for_thread(thread, state, CheckpointType::Auto)
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let cp = checkpoint("thread-1");

        repo.save(&cp).await.unwrap();
        assert_eq!(repo.load(&cp.id).await.unwrap(), Some(cp.clone()));

        let reopened = FileCheckpointRepository::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(&cp.id).await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn test_concurrent_saves_of_one_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let base = checkpoint("thread-1");

        let versions: Vec<Checkpoint> = (0..8)
            .map(|i| {
                let mut state = HashMap::new();
                state.insert("step".to_string(), json!(i));
                Checkpoint::with_id(base.id.clone(), state, HashMap::new(), HashMap::new())
            })
            .collect();
        let results = futures::future::join_all(versions.iter().map(|cp| repo.save(cp))).await;
        assert!(results.iter().all(|r| matches!(r, Ok(true))));

        let stored = repo.load(&base.id).await.unwrap().unwrap();
        assert!(versions.contains(&stored));

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert_ne!(entry.path().extension().and_then(|e| e.to_str()), Some("tmp"));
        }
    }

    #[tokio::test]
    async fn test_list_ignores_writes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let a = checkpoint("thread-1");
        let b = checkpoint("thread-2");
        repo.save(&a).await.unwrap();
        repo.save(&b).await.unwrap();
        repo.save_writes(
            &a.id,
            vec![StoredWrite {
                task_id: "t".into(),
                task_path: String::new(),
                channel: "c".into(),
                value: json!(1),
            }],
        )
        .await
        .unwrap();

        assert_eq!(repo.list(&CheckpointFilter::new()).await.unwrap().len(), 2);
        assert_eq!(repo.count(&CheckpointFilter::for_thread("thread-1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writes_append_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let cp = checkpoint("thread-1");
        repo.save(&cp).await.unwrap();

        for i in 0..3 {
            let write = StoredWrite {
                task_id: format!("task-{i}"),
                task_path: String::new(),
                channel: "counter".into(),
                value: json!(i),
            };
            repo.save_writes(&cp.id, vec![write]).await.unwrap();
        }

        let writes = repo.load_writes(&cp.id).await.unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[2].value, json!(2));

        assert!(repo.delete(&cp.id).await.unwrap());
        assert!(repo.load(&cp.id).await.unwrap().is_none());
        assert!(repo.load_writes(&cp.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let err = repo.load("../escape").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Storage(_)));
    }

    #[tokio::test]
    async fn test_writes_require_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::open(dir.path()).await.unwrap();
        let err = repo.save_writes("absent", Vec::new()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }
}
