//! Integration tests for the checkpoint manager over both storage backends

use agentflow_checkpoint::{
    Checkpoint, CheckpointFilter, CheckpointManager, CheckpointService, CheckpointSettings,
    CheckpointStatus, CheckpointType, RunnableConfig, SettingsLoader, StorageBackend,
};
use chrono::{Duration, Utc};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use std::collections::HashMap;
use tempfile::TempDir;

fn state(step: i64) -> HashMap<String, serde_json::Value> {
    let mut state = HashMap::new();
    state.insert("messages".to_string(), json!(["hello"]));
    state.insert("step".to_string(), json!(step));
    state
}

fn aged(thread_id: &str, checkpoint_type: CheckpointType, age: Duration) -> Checkpoint {
    Checkpoint::for_thread(thread_id, state(0), checkpoint_type).with_timestamp(Utc::now() - age)
}

async fn file_manager() -> (TempDir, CheckpointManager) {
    let dir = TempDir::new().expect("tempdir");
    let mut settings = CheckpointSettings::default();
    settings.storage.backend = StorageBackend::File;
    settings.storage.directory = dir.path().to_string_lossy().into_owned();
    let manager = CheckpointManager::open(&settings).await.expect("open manager");
    (dir, manager)
}

#[tokio::test]
async fn test_file_backend_survives_cache_loss() {
    let (_dir, manager) = file_manager().await;
    let config = RunnableConfig::for_thread("thread-1");

    let saved = manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(1), CheckpointType::Manual),
            None,
        )
        .await
        .unwrap();

    manager.cache().clear();
    let loaded = manager.load_checkpoint(&saved).await.unwrap().unwrap();
    assert_eq!(loaded.state(), &state(1));
    assert_eq!(loaded.checkpoint_type, CheckpointType::Manual);
}

#[tokio::test]
async fn test_file_backend_writes_and_tuple() {
    let (_dir, manager) = file_manager().await;
    let saved = manager
        .save_checkpoint(
            &RunnableConfig::for_thread("thread-1"),
            Checkpoint::for_thread("thread-1", state(1), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap();

    manager
        .put_writes(
            &saved,
            vec![("messages".into(), json!("second")), ("step".into(), json!(2))],
            "task-1",
            "root:agent",
        )
        .await
        .unwrap();

    let tuple = manager.load_checkpoint_tuple(&saved).await.unwrap().unwrap();
    let writes = tuple.pending_writes.unwrap();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1], ("step".to_string(), json!(2)));
}

#[tokio::test]
async fn test_cleanup_respects_type_policy() {
    let manager = CheckpointManager::in_memory();
    let config = RunnableConfig::for_thread("thread-1");

    let old_auto = aged("thread-1", CheckpointType::Auto, Duration::days(10));
    let old_error = aged("thread-1", CheckpointType::Error, Duration::days(10));
    let old_manual = aged("thread-1", CheckpointType::Manual, Duration::days(10));
    let old_milestone = aged("thread-1", CheckpointType::Milestone, Duration::days(10));
    let recent_auto = aged("thread-1", CheckpointType::Auto, Duration::days(2));

    for checkpoint in [&old_auto, &old_error, &old_manual, &old_milestone, &recent_auto] {
        manager
            .save_checkpoint(&config, checkpoint.clone(), None)
            .await
            .unwrap();
    }

    let removed = manager.cleanup_old_checkpoints(7).await.unwrap();
    assert_eq!(removed, 2);

    let remaining: Vec<String> = manager
        .repository()
        .list(&CheckpointFilter::for_thread("thread-1"))
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.contains(&old_manual.id));
    assert!(remaining.contains(&old_milestone.id));
    assert!(remaining.contains(&recent_auto.id));
    assert!(!manager.cache().contains(&old_auto.id));
}

#[tokio::test]
async fn test_thread_limit_applies_to_new_checkpoints_only() {
    let mut settings = CheckpointSettings::default();
    settings.limits.max_checkpoints_per_thread = 2;
    let manager = CheckpointManager::from_settings(
        std::sync::Arc::new(agentflow_checkpoint::InMemoryCheckpointRepository::new()),
        &settings,
    );
    let config = RunnableConfig::for_thread("thread-1");

    let first = manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(1), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap();
    manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(2), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap();

    let err = manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(3), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let existing = manager.load_checkpoint(&first).await.unwrap().unwrap();
    let mut updated = (*existing).clone();
    updated.add_tag("reviewed");
    manager.save_checkpoint(&first, updated, None).await.unwrap();

    let other_thread = manager
        .save_checkpoint(
            &RunnableConfig::for_thread("thread-2"),
            Checkpoint::for_thread("thread-2", state(1), CheckpointType::Auto),
            None,
        )
        .await;
    assert!(other_thread.is_ok());
}

#[tokio::test]
async fn test_list_before_cutoff() {
    let manager = CheckpointManager::in_memory();
    let config = RunnableConfig::for_thread("thread-1");

    let mut saved = Vec::new();
    for hours in [3, 2, 1] {
        let result = manager
            .save_checkpoint(
                &config,
                aged("thread-1", CheckpointType::Auto, Duration::hours(hours)),
                None,
            )
            .await
            .unwrap();
        saved.push(result);
    }

    let before_middle: Vec<_> = manager
        .list_checkpoints(Some(&config), None, Some(&saved[1]), None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(before_middle.len(), 1);
    assert_eq!(
        before_middle[0].config.checkpoint_id(),
        saved[0].checkpoint_id()
    );

    let all: Vec<_> = manager
        .list_checkpoints(Some(&config), None, None, None)
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|t| t.config.checkpoint_id()).collect();
    assert_eq!(
        ids,
        vec![
            saved[2].checkpoint_id(),
            saved[1].checkpoint_id(),
            saved[0].checkpoint_id()
        ]
    );
}

#[tokio::test]
async fn test_list_with_unknown_before_yields_error() {
    let manager = CheckpointManager::in_memory();
    let before = RunnableConfig::for_thread("thread-1").with_checkpoint_id("missing");
    let mut stream = manager.list_checkpoints(None, None, Some(&before), None);
    let first = stream.next().await.unwrap();
    assert!(first.is_err());
}

#[tokio::test]
async fn test_archive_and_stats() {
    let manager = CheckpointManager::in_memory();
    let config = RunnableConfig::for_thread("thread-1");
    let saved = manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(1), CheckpointType::Milestone),
            None,
        )
        .await
        .unwrap();
    manager
        .save_checkpoint(
            &config,
            Checkpoint::for_thread("thread-1", state(2), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap();

    assert!(manager.archive_checkpoint(&saved).await.unwrap());
    let archived = manager.load_checkpoint(&saved).await.unwrap().unwrap();
    assert_eq!(archived.status, CheckpointStatus::Archived);
    assert!(!archived.can_restore());

    let stats = manager.get_checkpoint_stats().await.unwrap();
    assert_eq!(stats.repository.total_checkpoints, 2);
    assert_eq!(stats.repository.archived_checkpoints, 1);
    assert_eq!(stats.repository.thread_count, 1);
    assert_eq!(stats.cache.entries, 2);
}

#[tokio::test]
async fn test_settings_file_drives_backend() {
    let dir = TempDir::new().expect("tempdir");
    let store = dir.path().join("store");
    let path = dir.path().join("checkpoint.toml");
    std::fs::write(
        &path,
        format!(
            "[cache]\nmax_size = 8\n\n[storage]\nbackend = \"file\"\ndirectory = \"{}\"\n",
            store.display()
        ),
    )
    .unwrap();

    let settings = SettingsLoader::new(&path).load_with(|_| None).await.unwrap();
    assert_eq!(settings.cache.max_size, 8);

    let manager = CheckpointManager::open(&settings).await.unwrap();
    let saved = manager
        .save_checkpoint(
            &RunnableConfig::for_thread("thread-1"),
            Checkpoint::for_thread("thread-1", state(1), CheckpointType::Auto),
            None,
        )
        .await
        .unwrap();

    let id = saved.checkpoint_id().unwrap();
    assert!(store.join(format!("{id}.json")).exists());
    assert_eq!(manager.health_check().await.unwrap().cache_max_size, 8);
}
