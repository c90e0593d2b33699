//! Construction of checkpoints, metadata and run configs with type-specific defaults

use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointTuple, CheckpointType,
    Configurable, RunnableConfig,
};
use crate::settings::ExpirationSettings;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Builds well-formed checkpoints
///
/// Error checkpoints expire after `error_hours`, milestones after `milestone_hours`.
/// Manual and automatic checkpoints get no expiry.
#[derive(Debug, Clone, Default)]
pub struct CheckpointFactory {
    expiration: ExpirationSettings,
}

impl CheckpointFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiration(expiration: ExpirationSettings) -> Self {
        Self { expiration }
    }

    /// Build a checkpoint for `thread_id`; `metadata` entries land in `custom_data`
    pub fn create_checkpoint(
        &self,
        thread_id: &str,
        state_data: HashMap<String, Value>,
        checkpoint_type: CheckpointType,
        metadata: HashMap<String, Value>,
    ) -> Checkpoint {
        let mut checkpoint = Checkpoint::for_thread(thread_id, state_data, checkpoint_type);
        checkpoint.metadata.custom_data.extend(metadata);
        checkpoint
    }

    /// Manual checkpoints persist until explicitly deleted
    pub fn create_manual_checkpoint(
        &self,
        thread_id: &str,
        state_data: HashMap<String, Value>,
        title: Option<String>,
        description: Option<String>,
        tags: Vec<String>,
    ) -> Checkpoint {
        let mut checkpoint =
            self.create_checkpoint(thread_id, state_data, CheckpointType::Manual, HashMap::new());
        checkpoint.metadata.title = title;
        checkpoint.metadata.description = description;
        for tag in tags {
            checkpoint.add_tag(tag);
        }
        checkpoint
    }

    pub fn create_error_checkpoint(
        &self,
        thread_id: &str,
        state_data: HashMap<String, Value>,
        error_message: &str,
        error_type: Option<&str>,
    ) -> Checkpoint {
        let mut custom = HashMap::new();
        custom.insert("error_message".to_string(), json!(error_message));
        if let Some(error_type) = error_type {
            custom.insert("error_type".to_string(), json!(error_type));
        }

        let mut checkpoint =
            self.create_checkpoint(thread_id, state_data, CheckpointType::Error, custom);
        checkpoint.metadata.title = Some(format!("Error: {}", error_message));
        checkpoint.add_tag("error");
        checkpoint.set_expiration(self.expiration.error_hours);
        checkpoint
    }

    pub fn create_milestone_checkpoint(
        &self,
        thread_id: &str,
        state_data: HashMap<String, Value>,
        milestone_name: &str,
        description: Option<String>,
    ) -> Checkpoint {
        let mut custom = HashMap::new();
        custom.insert("milestone_name".to_string(), json!(milestone_name));

        let mut checkpoint =
            self.create_checkpoint(thread_id, state_data, CheckpointType::Milestone, custom);
        checkpoint.metadata.title = Some(milestone_name.to_string());
        checkpoint.metadata.description = description;
        checkpoint.add_tag("milestone");
        checkpoint.set_expiration(self.expiration.milestone_hours);
        checkpoint
    }

    /// Standalone metadata, before it is attached to a checkpoint
    pub fn create_metadata(
        &self,
        thread_id: Option<&str>,
        source: Option<CheckpointSource>,
        step: Option<i64>,
        custom_data: HashMap<String, Value>,
    ) -> CheckpointMetadata {
        let mut metadata = CheckpointMetadata::new();
        metadata.thread_id = thread_id.map(str::to_string);
        metadata.source = source;
        metadata.step = step;
        metadata.custom_data = custom_data;
        metadata
    }

    pub fn create_config(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: Option<&str>,
    ) -> RunnableConfig {
        let config = RunnableConfig::for_thread(thread_id).with_checkpoint_ns(checkpoint_ns);
        match checkpoint_id {
            Some(id) => config.with_checkpoint_id(id),
            None => config,
        }
    }

    pub fn extract_thread_id(&self, config: &RunnableConfig) -> Option<String> {
        config.thread_id().map(str::to_string)
    }

    pub fn extract_checkpoint_id(&self, config: &RunnableConfig) -> Option<String> {
        config.checkpoint_id().map(str::to_string)
    }

    /// Build a full tuple from raw state and the config it was produced under
    ///
    /// The state becomes the checkpoint's channel values; the returned tuple's config
    /// addresses the new checkpoint by id.
    pub fn create_from_state(
        &self,
        state: HashMap<String, Value>,
        config: &RunnableConfig,
        source: CheckpointSource,
        step: i64,
    ) -> CheckpointTuple {
        let thread_id = self.extract_thread_id(config);

        let mut checkpoint = Checkpoint::new(state, HashMap::new(), HashMap::new());
        checkpoint.thread_id = thread_id.clone();

        let mut metadata = self.create_metadata(
            thread_id.as_deref(),
            Some(source),
            Some(step),
            HashMap::new(),
        );
        if let Some(parent_id) = self.extract_checkpoint_id(config) {
            metadata
                .parents
                .insert(config.checkpoint_ns().to_string(), parent_id);
        }
        let checkpoint = checkpoint.with_metadata(metadata);

        let tuple_config = RunnableConfig {
            configurable: Configurable {
                checkpoint_id: Some(checkpoint.id.clone()),
                ..config.configurable.clone()
            },
            extra: config.extra.clone(),
        };

        let tuple = CheckpointTuple::new(tuple_config, checkpoint);
        if config.checkpoint_id().is_some() {
            tuple.with_parent_config(config.clone())
        } else {
            tuple
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn state() -> HashMap<String, Value> {
        let mut state = HashMap::new();
        state.insert("step".to_string(), json!(1));
        state
    }

    #[test]
    fn test_create_checkpoint_merges_metadata() {
        let factory = CheckpointFactory::new();
        let mut extra = HashMap::new();
        extra.insert("run".to_string(), json!("r-1"));

        let checkpoint = factory.create_checkpoint("thread-1", state(), CheckpointType::Auto, extra);

        assert_eq!(checkpoint.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(checkpoint.metadata.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(checkpoint.metadata.custom_data.get("run"), Some(&json!("r-1")));
        assert!(checkpoint.metadata.expires_at.is_none());
    }

    #[test]
    fn test_error_checkpoint_expires_in_72_hours() {
        let factory = CheckpointFactory::new();
        let checkpoint = factory.create_error_checkpoint("t", state(), "boom", Some("RuntimeError"));

        assert_eq!(checkpoint.checkpoint_type, CheckpointType::Error);
        let expires_at = checkpoint.metadata.expires_at.unwrap();
        let drift = (expires_at - checkpoint.ts - Duration::hours(72)).num_seconds().abs();
        assert!(drift <= 2, "expiry drifted by {drift}s");
        assert_eq!(
            checkpoint.metadata.custom_data.get("error_type"),
            Some(&json!("RuntimeError"))
        );
    }

    #[test]
    fn test_milestone_checkpoint_expires_in_a_week() {
        let factory = CheckpointFactory::new();
        let checkpoint =
            factory.create_milestone_checkpoint("t", state(), "v1 shipped", None);

        let expires_at = checkpoint.metadata.expires_at.unwrap();
        let expected = Utc::now() + Duration::hours(168);
        assert!((expected - expires_at).num_seconds().abs() <= 2);
        assert_eq!(checkpoint.metadata.title.as_deref(), Some("v1 shipped"));
    }

    #[test]
    fn test_manual_checkpoint_has_no_expiry() {
        let factory = CheckpointFactory::new();
        let checkpoint = factory.create_manual_checkpoint(
            "t",
            state(),
            Some("before refactor".into()),
            None,
            vec!["keep".into(), "keep".into()],
        );
        assert_eq!(checkpoint.checkpoint_type, CheckpointType::Manual);
        assert!(checkpoint.metadata.expires_at.is_none());
        assert_eq!(checkpoint.metadata.tags, vec!["keep".to_string()]);
    }

    #[test]
    fn test_config_helpers() {
        let factory = CheckpointFactory::new();
        let config = factory.create_config("thread-9", "sub", Some("cp-1"));
        assert_eq!(factory.extract_thread_id(&config).as_deref(), Some("thread-9"));
        assert_eq!(factory.extract_checkpoint_id(&config).as_deref(), Some("cp-1"));
        assert_eq!(config.checkpoint_ns(), "sub");

        let empty = RunnableConfig::new();
        assert_eq!(factory.extract_thread_id(&empty), None);
        assert_eq!(factory.extract_checkpoint_id(&empty), None);
    }

    #[test]
    fn test_create_from_state() {
        let factory = CheckpointFactory::new();
        let parent = factory.create_config("thread-1", "", Some("parent-cp"));

        let tuple = factory.create_from_state(state(), &parent, CheckpointSource::Loop, 3);

        assert_eq!(tuple.checkpoint.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(tuple.checkpoint.channel_values, state());
        assert_eq!(tuple.metadata.step, Some(3));
        assert_eq!(tuple.metadata.parents.get(""), Some(&"parent-cp".to_string()));
        assert_eq!(tuple.config.checkpoint_id(), Some(tuple.checkpoint.id.as_str()));
        assert_eq!(tuple.parent_config, Some(parent));
    }
}
