//! Property tests for checkpoint expiry, cache eviction, cleanup policy and serialization

use agentflow_checkpoint::{
    Checkpoint, CheckpointCache, CheckpointStatus, CheckpointType, CheckpointValidator,
};
use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;

fn checkpoint_type() -> impl Strategy<Value = CheckpointType> {
    prop_oneof![
        Just(CheckpointType::Auto),
        Just(CheckpointType::Manual),
        Just(CheckpointType::Error),
        Just(CheckpointType::Milestone),
    ]
}

fn checkpoint_status() -> impl Strategy<Value = CheckpointStatus> {
    prop_oneof![
        Just(CheckpointStatus::Active),
        Just(CheckpointStatus::Expired),
        Just(CheckpointStatus::Corrupted),
        Just(CheckpointStatus::Archived),
    ]
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z ]{0,12}".prop_map(|s| json!(s)),
        any::<bool>().prop_map(|b| json!(b)),
        Just(Value::Null),
    ]
}

fn state_map() -> impl Strategy<Value = HashMap<String, Value>> {
    prop::collection::hash_map("[a-z_]{1,8}", json_leaf(), 1..6)
}

fn sample(state: HashMap<String, Value>) -> Checkpoint {
    Checkpoint::for_thread("thread-1", state, CheckpointType::Auto)
}

proptest! {
    #[test]
    fn expiration_check_is_idempotent(offset_hours in -500i64..500, has_expiry in any::<bool>()) {
        prop_assume!(offset_hours != 0);
        let mut checkpoint = sample(HashMap::from([("k".to_string(), json!(1))]));
        if has_expiry {
            checkpoint.set_expiration(offset_hours);
        }
        let now = Utc::now();
        prop_assert_eq!(checkpoint.is_expired_at(now), checkpoint.is_expired_at(now));
        prop_assert_eq!(checkpoint.is_expired_at(now), has_expiry && offset_hours < 0);
    }

    #[test]
    fn young_checkpoints_are_never_cleaned(
        minutes in 0i64..60,
        checkpoint_type in checkpoint_type(),
    ) {
        let validator = CheckpointValidator::new();
        let now = Utc::now();
        let checkpoint = Checkpoint::for_thread(
            "thread-1",
            HashMap::from([("k".to_string(), json!(1))]),
            checkpoint_type,
        )
        .with_timestamp(now - Duration::minutes(minutes));

        prop_assert!(!validator.should_cleanup_checkpoint_at(&checkpoint, now));
    }

    #[test]
    fn lru_evicts_exactly_the_least_recently_used(
        capacity in 1usize..12,
        touches in prop::collection::vec(any::<prop::sample::Index>(), 0..24),
    ) {
        let cache = CheckpointCache::new(capacity, None);
        let checkpoint = std::sync::Arc::new(sample(HashMap::from([("k".to_string(), json!(1))])));

        // Recency order, least recently used first
        let mut recency: Vec<String> = Vec::new();
        for i in 0..capacity {
            let key = format!("cp-{i}");
            cache.set(key.clone(), std::sync::Arc::clone(&checkpoint), None);
            recency.push(key);
        }
        for touch in touches {
            let key = recency[touch.index(recency.len())].clone();
            prop_assert!(cache.get(&key).is_some());
            recency.retain(|k| k != &key);
            recency.push(key);
        }

        cache.set("newcomer", std::sync::Arc::clone(&checkpoint), None);

        prop_assert_eq!(cache.size(), capacity);
        prop_assert!(!cache.contains(&recency[0]));
        for key in &recency[1..] {
            prop_assert!(cache.contains(key));
        }
        prop_assert!(cache.contains("newcomer"));
    }

    #[test]
    fn checkpoint_json_round_trip(
        state in state_map(),
        channel_values in state_map(),
        checkpoint_type in checkpoint_type(),
        status in checkpoint_status(),
        tags in prop::collection::vec("[a-z]{1,6}", 0..4),
        expiry_hours in prop::option::of(-100i64..100),
    ) {
        let mut checkpoint = Checkpoint::for_thread("thread-1", state, checkpoint_type);
        checkpoint.channel_values = channel_values;
        checkpoint.status = status;
        for tag in tags {
            checkpoint.add_tag(tag);
        }
        if let Some(hours) = expiry_hours {
            checkpoint.set_expiration(hours);
        }

        let restored = Checkpoint::from_json(checkpoint.to_json().unwrap()).unwrap();
        prop_assert_eq!(restored, checkpoint);
    }
}
