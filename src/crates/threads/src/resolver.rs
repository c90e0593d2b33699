//! Conflict resolution strategies

use crate::conflict::{Resolution, StateConflict};
use crate::error::{Result, SyncError};
use crate::State;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How a conflict is settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepSource,
    KeepTarget,
    /// Newer timestamp wins; ties keep the target
    #[default]
    LatestWins,
    /// Objects merge shallowly (target keys win), arrays union, anything else keeps the source
    MergeValues,
    /// Leave every conflict for the caller
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::KeepSource => "keep_source",
            ResolutionStrategy::KeepTarget => "keep_target",
            ResolutionStrategy::LatestWins => "latest_wins",
            ResolutionStrategy::MergeValues => "merge_values",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

/// Field updates produced by resolution; `None` removes the field
pub type StateUpdates = HashMap<String, Option<Value>>;

/// Apply resolved updates to a state in place
pub fn apply_updates(state: &mut State, updates: StateUpdates) {
    for (path, value) in updates {
        match value {
            Some(value) => {
                state.insert(path, value);
            }
            None => {
                state.remove(&path);
            }
        }
    }
}

/// Conflicts after a resolution pass, resolved or not
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConflicts {
    conflicts: Vec<StateConflict>,
}

impl ResolvedConflicts {
    pub fn conflicts(&self) -> &[StateConflict] {
        &self.conflicts
    }

    pub fn into_conflicts(self) -> Vec<StateConflict> {
        self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Whether every conflict received a resolution
    pub fn is_complete(&self) -> bool {
        self.conflicts.iter().all(StateConflict::is_resolved)
    }

    pub fn resolved_paths(&self) -> Vec<String> {
        self.paths_where(true)
    }

    pub fn unresolved_paths(&self) -> Vec<String> {
        self.paths_where(false)
    }

    fn paths_where(&self, resolved: bool) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|c| c.is_resolved() == resolved)
            .map(|c| c.path.clone())
            .collect()
    }

    /// Updates for the resolved conflicts only, ignoring the rest
    pub fn resolved_updates(&self) -> StateUpdates {
        self.conflicts
            .iter()
            .filter_map(|c| {
                c.resolution
                    .as_ref()
                    .map(|r| (c.path.clone(), r.value.clone()))
            })
            .collect()
    }

    /// Updates for every conflict; fails listing the paths left unresolved
    pub fn into_updates(self) -> Result<StateUpdates> {
        let unresolved = self.unresolved_paths();
        if !unresolved.is_empty() {
            return Err(SyncError::UnresolvedConflicts(unresolved));
        }
        Ok(self
            .conflicts
            .into_iter()
            .filter_map(|c| c.resolution.map(|r| (c.path, r.value)))
            .collect())
    }
}

/// Stateless resolver; each call sees only the conflicts passed to it
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve_conflicts(
        &self,
        conflicts: Vec<StateConflict>,
        strategy: ResolutionStrategy,
    ) -> ResolvedConflicts {
        let conflicts = conflicts
            .into_iter()
            .map(|mut conflict| {
                conflict.resolution = self
                    .resolve_value(&conflict, strategy)
                    .map(|value| Resolution { strategy, value });
                conflict
            })
            .collect();
        ResolvedConflicts { conflicts }
    }

    /// Value chosen for one conflict; outer `None` means left unresolved
    pub fn resolve_value(
        &self,
        conflict: &StateConflict,
        strategy: ResolutionStrategy,
    ) -> Option<Option<Value>> {
        match strategy {
            ResolutionStrategy::KeepSource => Some(conflict.source_value.clone()),
            ResolutionStrategy::KeepTarget => Some(conflict.target_value.clone()),
            ResolutionStrategy::LatestWins => {
                if conflict.source_timestamp > conflict.target_timestamp {
                    Some(conflict.source_value.clone())
                } else {
                    Some(conflict.target_value.clone())
                }
            }
            ResolutionStrategy::MergeValues => Some(merge_values(
                conflict.source_value.as_ref(),
                conflict.target_value.as_ref(),
            )),
            ResolutionStrategy::Manual => None,
        }
    }
}

fn merge_values(source: Option<&Value>, target: Option<&Value>) -> Option<Value> {
    match (source, target) {
        (Some(Value::Object(s)), Some(Value::Object(t))) => {
            let mut merged: Map<String, Value> = s.clone();
            merged.extend(t.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(Value::Object(merged))
        }
        (Some(Value::Array(s)), Some(Value::Array(t))) => {
            let mut merged: Vec<Value> = Vec::with_capacity(s.len() + t.len());
            for item in s.iter().chain(t.iter()) {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Some(Value::Array(merged))
        }
        _ => source.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictType;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn conflict(source: Option<Value>, target: Option<Value>, source_newer: bool) -> StateConflict {
        let now = Utc::now();
        let (source_timestamp, target_timestamp) = if source_newer {
            (now, now - Duration::seconds(5))
        } else {
            (now - Duration::seconds(5), now)
        };
        StateConflict {
            path: "field".into(),
            conflict_type: ConflictType::Value,
            source_value: source,
            target_value: target,
            source_timestamp,
            target_timestamp,
            resolution: None,
        }
    }

    fn resolve_one(c: StateConflict, strategy: ResolutionStrategy) -> StateConflict {
        ConflictResolver::new()
            .resolve_conflicts(vec![c], strategy)
            .into_conflicts()
            .remove(0)
    }

    #[test]
    fn test_latest_wins_prefers_newer_source() {
        let c = conflict(Some(json!("new")), Some(json!("old")), true);
        let resolved = resolve_one(c.clone(), ResolutionStrategy::LatestWins);
        assert_eq!(resolved.resolved_value(), c.source_value.as_ref());
    }

    #[test]
    fn test_latest_wins_tie_keeps_target() {
        let mut c = conflict(Some(json!(1)), Some(json!(2)), true);
        c.target_timestamp = c.source_timestamp;
        let resolved = resolve_one(c, ResolutionStrategy::LatestWins);
        assert_eq!(resolved.resolved_value(), Some(&json!(2)));
    }

    #[test]
    fn test_keep_sides() {
        let c = conflict(Some(json!(1)), None, false);
        assert_eq!(
            resolve_one(c.clone(), ResolutionStrategy::KeepSource).resolved_value(),
            Some(&json!(1))
        );
        let kept_target = resolve_one(c, ResolutionStrategy::KeepTarget);
        assert!(kept_target.is_resolved());
        assert_eq!(kept_target.resolved_value(), None);
    }

    #[test]
    fn test_merge_values() {
        let objects = conflict(Some(json!({"a": 1, "b": 1})), Some(json!({"b": 2, "c": 3})), false);
        assert_eq!(
            resolve_one(objects, ResolutionStrategy::MergeValues).resolved_value(),
            Some(&json!({"a": 1, "b": 2, "c": 3}))
        );

        let arrays = conflict(Some(json!([1, 2, 2, 3])), Some(json!([3, 4, 1])), false);
        assert_eq!(
            resolve_one(arrays, ResolutionStrategy::MergeValues).resolved_value(),
            Some(&json!([1, 2, 3, 4]))
        );

        let mixed = conflict(Some(json!("s")), Some(json!([1])), false);
        assert_eq!(
            resolve_one(mixed, ResolutionStrategy::MergeValues).resolved_value(),
            Some(&json!("s"))
        );
    }

    #[test]
    fn test_manual_leaves_conflicts_open() {
        let resolved = ConflictResolver::new().resolve_conflicts(
            vec![conflict(Some(json!(1)), Some(json!(2)), true)],
            ResolutionStrategy::Manual,
        );
        assert!(!resolved.is_complete());
        assert!(resolved.resolved_updates().is_empty());
        match resolved.into_updates() {
            Err(SyncError::UnresolvedConflicts(paths)) => assert_eq!(paths, vec!["field"]),
            other => panic!("expected unresolved conflicts, got {:?}", other),
        }
    }

    #[test]
    fn test_updates_apply_sets_and_removals() {
        let mut removed = conflict(Some(json!(1)), None, false);
        removed.path = "gone".into();
        let kept = conflict(Some(json!("v")), Some(json!("w")), true);

        let updates = ConflictResolver::new()
            .resolve_conflicts(vec![removed, kept], ResolutionStrategy::KeepTarget)
            .into_updates()
            .unwrap();

        let mut state: State = [
            ("gone".to_string(), json!(1)),
            ("field".to_string(), json!("v")),
        ]
        .into_iter()
        .collect();
        apply_updates(&mut state, updates);

        assert!(!state.contains_key("gone"));
        assert_eq!(state["field"], json!("w"));
    }
}
