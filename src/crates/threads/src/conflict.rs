//! Field-level conflict detection between two state snapshots

use crate::resolver::ResolutionStrategy;
use crate::State;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Kind of disagreement found for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Values differ, or the field exists on one side only
    Value,
    /// Both sides are objects with different key sets
    Structure,
    /// Values are of different JSON types
    Type,
    /// Reserved for reference-level disagreements; not produced by [`ConflictDetector`]
    Reference,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Value => "value_conflict",
            ConflictType::Structure => "structure_conflict",
            ConflictType::Type => "type_conflict",
            ConflictType::Reference => "reference_conflict",
        }
    }
}

/// How field values are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Compare rendered text: strings as-is, everything else as compact JSON.
    /// `1` and `"1"` render the same and surface as a type conflict.
    #[default]
    Rendered,
    /// Compare JSON values structurally; type and shape differences are
    /// reported ahead of plain value differences.
    Structural,
}

/// Outcome attached to a conflict by the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    /// Value the field should take; `None` means the field is removed
    pub value: Option<Value>,
}

/// One disagreement between source and target state for a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConflict {
    pub path: String,
    pub conflict_type: ConflictType,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
    pub source_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    pub resolution: Option<Resolution>,
}

impl StateConflict {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Value chosen by the resolver, if resolved and not a removal
    pub fn resolved_value(&self) -> Option<&Value> {
        self.resolution.as_ref().and_then(|r| r.value.as_ref())
    }
}

/// Detects conflicts over the union of keys of two states
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    mode: ComparisonMode,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: ComparisonMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ComparisonMode {
        self.mode
    }

    /// Conflicts between `source` and `target`, ordered by field path
    pub fn detect_conflicts(&self, source: &State, target: &State) -> Vec<StateConflict> {
        self.detect_conflicts_at(source, target, Utc::now())
    }

    /// Same as [`detect_conflicts`](Self::detect_conflicts); `now` stands in for
    /// values that carry no timestamp of their own.
    pub fn detect_conflicts_at(
        &self,
        source: &State,
        target: &State,
        now: DateTime<Utc>,
    ) -> Vec<StateConflict> {
        let paths: BTreeSet<&String> = source.keys().chain(target.keys()).collect();

        paths
            .into_iter()
            .filter_map(|path| {
                let source_value = source.get(path);
                let target_value = target.get(path);

                let conflict_type = match (source_value, target_value) {
                    (Some(s), Some(t)) => self.classify(s, t)?,
                    _ => ConflictType::Value,
                };

                Some(StateConflict {
                    path: path.clone(),
                    conflict_type,
                    source_value: source_value.cloned(),
                    target_value: target_value.cloned(),
                    source_timestamp: extract_timestamp(source_value).unwrap_or(now),
                    target_timestamp: extract_timestamp(target_value).unwrap_or(now),
                    resolution: None,
                })
            })
            .collect()
    }

    /// Classify a field present on both sides; `None` when they agree
    pub fn classify(&self, source: &Value, target: &Value) -> Option<ConflictType> {
        match self.mode {
            ComparisonMode::Rendered => {
                if render(source) != render(target) {
                    Some(ConflictType::Value)
                } else if kind(source) != kind(target) {
                    Some(ConflictType::Type)
                } else if key_sets_differ(source, target) {
                    Some(ConflictType::Structure)
                } else {
                    None
                }
            }
            ComparisonMode::Structural => {
                if source == target {
                    None
                } else if kind(source) != kind(target) {
                    Some(ConflictType::Type)
                } else if key_sets_differ(source, target) {
                    Some(ConflictType::Structure)
                } else {
                    Some(ConflictType::Value)
                }
            }
        }
    }
}

fn render(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn key_sets_differ(source: &Value, target: &Value) -> bool {
    match (source, target) {
        (Value::Object(s), Value::Object(t)) => {
            s.len() != t.len() || s.keys().any(|k| !t.contains_key(k))
        }
        _ => false,
    }
}

/// Timestamp carried by an object value under its `timestamp` key
///
/// Accepts RFC 3339 strings, naive ISO 8601 strings (read as UTC) and Unix
/// seconds.
pub fn extract_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value?.as_object()?.get("timestamp")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => match n.as_i64() {
            Some(secs) => DateTime::from_timestamp(secs, 0),
            None => n
                .as_f64()
                .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)),
        },
        _ => None,
    }
}
