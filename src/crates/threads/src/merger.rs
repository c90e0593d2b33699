//! Combining several thread states into one

use crate::conflict::StateConflict;
use crate::State;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Last state wins wholesale
    Overwrite,
    /// Shallow merge in order; later keys win
    #[default]
    Merge,
    /// First state wins wholesale
    KeepFirst,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StateMerger;

impl StateMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge `states` in order; no strategy keeps the first state
    ///
    /// `resolved_conflicts` is accepted for conflict-aware strategies; the built-in
    /// strategies do not consult it. Callers apply resolutions with
    /// [`apply_updates`](crate::resolver::apply_updates).
    pub fn merge_states(
        &self,
        states: &[State],
        strategy: Option<MergeStrategy>,
        _resolved_conflicts: &[StateConflict],
    ) -> State {
        match strategy.unwrap_or(MergeStrategy::KeepFirst) {
            MergeStrategy::Overwrite => states.last().cloned().unwrap_or_default(),
            MergeStrategy::Merge => states.iter().fold(State::new(), |mut merged, state| {
                merged.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged
            }),
            MergeStrategy::KeepFirst => states.first().cloned().unwrap_or_default(),
        }
    }
}
