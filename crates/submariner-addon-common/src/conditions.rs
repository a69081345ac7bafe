//! Merge semantics for `status.conditions`
//!
//! Conditions are an insertion-ordered set keyed by `type`. The transition
//! time only moves when the status flips, so repeated reconciles that report
//! the same state produce byte-identical status and skip the write.

use chrono::Utc;

use crate::crd::{Condition, ConditionStatus};

/// Insert or merge `new` into `conditions`. Returns whether anything changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        let mut new = new;
        new.last_transition_time = Utc::now();
        conditions.push(new);
        return true;
    };

    let mut changed = false;
    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = Utc::now();
        changed = true;
    }
    if existing.reason != new.reason {
        existing.reason = new.reason;
        changed = true;
    }
    if existing.message != new.message {
        existing.message = new.message;
        changed = true;
    }
    if new.observed_generation.is_some() && existing.observed_generation != new.observed_generation
    {
        existing.observed_generation = new.observed_generation;
        changed = true;
    }
    changed
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when a condition of `type_` exists with status `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Remove the condition of `type_`. Returns whether one was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}
