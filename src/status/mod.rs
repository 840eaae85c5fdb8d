//! Condition-based status model
//!
//! Conditions are kept as a list keyed by `type`: setting a condition updates
//! the existing entry in place and only bumps `lastTransitionTime` when the
//! status value actually flips, so re-applying the same condition produces no
//! diff.

pub mod summary;

pub use summary::{finalize_status, summarize_ready};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary condition derived from the tracked negative conditions
pub const READY: &str = "Ready";
/// The object is mid-work
pub const RECONCILING: &str = "Reconciling";
/// The object stopped making progress in a non-ready state
pub const STALLED: &str = "Stalled";
/// Packaging the chart failed
pub const BUILD_FAILED: &str = "BuildFailed";
/// Acquiring the upstream source failed
pub const FETCH_FAILED: &str = "FetchFailed";
/// A newer revision exists than the one advertised
pub const ARTIFACT_OUTDATED: &str = "ArtifactOutdated";
/// No artifact is advertised for the object
pub const ARTIFACT_UNAVAILABLE: &str = "ArtifactUnavailable";

/// Negative-polarity conditions in summary priority order
pub const NEGATIVE_CONDITIONS: &[&str] = &[
    BUILD_FAILED,
    FETCH_FAILED,
    ARTIFACT_OUTDATED,
    ARTIFACT_UNAVAILABLE,
];

/// Conditions this controller owns on the status subresource
pub const OWNED_CONDITIONS: &[&str] = &[
    BUILD_FAILED,
    FETCH_FAILED,
    ARTIFACT_OUTDATED,
    ARTIFACT_UNAVAILABLE,
    READY,
    RECONCILING,
    STALLED,
];

pub const SUCCEEDED_REASON: &str = "Succeeded";
pub const PROGRESSING_REASON: &str = "Progressing";
pub const NO_ARTIFACT_REASON: &str = "NoArtifact";
pub const NEW_REVISION_REASON: &str = "NewRevision";
pub const STORAGE_OPERATION_FAILED_REASON: &str = "StorageOperationFailed";

/// Status value of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A named status signal with reason and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Look up a condition by type
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if the condition exists and has status `True`
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(Condition::is_true)
}

/// Returns true if the condition exists and has status `False`
pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Insert or update a condition
pub fn set(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: i64,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(Utc::now());
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = generation;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            observed_generation: generation,
            last_transition_time: Some(Utc::now()),
            reason: reason.to_string(),
            message: message.to_string(),
        }),
    }
}

pub fn mark_true(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    message: &str,
    generation: i64,
) {
    set(conditions, type_, ConditionStatus::True, reason, message, generation);
}

pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    message: &str,
    generation: i64,
) {
    set(conditions, type_, ConditionStatus::False, reason, message, generation);
}

pub fn mark_unknown(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    message: &str,
    generation: i64,
) {
    set(conditions, type_, ConditionStatus::Unknown, reason, message, generation);
}

pub fn mark_reconciling(
    conditions: &mut Vec<Condition>,
    reason: &str,
    message: &str,
    generation: i64,
) {
    mark_true(conditions, RECONCILING, reason, message, generation);
}

pub fn mark_stalled(conditions: &mut Vec<Condition>, reason: &str, message: &str, generation: i64) {
    mark_true(conditions, STALLED, reason, message, generation);
}

/// Remove a condition; a no-op if absent
pub fn delete(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_inserts_then_updates_in_place() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, BUILD_FAILED, "ChartPackageFailed", "boom", 1);
        mark_true(&mut conditions, FETCH_FAILED, "SourceUnavailable", "gone", 1);
        mark_true(&mut conditions, BUILD_FAILED, "ChartPackageFailed", "boom again", 2);

        assert_eq!(conditions.len(), 2);
        let build = get(&conditions, BUILD_FAILED).unwrap();
        assert_eq!(build.message, "boom again");
        assert_eq!(build.observed_generation, 2);
    }

    #[test]
    fn test_transition_time_only_changes_on_flip() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, READY, SUCCEEDED_REASON, "ok", 1);
        let first = get(&conditions, READY).unwrap().last_transition_time;

        mark_true(&mut conditions, READY, SUCCEEDED_REASON, "still ok", 1);
        assert_eq!(get(&conditions, READY).unwrap().last_transition_time, first);

        mark_false(&mut conditions, READY, "Failed", "not ok", 1);
        assert!(is_false(&conditions, READY));
    }

    #[test]
    fn test_delete_is_noop_when_absent() {
        let mut conditions = Vec::new();
        delete(&mut conditions, STALLED);
        assert!(conditions.is_empty());
        mark_stalled(&mut conditions, "Failed", "x", 1);
        delete(&mut conditions, STALLED);
        assert!(get(&conditions, STALLED).is_none());
    }

    #[test]
    fn test_condition_serializes_with_type_key() {
        let mut conditions = Vec::new();
        mark_reconciling(&mut conditions, PROGRESSING_REASON, "", 4);
        let json = serde_json::to_value(&conditions[0]).unwrap();
        assert_eq!(json["type"], "Reconciling");
        assert_eq!(json["status"], "True");
        assert_eq!(json["observedGeneration"], 4);
    }
}
