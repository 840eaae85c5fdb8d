//! Ready summary and patch-time status bookkeeping

use super::{
    Condition, ConditionStatus, NEGATIVE_CONDITIONS, PROGRESSING_REASON, READY, RECONCILING,
    STALLED, SUCCEEDED_REASON, delete, get, is_true, mark_false, mark_stalled, mark_true,
    mark_unknown,
};
use crate::models::{Artifact, HelmChart};

/// Recompute `Ready` from the tracked negative conditions.
///
/// The first true negative condition in priority order decides the reason
/// and message of a false `Ready`. With none true, `Ready` becomes true once an
/// artifact is advertised and stays unknown before that. An already-true
/// `Ready` keeps its reason and message.
pub fn summarize_ready(
    conditions: &mut Vec<Condition>,
    artifact: Option<&Artifact>,
    generation: i64,
) {
    let failing = NEGATIVE_CONDITIONS
        .iter()
        .filter_map(|type_| get(conditions.as_slice(), type_))
        .find(|c| c.is_true())
        .map(|c| (c.reason.clone(), c.message.clone()));

    if let Some((reason, message)) = failing {
        mark_false(conditions, READY, &reason, &message, generation);
        return;
    }

    if is_true(conditions, READY) {
        return;
    }

    match artifact {
        Some(artifact) => mark_true(
            conditions,
            READY,
            SUCCEEDED_REASON,
            &format!("Stored artifact for revision '{}'", artifact.revision),
            generation,
        ),
        None => mark_unknown(
            conditions,
            READY,
            PROGRESSING_REASON,
            "Reconciliation in progress",
            generation,
        ),
    }
}

/// Status bookkeeping applied right before the object is patched.
///
/// `settled` is true when the pass neither failed nor asked for an immediate
/// retry; only then is the generation recorded as observed and the
/// reconciling/stalled pair resolved.
pub fn finalize_status(obj: &mut HelmChart, settled: bool) {
    if let Some(request) = obj.metadata.reconcile_request().map(str::to_string) {
        obj.status.last_handled_reconcile_at = Some(request);
    }

    let generation = obj.metadata.generation;
    summarize_ready(
        &mut obj.status.conditions,
        obj.status.artifact.as_ref(),
        generation,
    );

    if !settled {
        return;
    }

    delete(&mut obj.status.conditions, RECONCILING);
    obj.status.observed_generation = generation;

    let ready = get(&obj.status.conditions, READY)
        .map(|c| (c.status, c.reason.clone(), c.message.clone()));
    match ready {
        Some((ConditionStatus::False, reason, message)) => {
            mark_stalled(&mut obj.status.conditions, &reason, &message, generation);
        }
        Some((ConditionStatus::True, _, _)) => delete(&mut obj.status.conditions, STALLED),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelmChartSpec, ObjectMeta, SourceKind, SourceReference};
    use crate::status::{
        is_false, mark_reconciling, ARTIFACT_OUTDATED, ARTIFACT_UNAVAILABLE, BUILD_FAILED,
        FETCH_FAILED, NEW_REVISION_REASON,
    };

    fn artifact(revision: &str) -> Artifact {
        Artifact {
            path: format!("helmchart/default/podinfo/podinfo-{}.tgz", revision),
            revision: revision.to_string(),
            ..Default::default()
        }
    }

    fn chart() -> HelmChart {
        let mut meta = ObjectMeta::new("default", "podinfo");
        meta.generation = 2;
        HelmChart::new(
            meta,
            HelmChartSpec::new(
                "podinfo",
                SourceReference {
                    kind: SourceKind::GitRepository,
                    name: "repo".to_string(),
                    api_version: None,
                },
            ),
        )
    }

    #[test]
    fn test_ready_false_takes_highest_priority_reason() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, ARTIFACT_UNAVAILABLE, "NoArtifact", "none", 1);
        mark_true(&mut conditions, FETCH_FAILED, "SourceUnavailable", "fetch", 1);
        mark_true(&mut conditions, BUILD_FAILED, "ChartPackageFailed", "build", 1);

        summarize_ready(&mut conditions, None, 1);
        let ready = get(&conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "ChartPackageFailed");
        assert_eq!(ready.message, "build");
    }

    #[test]
    fn test_false_negative_conditions_do_not_count() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, BUILD_FAILED, "Fixed", "", 1);
        mark_true(&mut conditions, ARTIFACT_OUTDATED, NEW_REVISION_REASON, "new", 1);
        summarize_ready(&mut conditions, Some(&artifact("1.0.0")), 1);
        assert_eq!(get(&conditions, READY).unwrap().reason, NEW_REVISION_REASON);
    }

    #[test]
    fn test_ready_true_with_artifact_and_no_failures() {
        let mut conditions = Vec::new();
        summarize_ready(&mut conditions, Some(&artifact("1.2.0")), 1);
        let ready = get(&conditions, READY).unwrap();
        assert!(ready.is_true());
        assert_eq!(ready.message, "Stored artifact for revision '1.2.0'");
    }

    #[test]
    fn test_ready_unknown_without_artifact() {
        let mut conditions = Vec::new();
        summarize_ready(&mut conditions, None, 1);
        assert_eq!(
            get(&conditions, READY).unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[test]
    fn test_summary_is_idempotent() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, FETCH_FAILED, "SourceUnavailable", "fetch", 1);
        summarize_ready(&mut conditions, None, 1);
        let once = conditions.clone();
        summarize_ready(&mut conditions, None, 1);
        assert_eq!(conditions, once);
    }

    #[test]
    fn test_finalize_settled_failure_marks_stalled() {
        let mut obj = chart();
        mark_reconciling(&mut obj.status.conditions, PROGRESSING_REASON, "", 2);
        mark_true(&mut obj.status.conditions, BUILD_FAILED, "ChartPackageFailed", "bad", 2);

        finalize_status(&mut obj, true);

        assert_eq!(obj.status.observed_generation, 2);
        assert!(get(&obj.status.conditions, RECONCILING).is_none());
        assert!(is_false(&obj.status.conditions, READY));
        let stalled = get(&obj.status.conditions, STALLED).unwrap();
        assert_eq!(stalled.reason, "ChartPackageFailed");
    }

    #[test]
    fn test_finalize_unsettled_keeps_reconciling() {
        let mut obj = chart();
        mark_reconciling(&mut obj.status.conditions, PROGRESSING_REASON, "", 2);
        finalize_status(&mut obj, false);
        assert!(is_true(&obj.status.conditions, RECONCILING));
        assert_eq!(obj.status.observed_generation, 0);
    }

    #[test]
    fn test_finalize_ready_clears_stalled_and_records_request() {
        let mut obj = chart();
        obj.status.artifact = Some(artifact("1.2.0"));
        obj.metadata.annotations.insert(
            crate::models::RECONCILE_REQUEST_ANNOTATION.to_string(),
            "2024-01-01T00:00:00Z".to_string(),
        );
        mark_stalled(&mut obj.status.conditions, "Old", "old", 1);

        finalize_status(&mut obj, true);

        assert!(get(&obj.status.conditions, STALLED).is_none());
        assert!(is_true(&obj.status.conditions, READY));
        assert_eq!(
            obj.status.last_handled_reconcile_at.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );

        let settled = obj.clone();
        finalize_status(&mut obj, true);
        assert_eq!(obj, settled);
    }
}
