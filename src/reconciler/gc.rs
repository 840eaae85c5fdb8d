//! Garbage collection of stored artifacts

use std::collections::BTreeMap;

use super::{HelmChartReconciler, ReconcileError};
use crate::events::{
    GARBAGE_COLLECTION_FAILED_REASON, GARBAGE_COLLECTION_SUCCEEDED_REASON, Severity,
};
use crate::models::{HELM_CHART_KIND, HelmChart};
use crate::storage::ArtifactSelector;

impl HelmChartReconciler {
    /// Remove stored artifacts the object can no longer reference.
    ///
    /// An object under deletion loses every artifact in its storage directory
    /// and its advertised artifact is cleared. Otherwise everything but the
    /// advertised artifact is removed; without an advertised artifact there is
    /// nothing to keep and nothing is touched.
    pub(crate) async fn garbage_collect(&self, obj: &mut HelmChart) -> Result<(), ReconcileError> {
        let key = obj.key();

        if obj.metadata.is_deleting() {
            let selector = ArtifactSelector::for_object(HELM_CHART_KIND, &key);
            let removed = match self.store.remove_all(&selector).await {
                Ok(removed) => removed,
                Err(e) => {
                    self.event(
                        obj,
                        Severity::Error,
                        GARBAGE_COLLECTION_FAILED_REASON,
                        &format!("Garbage collection for deleted resource failed: {}", e),
                    );
                    return Err(ReconcileError::GarbageCollection(e));
                }
            };
            obj.status.artifact = None;
            if !removed.is_empty() {
                tracing::debug!(
                    chart = %key,
                    removed = ?removed,
                    "Removed artifacts of deleted object"
                );
                self.event(
                    obj,
                    Severity::Info,
                    GARBAGE_COLLECTION_SUCCEEDED_REASON,
                    "Garbage collected artifacts for deleted resource",
                );
            }
            return Ok(());
        }

        let Some(current) = obj.artifact().cloned() else {
            return Ok(());
        };
        match self.store.remove_all_except_current(&current).await {
            Ok(removed) if !removed.is_empty() => {
                tracing::debug!(chart = %key, removed = ?removed, "Removed superseded artifacts");
                self.event(
                    obj,
                    Severity::Info,
                    GARBAGE_COLLECTION_SUCCEEDED_REASON,
                    &format!("Garbage collected {} old artifact(s)", removed.len()),
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.event(
                    obj,
                    Severity::Error,
                    GARBAGE_COLLECTION_FAILED_REASON,
                    &format!("Garbage collection of old artifacts failed: {}", e),
                );
                Err(ReconcileError::GarbageCollection(e))
            }
        }
    }

    pub(crate) fn event(&self, obj: &HelmChart, severity: Severity, reason: &str, message: &str) {
        self.events.event(obj, severity, reason, message, &BTreeMap::new());
    }
}
