//! Artifact publication
//!
//! The packaged chart is copied into storage while holding the artifact's
//! lock, then recorded on the status, then the alias is refreshed. The lock
//! guard lives until the end of [`HelmChartReconciler::publish_locked`], so
//! every return path releases it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Action, HelmChartReconciler, ReconcileError};
use crate::events::{NEW_ARTIFACT_REASON, Severity};
use crate::models::{Artifact, HelmChart, artifact::has_revision};
use crate::status::{
    self, ARTIFACT_OUTDATED, ARTIFACT_UNAVAILABLE, BUILD_FAILED, READY,
    STORAGE_OPERATION_FAILED_REASON, SUCCEEDED_REASON,
};
use crate::storage::StorageError;

/// A packaged chart waiting to be published
#[derive(Debug, Clone)]
pub struct BuiltChart {
    pub artifact: Artifact,
    pub path: PathBuf,
}

impl HelmChartReconciler {
    pub(crate) async fn reconcile_artifact(
        &self,
        obj: &mut HelmChart,
        built: BuiltChart,
    ) -> Result<Action, ReconcileError> {
        let revision = built.artifact.revision.clone();
        let result = self.publish_locked(obj, built).await;

        let generation = obj.metadata.generation;
        if obj.artifact().is_some() {
            status::delete(&mut obj.status.conditions, ARTIFACT_UNAVAILABLE);
        }
        if has_revision(obj.artifact(), &revision) {
            status::delete(&mut obj.status.conditions, ARTIFACT_OUTDATED);
            status::mark_true(
                &mut obj.status.conditions,
                READY,
                SUCCEEDED_REASON,
                &format!("Stored artifact for revision '{}'", revision),
                generation,
            );
        }

        result?;
        self.sweep_superseded(obj).await;
        Ok(Action::RequeueAfter(obj.requeue_after()))
    }

    fn storage_failure(
        &self,
        obj: &mut HelmChart,
        op: &'static str,
        source: StorageError,
    ) -> ReconcileError {
        let message = format!("Failed to {}: {}", op, source);
        let generation = obj.metadata.generation;
        status::mark_true(
            &mut obj.status.conditions,
            BUILD_FAILED,
            STORAGE_OPERATION_FAILED_REASON,
            &message,
            generation,
        );
        self.event(obj, Severity::Error, STORAGE_OPERATION_FAILED_REASON, &message);
        ReconcileError::Storage { op, source }
    }

    async fn publish_locked(
        &self,
        obj: &mut HelmChart,
        built: BuiltChart,
    ) -> Result<(), ReconcileError> {
        let BuiltChart { mut artifact, path } = built;

        if let Err(e) = self.store.mkdir_all(&artifact).await {
            return Err(self.storage_failure(obj, "create artifact directory", e));
        }
        let _lock = match self.store.lock(&artifact).await {
            Ok(lock) => lock,
            Err(e) => return Err(self.storage_failure(obj, "acquire lock for artifact", e)),
        };

        if let Err(e) = self.store.copy_into(&mut artifact, &path).await {
            return Err(self.storage_failure(obj, "write chart artifact to storage", e));
        }
        status::delete(&mut obj.status.conditions, BUILD_FAILED);

        let meta = BTreeMap::from([
            ("revision".to_string(), artifact.revision.clone()),
            ("checksum".to_string(), artifact.checksum.clone()),
        ]);
        let message = format!("Stored artifact for revision '{}'", artifact.revision);
        tracing::info!(chart = %obj.key(), revision = %artifact.revision, "Stored artifact");
        self.events
            .event(obj, Severity::Info, NEW_ARTIFACT_REASON, &message, &meta);

        obj.status.artifact = Some(artifact.clone());

        match self.store.symlink_alias(&artifact, &self.alias).await {
            Ok(url) if !url.is_empty() => obj.status.url = Some(url),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(chart = %obj.key(), error = %e, "Failed to update alias");
                self.event(
                    obj,
                    Severity::Error,
                    STORAGE_OPERATION_FAILED_REASON,
                    &format!("Failed to update status URL symlink: {}", e),
                );
            }
        }

        Ok(())
    }

    /// Best-effort removal of artifacts superseded by the one just published
    async fn sweep_superseded(&self, obj: &mut HelmChart) {
        if let Err(e) = self.garbage_collect(obj).await {
            tracing::warn!(
                chart = %obj.key(),
                error = %e,
                "Post-publish garbage collection failed"
            );
        }
    }
}
