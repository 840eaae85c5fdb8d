//! HelmChart reconciliation
//!
//! One pass drives a HelmChart from its persisted state to the next stable
//! state: admission (suspend, finalizer), deletion, storage, source, chart
//! build and publication. Each stage either lets the pass continue or ends
//! it; the status is always patched once at the end of the pass.

mod error;
mod gc;
mod publish;

pub use error::ReconcileError;
pub use publish::BuiltChart;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::accessor::{Accessor, PatchOptions};
use crate::builder::{BuilderFactory, ChartBuilder};
use crate::events::{EventRecorder, Severity};
use crate::models::{
    HELM_CHART_KIND, HelmChart, ObjectKey, SOURCE_FINALIZER, SourceKind, artifact::has_revision,
    validate_chart_name,
};
use crate::status::{
    self, ARTIFACT_OUTDATED, ARTIFACT_UNAVAILABLE, BUILD_FAILED, FETCH_FAILED,
    NEW_REVISION_REASON, NO_ARTIFACT_REASON, OWNED_CONDITIONS, PROGRESSING_REASON,
    STORAGE_OPERATION_FAILED_REASON,
};
use crate::storage::Store;

/// Alias refreshed to point at the latest artifact
pub const DEFAULT_ARTIFACT_ALIAS: &str = "latest.tar.gz";

pub const SOURCE_UNAVAILABLE_REASON: &str = "SourceUnavailable";
pub const NO_SOURCE_ARTIFACT_REASON: &str = "NoSourceArtifact";
pub const INVALID_CHART_NAME_REASON: &str = "InvalidChartName";

/// What should happen after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run another pass right away
    Requeue,
    /// Run another pass after the given delay
    RequeueAfter(Duration),
    /// Nothing further until the object or one of its sources changes
    Done,
}

impl Action {
    /// True when the pass reached a stable state rather than asking for an
    /// immediate retry
    pub fn is_settled(&self) -> bool {
        !matches!(self, Action::Requeue)
    }
}

/// Drives HelmChart objects towards a published chart artifact
pub struct HelmChartReconciler {
    accessor: Arc<dyn Accessor>,
    store: Arc<dyn Store>,
    builders: Arc<dyn BuilderFactory>,
    events: Arc<dyn EventRecorder>,
    alias: String,
}

impl HelmChartReconciler {
    pub fn new(
        accessor: Arc<dyn Accessor>,
        store: Arc<dyn Store>,
        builders: Arc<dyn BuilderFactory>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            accessor,
            store,
            builders,
            events,
            alias: DEFAULT_ARTIFACT_ALIAS.to_string(),
        }
    }

    /// Use a different name for the latest-artifact alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Run one reconciliation pass for the object with the given key
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let start = Instant::now();

        let mut obj = match self.accessor.get(key).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                tracing::debug!(chart = %key, "Object no longer exists");
                return Ok(Action::Done);
            }
            Err(e) => return Err(ReconcileError::Load(e)),
        };

        self.events.record_suspend(&obj, obj.spec.suspend);
        if obj.spec.suspend {
            tracing::info!(chart = %key, "Reconciliation is suspended for this object");
            return Ok(Action::Done);
        }

        // A deleting object that never got our finalizer has nothing stored
        if obj.metadata.is_deleting() && !obj.metadata.has_finalizer(SOURCE_FINALIZER) {
            return Ok(Action::Done);
        }

        let result = self.reconcile_object(&mut obj).await;
        self.finish(&mut obj, result, start).await
    }

    async fn reconcile_object(&self, obj: &mut HelmChart) -> Result<Action, ReconcileError> {
        if !obj.metadata.has_finalizer(SOURCE_FINALIZER) {
            obj.metadata.add_finalizer(SOURCE_FINALIZER);
            return Ok(Action::Requeue);
        }

        if obj.metadata.is_deleting() {
            return self.reconcile_delete(obj).await;
        }

        self.reconcile_live(obj).await
    }

    /// Summarize the status, patch the object and record metrics
    async fn finish(
        &self,
        obj: &mut HelmChart,
        result: Result<Action, ReconcileError>,
        start: Instant,
    ) -> Result<Action, ReconcileError> {
        let settled = matches!(&result, Ok(action) if action.is_settled());
        status::finalize_status(obj, settled);

        let options = PatchOptions {
            owned_conditions: OWNED_CONDITIONS,
            metadata: true,
            status: true,
        };
        let patched = self.accessor.patch(obj, &options).await;

        self.events.record_readiness(obj);
        self.events.record_duration(obj, start);
        let released =
            obj.metadata.is_deleting() && !obj.metadata.has_finalizer(SOURCE_FINALIZER);
        if released && patched.is_ok() {
            self.events.forget(&obj.key());
        }

        match (result, patched) {
            (result, Ok(())) => result,
            (Ok(_), Err(e)) => Err(ReconcileError::Patch(e)),
            (Err(err), Err(e)) => Err(err.aggregate(ReconcileError::Patch(e))),
        }
    }

    async fn reconcile_delete(&self, obj: &mut HelmChart) -> Result<Action, ReconcileError> {
        self.garbage_collect(obj).await?;
        obj.metadata.remove_finalizer(SOURCE_FINALIZER);
        tracing::info!(chart = %obj.key(), "Released deleted object");
        Ok(Action::Done)
    }

    async fn reconcile_live(&self, obj: &mut HelmChart) -> Result<Action, ReconcileError> {
        let generation = obj.metadata.generation;
        status::mark_reconciling(&mut obj.status.conditions, PROGRESSING_REASON, "", generation);

        self.reconcile_storage(obj).await?;

        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", obj.metadata.namespace, obj.metadata.name))
            .tempdir()
            .map_err(|e| {
                let message = format!("Failed to create temporary working directory: {}", e);
                status::mark_true(
                    &mut obj.status.conditions,
                    FETCH_FAILED,
                    STORAGE_OPERATION_FAILED_REASON,
                    &message,
                    generation,
                );
                self.event(obj, Severity::Error, STORAGE_OPERATION_FAILED_REASON, &message);
                ReconcileError::Workspace(e)
            })?;

        let mut builder = self.reconcile_source(obj, workspace.path()).await?;

        let Some(built) = self.reconcile_chart(obj, builder.as_mut()).await? else {
            return Ok(Action::RequeueAfter(obj.requeue_after()));
        };

        self.reconcile_artifact(obj, built).await
    }

    /// Make storage and the advertised artifact agree
    async fn reconcile_storage(&self, obj: &mut HelmChart) -> Result<(), ReconcileError> {
        self.garbage_collect(obj).await?;

        if let Some(artifact) = obj.artifact() {
            if !self.store.exists(artifact).await {
                tracing::info!(
                    chart = %obj.key(),
                    path = %artifact.path,
                    "Advertised artifact is missing from storage"
                );
                obj.status.artifact = None;
                obj.status.url = None;
            }
        }

        if obj.status.artifact.is_none() {
            let generation = obj.metadata.generation;
            status::mark_true(
                &mut obj.status.conditions,
                ARTIFACT_UNAVAILABLE,
                NO_ARTIFACT_REASON,
                "No artifact for resource in storage",
                generation,
            );
            return Ok(());
        }
        status::delete(&mut obj.status.conditions, ARTIFACT_UNAVAILABLE);

        if let Some(artifact) = obj.status.artifact.as_mut() {
            self.store.set_public_url(artifact);
        }
        if let Some(url) = obj.status.url.take() {
            let url = self.store.set_hostname(&url);
            obj.status.url = (!url.is_empty()).then_some(url);
        }
        Ok(())
    }

    fn fetch_failed(
        &self,
        obj: &mut HelmChart,
        reason: &str,
        err: ReconcileError,
    ) -> ReconcileError {
        let message = err.to_string();
        let generation = obj.metadata.generation;
        status::mark_true(&mut obj.status.conditions, FETCH_FAILED, reason, &message, generation);
        self.event(obj, Severity::Error, reason, &message);
        err
    }

    /// Resolve the upstream source into the workspace
    async fn reconcile_source(
        &self,
        obj: &mut HelmChart,
        workspace: &Path,
    ) -> Result<Box<dyn ChartBuilder>, ReconcileError> {
        let source_ref = obj.spec.source_ref.clone();
        let namespace = obj.metadata.namespace.clone();

        let source = match self
            .accessor
            .get_source(&namespace, source_ref.kind, &source_ref.name)
            .await
        {
            Ok(source) => source,
            Err(e) => {
                let err = ReconcileError::SourceUnavailable {
                    kind: source_ref.kind,
                    key: ObjectKey::new(&namespace, &source_ref.name),
                    source: e,
                };
                return Err(self.fetch_failed(obj, SOURCE_UNAVAILABLE_REASON, err));
            }
        };

        if !source.has_artifact() {
            let err = ReconcileError::NoSourceArtifact {
                kind: source.kind(),
                key: source.key(),
            };
            return Err(self.fetch_failed(obj, NO_SOURCE_ARTIFACT_REASON, err));
        }

        if source.kind() == SourceKind::HelmRepository {
            if let Err(message) = validate_chart_name(&obj.spec.chart) {
                let err = ReconcileError::InvalidChartName(message);
                return Err(self.fetch_failed(obj, INVALID_CHART_NAME_REASON, err));
            }
        }

        let mut builder = self.builders.builder(obj, &source);
        if let Err(e) = builder.resolve_source(workspace).await {
            let reason = e.reason();
            return Err(self.fetch_failed(obj, reason, ReconcileError::Build(e)));
        }

        status::delete(&mut obj.status.conditions, FETCH_FAILED);
        Ok(builder)
    }

    fn build_failed(&self, obj: &mut HelmChart, err: crate::builder::BuildError) -> ReconcileError {
        let message = err.to_string();
        let generation = obj.metadata.generation;
        status::mark_true(
            &mut obj.status.conditions,
            BUILD_FAILED,
            err.reason(),
            &message,
            generation,
        );
        self.event(obj, Severity::Error, BUILD_FAILED, &message);
        ReconcileError::Build(err)
    }

    /// Build the chart unless the advertised artifact already matches.
    ///
    /// Returns `None` when the advertised artifact is up to date.
    async fn reconcile_chart(
        &self,
        obj: &mut HelmChart,
        builder: &mut dyn ChartBuilder,
    ) -> Result<Option<BuiltChart>, ReconcileError> {
        let meta = match builder.load_metadata().await {
            Ok(meta) => meta,
            Err(e) => return Err(self.build_failed(obj, e)),
        };

        if has_revision(obj.artifact(), &meta.version)
            && obj.metadata.generation == obj.status.observed_generation
        {
            tracing::info!(
                chart = %obj.key(),
                revision = %meta.version,
                "Artifact up-to-date: skipping chart reconciliation"
            );
            // The advertised artifact is current again
            status::delete(&mut obj.status.conditions, BUILD_FAILED);
            status::delete(&mut obj.status.conditions, ARTIFACT_OUTDATED);
            return Ok(None);
        }

        let generation = obj.metadata.generation;
        if let Some(current) = obj.artifact().filter(|a| !a.has_revision(&meta.version)) {
            let message = format!(
                "New chart revision '{}' differs from stored revision '{}'",
                meta.version, current.revision
            );
            status::mark_true(
                &mut obj.status.conditions,
                ARTIFACT_OUTDATED,
                NEW_REVISION_REASON,
                &message,
                generation,
            );
        }

        let values_files = obj.values_files();
        if !values_files.is_empty() {
            if let Err(e) = builder.merge_values_files(&values_files).await {
                return Err(self.build_failed(obj, e));
            }
            tracing::debug!(chart = %obj.key(), files = ?values_files, "Merged values files");
        }

        match builder.is_unpacked_directory() {
            Ok(true) => match builder.fetch_missing_dependencies().await {
                Ok(0) => {}
                Ok(fetched) => {
                    tracing::debug!(
                        chart = %obj.key(),
                        fetched,
                        "Fetched missing chart dependencies"
                    );
                }
                Err(e) => return Err(self.build_failed(obj, e)),
            },
            Ok(false) => {}
            Err(e) => return Err(self.build_failed(obj, e)),
        }

        let path = match builder.build().await {
            Ok(path) => path,
            Err(e) => return Err(self.build_failed(obj, e)),
        };
        status::delete(&mut obj.status.conditions, BUILD_FAILED);

        let artifact = self.store.artifact_for(
            HELM_CHART_KIND,
            &obj.key(),
            &meta.version,
            &format!("{}-{}.tgz", meta.name, meta.version),
        );
        Ok(Some(BuiltChart { artifact, path }))
    }
}
