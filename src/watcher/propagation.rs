//! Change propagation
//!
//! Turns watch events into reconcile requests. Charts are requested when
//! their generation or reconcile-request annotation changes; sources fan out
//! to every chart indexed under them when the revision they advertise
//! changes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::index::DependencyIndex;
use crate::accessor::Accessor;
use crate::builder::RepositoryLookup;
use crate::models::{Artifact, HelmChart, ObjectKey, Source, SourceKind};

/// Whether a source event carries a revision the charts have not seen.
///
/// `previous` is `None` when the source was not observed before, and
/// `Some(revision)` with the revision it advertised otherwise. A source
/// losing its artifact is not a change worth propagating.
pub fn source_revision_changed(previous: Option<Option<&str>>, current: Option<&str>) -> bool {
    match (previous, current) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(None), Some(_)) => true,
        (Some(Some(old)), Some(new)) => old != new,
    }
}

/// Charts to reconcile after `source` advertised a new artifact
pub fn requests_for_source_change(index: &DependencyIndex, source: &Source) -> Vec<ObjectKey> {
    if !source.has_artifact() {
        return Vec::new();
    }
    let namespace = &source.metadata().namespace;
    index.charts_for_source(namespace, &source.index_key())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChartFingerprint {
    generation: i64,
    reconcile_request: Option<String>,
    deleting: bool,
}

impl ChartFingerprint {
    fn of(chart: &HelmChart) -> Self {
        Self {
            generation: chart.metadata.generation,
            reconcile_request: chart.metadata.reconcile_request().map(str::to_string),
            deleting: chart.metadata.is_deleting(),
        }
    }
}

#[derive(Debug, Default)]
struct Observed {
    charts: HashMap<ObjectKey, ChartFingerprint>,
    sources: HashMap<(SourceKind, ObjectKey), Option<String>>,
}

/// Keeps the dependency index current and decides which watch events lead
/// to reconcile requests
#[derive(Debug, Default)]
pub struct Propagator {
    index: DependencyIndex,
    observed: Mutex<Observed>,
}

impl Propagator {
    pub fn new(index: DependencyIndex) -> Self {
        Self {
            index,
            observed: Mutex::default(),
        }
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    fn observed(&self) -> std::sync::MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A chart was created or updated; returns its key if it needs a pass.
    ///
    /// Status-only updates, including the ones this controller writes, keep
    /// the generation and are filtered out.
    pub fn chart_applied(&self, chart: &HelmChart) -> Option<ObjectKey> {
        self.index.upsert_chart(chart);
        let key = chart.key();
        let fingerprint = ChartFingerprint::of(chart);
        let previous = self.observed().charts.insert(key.clone(), fingerprint.clone());
        (previous.as_ref() != Some(&fingerprint)).then_some(key)
    }

    pub fn chart_deleted(&self, key: &ObjectKey) {
        self.index.remove_chart(key);
        self.observed().charts.remove(key);
    }

    /// A source was created or updated; returns the charts to reconcile
    pub fn source_applied(&self, source: &Source) -> Vec<ObjectKey> {
        let key = source.key();
        if let Some(url) = source.repository_url() {
            self.index.upsert_repository(&key, url);
        }

        let current = source.artifact().map(|a| a.revision.clone());
        let previous = self
            .observed()
            .sources
            .insert((source.kind(), key.clone()), current.clone());
        if !source_revision_changed(
            previous.as_ref().map(Option::as_deref),
            current.as_deref(),
        ) {
            return Vec::new();
        }

        let requests = requests_for_source_change(&self.index, source);
        if !requests.is_empty() {
            tracing::debug!(
                source = %key,
                kind = %source.kind(),
                revision = current.as_deref().unwrap_or_default(),
                charts = requests.len(),
                "Source revision changed"
            );
        }
        requests
    }

    pub fn source_deleted(&self, kind: SourceKind, key: &ObjectKey) {
        if kind == SourceKind::HelmRepository {
            self.index.remove_repository(key);
        }
        self.observed().sources.remove(&(kind, key.clone()));
    }
}

/// [`RepositoryLookup`] answering from the normalized-URL index, reading the
/// matching HelmRepository through the accessor
pub struct IndexedRepositories {
    index: DependencyIndex,
    accessor: Arc<dyn Accessor>,
}

impl IndexedRepositories {
    pub fn new(index: DependencyIndex, accessor: Arc<dyn Accessor>) -> Self {
        Self { index, accessor }
    }
}

#[async_trait]
impl RepositoryLookup for IndexedRepositories {
    async fn repository_index(&self, namespace: &str, url: &str) -> Option<Artifact> {
        let key = self.index.repository_for_url(namespace, url)?;
        match self
            .accessor
            .get_source(&key.namespace, SourceKind::HelmRepository, &key.name)
            .await
        {
            Ok(source) => source.artifact().cloned(),
            Err(e) => {
                tracing::debug!(repository = %key, error = %e, "Indexed repository unavailable");
                None
            }
        }
    }
}
