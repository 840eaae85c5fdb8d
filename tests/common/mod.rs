//! Shared fixtures for the integration tests
//!
//! `MemoryCluster` stands in for the API server: it keeps HelmCharts and
//! sources in memory, bumps `resourceVersion` on every write and rejects
//! patches carrying a stale one.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chartsource::accessor::{Accessor, AccessorError, ListFilter, PatchOptions};
use chartsource::builder::{RepositoryLookup, StorageBuilderFactory};
use chartsource::events::LogRecorder;
use chartsource::models::{
    Artifact, GitRepository, HelmChart, HelmChartSpec, ObjectKey, ObjectMeta, SOURCE_FINALIZER,
    Source, SourceKind, SourceReference, SourceStatus,
};
use chartsource::reconciler::{Action, HelmChartReconciler, ReconcileError};
use chartsource::storage::LocalStorage;

pub const NAMESPACE: &str = "default";
pub const STORAGE_ADDRESS: &str = "source-controller.flux-system.svc";

type Interference = Box<dyn FnOnce(&mut HelmChart) + Send>;

#[derive(Default)]
pub struct MemoryCluster {
    charts: Mutex<HashMap<ObjectKey, HelmChart>>,
    sources: Mutex<HashMap<(SourceKind, ObjectKey), Source>>,
    next_version: AtomicUsize,
    patches: AtomicUsize,
    /// Applied to the stored object right after the next `get`, as if another
    /// writer raced the pass
    interfere: Mutex<Option<Interference>>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(&self, chart: &mut HelmChart) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        chart.metadata.resource_version = Some(version.to_string());
    }

    pub fn insert_chart(&self, mut chart: HelmChart) {
        self.bump(&mut chart);
        self.charts.lock().unwrap().insert(chart.key(), chart);
    }

    pub fn chart(&self, key: &ObjectKey) -> Option<HelmChart> {
        self.charts.lock().unwrap().get(key).cloned()
    }

    /// Change a stored chart the way its owner would
    pub fn edit_chart(&self, key: &ObjectKey, edit: impl FnOnce(&mut HelmChart)) {
        let mut charts = self.charts.lock().unwrap();
        let chart = charts.get_mut(key).expect("chart exists");
        edit(chart);
        self.bump(chart);
    }

    /// Request deletion; the object stays until its finalizers are gone
    pub fn delete_chart(&self, key: &ObjectKey) {
        self.edit_chart(key, |chart| {
            chart.metadata.deletion_timestamp = Some(chrono::Utc::now());
            chart.metadata.generation += 1;
        });
    }

    pub fn set_source(&self, source: Source) {
        self.sources
            .lock()
            .unwrap()
            .insert((source.kind(), source.key()), source);
    }

    pub fn interfere_after_next_get(&self, change: impl FnOnce(&mut HelmChart) + Send + 'static) {
        *self.interfere.lock().unwrap() = Some(Box::new(change));
    }

    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Accessor for MemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<HelmChart, AccessorError> {
        let mut charts = self.charts.lock().unwrap();
        let chart = charts.get_mut(key).ok_or_else(|| AccessorError::NotFound {
            kind: "HelmChart".to_string(),
            key: key.clone(),
        })?;
        let snapshot = chart.clone();
        if let Some(change) = self.interfere.lock().unwrap().take() {
            change(chart);
            self.bump(chart);
        }
        Ok(snapshot)
    }

    async fn get_source(
        &self,
        namespace: &str,
        kind: SourceKind,
        name: &str,
    ) -> Result<Source, AccessorError> {
        let key = ObjectKey::new(namespace, name);
        self.sources
            .lock()
            .unwrap()
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| AccessorError::NotFound {
                kind: kind.to_string(),
                key,
            })
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<HelmChart>, AccessorError> {
        let mut charts: Vec<HelmChart> = self
            .charts
            .lock()
            .unwrap()
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        charts.sort_by_key(|c| c.key());
        Ok(charts)
    }

    async fn patch(&self, obj: &HelmChart, options: &PatchOptions) -> Result<(), AccessorError> {
        let key = obj.key();
        let mut charts = self.charts.lock().unwrap();
        let stored = charts.get_mut(&key).ok_or_else(|| AccessorError::NotFound {
            kind: "HelmChart".to_string(),
            key: key.clone(),
        })?;
        if stored.metadata.resource_version != obj.metadata.resource_version {
            return Err(AccessorError::Conflict {
                kind: "HelmChart".to_string(),
                key,
            });
        }

        if options.metadata {
            stored.metadata.finalizers = obj.metadata.finalizers.clone();
        }
        if options.status {
            stored.status = obj.status.clone();
        }
        self.patches.fetch_add(1, Ordering::SeqCst);

        if stored.metadata.is_deleting() && stored.metadata.finalizers.is_empty() {
            charts.remove(&key);
        } else {
            let stored = charts.get_mut(&key).expect("chart exists");
            let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
            stored.metadata.resource_version = Some(version.to_string());
        }
        Ok(())
    }
}

/// Repository lookup for tests that never resolve remote dependencies
pub struct NoRepositories;

#[async_trait]
impl RepositoryLookup for NoRepositories {
    async fn repository_index(&self, _namespace: &str, _url: &str) -> Option<Artifact> {
        None
    }
}

pub fn chart_object(name: &str, chart_path: &str, source: &str) -> HelmChart {
    let mut meta = ObjectMeta::new(NAMESPACE, name);
    meta.generation = 1;
    HelmChart::new(
        meta,
        HelmChartSpec::new(
            chart_path,
            SourceReference {
                kind: SourceKind::GitRepository,
                name: source.to_string(),
                api_version: None,
            },
        ),
    )
}

/// Write a Git source tarball holding `charts/<chart>` at `version` into
/// storage and return the GitRepository advertising it
pub fn publish_git_source(storage_root: &Path, name: &str, chart: &str, version: &str) -> Source {
    let relative = format!("gitrepository/{}/{}/{}.tar.gz", NAMESPACE, name, version);

    let tree = tempfile::tempdir().unwrap();
    let dir = tree.path().join("charts").join(chart);
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(
        dir.join("Chart.yaml"),
        format!("apiVersion: v2\nname: {}\nversion: {}\n", chart, version),
    )
    .unwrap();
    fs::write(dir.join("values.yaml"), "replicaCount: 1\n").unwrap();
    fs::write(
        dir.join("templates/deployment.yaml"),
        "kind: Deployment\nspec:\n  replicas: {{ .Values.replicaCount }}\n",
    )
    .unwrap();

    let dest = storage_root.join(&relative);
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    let file = fs::File::create(&dest).unwrap();
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    tar.append_dir_all(".", tree.path()).unwrap();
    tar.into_inner().unwrap().finish().unwrap();

    Source::GitRepository(GitRepository {
        metadata: ObjectMeta::new(NAMESPACE, name),
        status: SourceStatus {
            artifact: Some(Artifact {
                path: relative,
                revision: format!("main@sha1:{}", version.replace('.', "")),
                ..Default::default()
            }),
            url: None,
        },
    })
}

/// A reconciler over a `MemoryCluster` and real storage in a temp dir
pub struct Harness {
    pub cluster: Arc<MemoryCluster>,
    pub storage: LocalStorage,
    pub events: Arc<LogRecorder>,
    pub reconciler: Arc<HelmChartReconciler>,
    _root: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path(), STORAGE_ADDRESS).unwrap();
        let cluster = MemoryCluster::new();
        let events = Arc::new(LogRecorder::new());
        let builders = Arc::new(StorageBuilderFactory::new(root.path(), Arc::new(NoRepositories)));
        let reconciler = HelmChartReconciler::new(
            cluster.clone(),
            Arc::new(storage.clone()),
            builders,
            events.clone(),
        );
        Self {
            cluster,
            storage,
            events,
            reconciler: Arc::new(reconciler),
            _root: root,
        }
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    /// Directory holding the artifacts of one HelmChart
    pub fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root().join("helmchart").join(NAMESPACE).join(name)
    }

    /// File names in the chart's artifact directory, lock files excluded
    pub fn stored_files(&self, name: &str) -> Vec<String> {
        let mut files: Vec<String> = match fs::read_dir(self.artifact_dir(name)) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|f| !f.ends_with(".lock"))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcileError> {
        self.reconciler.reconcile(&ObjectKey::new(NAMESPACE, name)).await
    }

    /// Run passes until one does not ask for an immediate retry
    pub async fn reconcile_until_settled(&self, name: &str) -> Result<Action, ReconcileError> {
        for _ in 0..5 {
            match self.reconcile(name).await? {
                Action::Requeue => continue,
                action => return Ok(action),
            }
        }
        panic!("{} did not settle", name);
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.cluster
            .chart(&ObjectKey::new(NAMESPACE, name))
            .is_some_and(|c| c.metadata.has_finalizer(SOURCE_FINALIZER))
    }
}
