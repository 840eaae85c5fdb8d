//! Builder reading source artifacts from local storage
//!
//! GitRepository and Bucket artifacts are tarballs of the source tree; the
//! chart is a path inside them. HelmRepository artifacts are repository
//! indexes; the chart is downloaded from the URL the index lists.

use async_trait::async_trait;
use serde_yaml::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::package::{pack_chart_dir, read_chart_metadata, unpack_archive};
use super::repository::RepositoryIndex;
use super::values::merge_values;
use super::{BuildError, BuilderFactory, ChartBuilder, ChartMetadata, RepositoryLookup};
use crate::models::{HelmChart, Source};

/// Creates [`StorageChartBuilder`]s sharing one HTTP client
#[derive(Clone)]
pub struct StorageBuilderFactory {
    storage_root: PathBuf,
    http: reqwest::Client,
    repositories: Arc<dyn RepositoryLookup>,
}

impl StorageBuilderFactory {
    pub fn new(storage_root: impl Into<PathBuf>, repositories: Arc<dyn RepositoryLookup>) -> Self {
        Self {
            storage_root: storage_root.into(),
            http: reqwest::Client::new(),
            repositories,
        }
    }
}

impl BuilderFactory for StorageBuilderFactory {
    fn builder(&self, chart: &HelmChart, source: &Source) -> Box<dyn ChartBuilder> {
        Box::new(StorageChartBuilder {
            storage_root: self.storage_root.clone(),
            http: self.http.clone(),
            repositories: self.repositories.clone(),
            namespace: chart.metadata.namespace.clone(),
            chart: chart.spec.chart.clone(),
            version: chart.spec.version.clone(),
            source: source.clone(),
            workspace: None,
            source_root: None,
            chart_path: None,
            modified: false,
        })
    }
}

/// [`ChartBuilder`] over artifacts in local storage
pub struct StorageChartBuilder {
    storage_root: PathBuf,
    http: reqwest::Client,
    repositories: Arc<dyn RepositoryLookup>,
    namespace: String,
    chart: String,
    version: String,
    source: Source,
    workspace: Option<PathBuf>,
    /// Root values files are resolved against
    source_root: Option<PathBuf>,
    /// Packaged chart or chart directory, whichever is current
    chart_path: Option<PathBuf>,
    modified: bool,
}

/// Join `relative` onto `root`, refusing paths that leave `root`
fn join_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    (!escapes).then(|| root.join(relative))
}

async fn run_blocking<T, F>(f: F) -> Result<T, BuildError>
where
    F: FnOnce() -> Result<T, BuildError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BuildError::io("join build task", std::io::Error::other(e)))?
}

impl StorageChartBuilder {
    fn workspace(&self) -> Result<&Path, BuildError> {
        self.workspace
            .as_deref()
            .ok_or_else(|| BuildError::Pull("chart source has not been resolved".to_string()))
    }

    fn chart_path(&self) -> Result<&Path, BuildError> {
        self.chart_path
            .as_deref()
            .ok_or_else(|| BuildError::Pull("chart source has not been resolved".to_string()))
    }

    async fn read_index(&self, artifact_path: &str) -> Result<RepositoryIndex, BuildError> {
        let path = join_within(&self.storage_root, artifact_path)
            .ok_or_else(|| BuildError::Pull(format!("invalid artifact path '{}'", artifact_path)))?;
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            BuildError::Pull(format!("failed to read repository index '{}': {}", artifact_path, e))
        })?;
        RepositoryIndex::from_yaml(&contents)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BuildError> {
        tracing::debug!(url = %url, "Downloading chart");
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BuildError::Pull(format!("failed to download '{}': {}", url, e)))?
            .bytes()
            .await
            .map_err(|e| BuildError::Pull(format!("failed to download '{}': {}", url, e)))?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| BuildError::io(format!("write '{}'", dest.display()), e))
    }

    /// Make sure the chart is an unpacked directory and return it
    async fn ensure_unpacked(&mut self) -> Result<PathBuf, BuildError> {
        let chart_path = self.chart_path()?.to_path_buf();
        if chart_path.is_dir() {
            return Ok(chart_path);
        }

        let dest = self.workspace()?.join("chart");
        let archive = chart_path.clone();
        let unpack_dest = dest.clone();
        let meta = run_blocking(move || {
            unpack_archive(&archive, &unpack_dest)?;
            read_chart_metadata(&archive)
        })
        .await?;

        let chart_dir = dest.join(&meta.name);
        if matches!(self.source, Source::HelmRepository(_)) {
            self.source_root = Some(chart_dir.clone());
        }
        self.chart_path = Some(chart_dir.clone());
        Ok(chart_dir)
    }

    async fn dependency_present(charts_dir: &Path, name: &str) -> bool {
        if tokio::fs::metadata(charts_dir.join(name))
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return true;
        }
        let pattern = format!(
            "{}/{}-*.tgz",
            glob::Pattern::escape(&charts_dir.to_string_lossy()),
            glob::Pattern::escape(name)
        );
        glob::glob(&pattern).is_ok_and(|mut paths| paths.any(|p| p.is_ok()))
    }
}

#[async_trait]
impl ChartBuilder for StorageChartBuilder {
    async fn resolve_source(&mut self, workspace: &Path) -> Result<(), BuildError> {
        let artifact = self.source.artifact().cloned().ok_or_else(|| {
            BuildError::Pull(format!(
                "{} '{}' has no artifact",
                self.source.kind(),
                self.source.key()
            ))
        })?;
        self.workspace = Some(workspace.to_path_buf());

        match &self.source {
            Source::HelmRepository(repo) => {
                let index = self.read_index(&artifact.path).await?;
                let version = index.get(&self.chart, &self.version)?;
                let url = version.download_url(&repo.spec.url)?;
                let dest = workspace.join(format!("{}-{}.tgz", self.chart, version.version));
                self.download(&url, &dest).await?;
                self.chart_path = Some(dest);
            }
            Source::GitRepository(_) | Source::Bucket(_) => {
                let archive = join_within(&self.storage_root, &artifact.path).ok_or_else(|| {
                    BuildError::Pull(format!("invalid artifact path '{}'", artifact.path))
                })?;
                let source_dir = workspace.join("source");
                let unpack_dest = source_dir.clone();
                run_blocking(move || unpack_archive(&archive, &unpack_dest)).await?;

                let chart_path = join_within(&source_dir, &self.chart).ok_or_else(|| {
                    BuildError::Pull(format!("invalid chart path '{}'", self.chart))
                })?;
                if tokio::fs::metadata(&chart_path).await.is_err() {
                    return Err(BuildError::Pull(format!(
                        "chart path '{}' not found in {} '{}'",
                        self.chart,
                        self.source.kind(),
                        self.source.key()
                    )));
                }
                self.source_root = Some(source_dir);
                self.chart_path = Some(chart_path);
            }
        }
        Ok(())
    }

    async fn load_metadata(&mut self) -> Result<ChartMetadata, BuildError> {
        let chart_path = self.chart_path()?.to_path_buf();
        run_blocking(move || read_chart_metadata(&chart_path)).await
    }

    async fn merge_values_files(&mut self, files: &[String]) -> Result<(), BuildError> {
        let chart_dir = self.ensure_unpacked().await?;
        let root = self
            .source_root
            .clone()
            .unwrap_or_else(|| chart_dir.clone());

        let mut merged = Value::Null;
        for file in files {
            let path = join_within(&root, file)
                .ok_or_else(|| BuildError::Values(format!("invalid values file path '{}'", file)))?;
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| BuildError::Values(format!("failed to read '{}': {}", file, e)))?;
            let overlay: Value = serde_yaml::from_str(&contents)
                .map_err(|e| BuildError::Values(format!("failed to parse '{}': {}", file, e)))?;
            merge_values(&mut merged, overlay);
        }

        let rendered = serde_yaml::to_string(&merged)
            .map_err(|e| BuildError::Values(e.to_string()))?;
        let values_path = chart_dir.join("values.yaml");
        tokio::fs::write(&values_path, rendered)
            .await
            .map_err(|e| BuildError::io(format!("write '{}'", values_path.display()), e))?;
        self.modified = true;
        Ok(())
    }

    fn is_unpacked_directory(&self) -> Result<bool, BuildError> {
        Ok(self.chart_path()?.is_dir())
    }

    async fn fetch_missing_dependencies(&mut self) -> Result<usize, BuildError> {
        let chart_dir = self.ensure_unpacked().await?;
        let meta_dir = chart_dir.clone();
        let meta = run_blocking(move || read_chart_metadata(&meta_dir)).await?;
        if meta.dependencies.is_empty() {
            return Ok(0);
        }

        let charts_dir = chart_dir.join("charts");
        tokio::fs::create_dir_all(&charts_dir)
            .await
            .map_err(|e| BuildError::io(format!("create '{}'", charts_dir.display()), e))?;

        let mut fetched = 0;
        for dep in &meta.dependencies {
            if Self::dependency_present(&charts_dir, &dep.name).await {
                continue;
            }

            if let Some(local) = dep.repository.strip_prefix("file://") {
                let local_dir = chart_dir.join(local);
                let dest = charts_dir.clone();
                run_blocking(move || pack_chart_dir(&local_dir, &dest))
                    .await
                    .map_err(|e| BuildError::Dependencies(format!("'{}': {}", dep.name, e)))?;
            } else if dep.repository.is_empty() {
                return Err(BuildError::Dependencies(format!(
                    "dependency '{}' is missing and has no repository",
                    dep.name
                )));
            } else {
                let index_artifact = self
                    .repositories
                    .repository_index(&self.namespace, &dep.repository)
                    .await
                    .ok_or_else(|| {
                        BuildError::Dependencies(format!(
                            "no HelmRepository with an artifact found for '{}'",
                            dep.repository
                        ))
                    })?;
                let index = self
                    .read_index(&index_artifact.path)
                    .await
                    .map_err(|e| BuildError::Dependencies(e.to_string()))?;
                let version = index
                    .get(&dep.name, &dep.version)
                    .map_err(|e| BuildError::Dependencies(e.to_string()))?;
                let url = version
                    .download_url(&dep.repository)
                    .map_err(|e| BuildError::Dependencies(e.to_string()))?;
                let dest = charts_dir.join(format!("{}-{}.tgz", dep.name, version.version));
                self.download(&url, &dest)
                    .await
                    .map_err(|e| BuildError::Dependencies(e.to_string()))?;
            }
            fetched += 1;
        }

        if fetched > 0 {
            self.modified = true;
        }
        Ok(fetched)
    }

    async fn build(&mut self) -> Result<PathBuf, BuildError> {
        let chart_path = self.chart_path()?.to_path_buf();
        if !chart_path.is_dir() && !self.modified {
            return Ok(chart_path);
        }
        let chart_dir = self.ensure_unpacked().await?;
        let dest = self.workspace()?.to_path_buf();
        run_blocking(move || pack_chart_dir(&chart_dir, &dest)).await
    }
}
