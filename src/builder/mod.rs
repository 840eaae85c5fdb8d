//! Chart building
//!
//! A [`ChartBuilder`] turns the artifact of an upstream source into a
//! packaged chart. The reconciler drives it step by step so each step can be
//! reported through its own condition; a [`BuilderFactory`] creates one
//! builder per reconciliation pass.

mod package;
mod repository;
mod storage;
mod values;

pub use package::{pack_chart_dir, read_chart_metadata, unpack_archive};
pub use repository::{ChartVersion, RepositoryIndex, compare_versions};
pub use storage::{StorageBuilderFactory, StorageChartBuilder};
pub use values::merge_values;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::models::{Artifact, HelmChart, Source};

/// Reason recorded when a chart could not be pulled from its source
pub const CHART_PULL_FAILED_REASON: &str = "ChartPullFailed";
/// Reason recorded when `Chart.yaml` could not be loaded
pub const CHART_LOAD_FAILED_REASON: &str = "ChartLoadFailed";
/// Reason recorded when values files could not be merged
pub const VALUES_FILES_ERROR_REASON: &str = "ValuesFilesError";
/// Reason recorded when chart dependencies could not be fetched
pub const DEPENDENCY_BUILD_FAILED_REASON: &str = "DependencyBuildFailed";
/// Reason recorded when the chart could not be packaged
pub const CHART_PACKAGE_FAILED_REASON: &str = "ChartPackageFailed";

/// Name and version from a chart's `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartDependency>,
}

/// Entry of `dependencies` in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub repository: String,
}

/// Errors produced while building a chart
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to pull chart: {0}")]
    Pull(String),

    #[error("failed to load chart metadata: {0}")]
    Metadata(String),

    #[error("failed to merge values files: {0}")]
    Values(String),

    #[error("failed to fetch chart dependencies: {0}")]
    Dependencies(String),

    #[error("failed to package chart: {0}")]
    Package(String),

    #[error("failed to {op}: {source}")]
    Io {
        op: String,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    pub fn io(op: impl Into<String>, source: io::Error) -> Self {
        BuildError::Io {
            op: op.into(),
            source,
        }
    }

    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            BuildError::Pull(_) => CHART_PULL_FAILED_REASON,
            BuildError::Metadata(_) => CHART_LOAD_FAILED_REASON,
            BuildError::Values(_) => VALUES_FILES_ERROR_REASON,
            BuildError::Dependencies(_) => DEPENDENCY_BUILD_FAILED_REASON,
            BuildError::Package(_) => CHART_PACKAGE_FAILED_REASON,
            BuildError::Io { .. } => crate::status::STORAGE_OPERATION_FAILED_REASON,
        }
    }
}

/// Step-wise chart builder for one reconciliation pass
#[async_trait]
pub trait ChartBuilder: Send {
    /// Materialize the chart source inside `workspace`
    async fn resolve_source(&mut self, workspace: &Path) -> Result<(), BuildError>;

    /// Load name and version of the resolved chart
    async fn load_metadata(&mut self) -> Result<ChartMetadata, BuildError>;

    /// Merge the given values files, in order, into the chart's values
    async fn merge_values_files(&mut self, files: &[String]) -> Result<(), BuildError>;

    /// Returns true if the resolved chart is an unpacked directory
    fn is_unpacked_directory(&self) -> Result<bool, BuildError>;

    /// Download dependencies missing from the chart's `charts/` directory;
    /// returns how many were fetched
    async fn fetch_missing_dependencies(&mut self) -> Result<usize, BuildError>;

    /// Package the chart, returning the path of the `.tgz`
    async fn build(&mut self) -> Result<PathBuf, BuildError>;
}

/// Creates a [`ChartBuilder`] for a chart and its resolved source
pub trait BuilderFactory: Send + Sync {
    fn builder(&self, chart: &HelmChart, source: &Source) -> Box<dyn ChartBuilder>;
}

/// Resolves Helm repositories referenced by URL from chart dependencies
#[async_trait]
pub trait RepositoryLookup: Send + Sync {
    /// Index artifact of the repository serving `url` in `namespace`, if known
    async fn repository_index(&self, namespace: &str, url: &str) -> Option<Artifact>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(BuildError::Pull("x".into()).reason(), "ChartPullFailed");
        assert_eq!(BuildError::Package("x".into()).reason(), "ChartPackageFailed");
        assert_eq!(
            BuildError::io("write", io::Error::other("disk full")).reason(),
            "StorageOperationFailed"
        );
    }

    #[test]
    fn test_chart_metadata_from_yaml() {
        let meta: ChartMetadata = serde_yaml::from_str(
            "apiVersion: v2\nname: podinfo\nversion: 6.0.0\ndependencies:\n  - name: redis\n    \
             version: 1.0.0\n    repository: file://../redis\n",
        )
        .unwrap();
        assert_eq!(meta.name, "podinfo");
        assert_eq!(meta.version, "6.0.0");
        assert_eq!(meta.dependencies[0].repository, "file://../redis");
    }
}
