//! Upstream source resources
//!
//! The reconciler only needs two things from a source: whether it currently
//! advertises an artifact, and that artifact. The three variants are a closed
//! set, so they are modelled as an enum rather than a trait object.

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::helmchart::{ObjectKey, ObjectMeta};
use super::source_kind::SourceKind;

/// Status fields shared by every source kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepositorySpec {
    #[serde(default)]
    pub url: String,
}

/// A Helm chart repository; its artifact is the repository index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepository {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: HelmRepositorySpec,
    #[serde(default)]
    pub status: SourceStatus,
}

/// A Git repository; its artifact is a tarball of the checked out tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: SourceStatus,
}

/// An object storage bucket; its artifact is a tarball of the bucket contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: SourceStatus,
}

/// Any upstream source a HelmChart can reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    HelmRepository(HelmRepository),
    GitRepository(GitRepository),
    Bucket(Bucket),
}

impl Source {
    /// Decode a source of the given kind from its API JSON
    pub fn from_value(kind: SourceKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            SourceKind::HelmRepository => Source::HelmRepository(serde_json::from_value(value)?),
            SourceKind::GitRepository => Source::GitRepository(serde_json::from_value(value)?),
            SourceKind::Bucket => Source::Bucket(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::HelmRepository(_) => SourceKind::HelmRepository,
            Source::GitRepository(_) => SourceKind::GitRepository,
            Source::Bucket(_) => SourceKind::Bucket,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Source::HelmRepository(r) => &r.metadata,
            Source::GitRepository(r) => &r.metadata,
            Source::Bucket(b) => &b.metadata,
        }
    }

    fn status(&self) -> &SourceStatus {
        match self {
            Source::HelmRepository(r) => &r.status,
            Source::GitRepository(r) => &r.status,
            Source::Bucket(b) => &b.status,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata().key()
    }

    /// The artifact currently advertised by the source
    pub fn artifact(&self) -> Option<&Artifact> {
        self.status().artifact.as_ref()
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact().is_some()
    }

    /// Key under which dependent charts are indexed (`Kind/name`)
    pub fn index_key(&self) -> String {
        format!("{}/{}", self.kind(), self.metadata().name)
    }

    /// Repository URL, only HelmRepository sources carry one
    pub fn repository_url(&self) -> Option<&str> {
        match self {
            Source::HelmRepository(r) => Some(r.spec.url.as_str()),
            _ => None,
        }
    }
}
