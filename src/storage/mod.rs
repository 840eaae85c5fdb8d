//! Artifact storage
//!
//! The [`Store`] capability covers every storage mutation the reconciler
//! performs. Artifacts are addressed by their path relative to the storage
//! root, `<kind>/<namespace>/<name>/<file>`, so all artifacts of one object
//! share a directory.

mod local;

pub use local::LocalStorage;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::Path;

use crate::models::{Artifact, ObjectKey};

/// Errors returned by a [`Store`]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to {op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to acquire lock for artifact '{path}': {message}")]
    Lock { path: String, message: String },

    #[error("invalid artifact path '{0}'")]
    InvalidPath(String),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl StorageError {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Selects every stored artifact of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSelector {
    pub kind: String,
    pub key: ObjectKey,
}

impl ArtifactSelector {
    pub fn for_object(kind: &str, key: &ObjectKey) -> Self {
        Self {
            kind: kind.to_string(),
            key: key.clone(),
        }
    }

    /// Directory holding the object's artifacts, relative to the storage root
    pub fn dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.to_lowercase(),
            self.key.namespace,
            self.key.name
        )
    }
}

/// Exclusive hold on one artifact path, released when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ArtifactLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ArtifactLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the lock now rather than at end of scope
    pub fn unlock(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ArtifactLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Capability for storing and serving artifacts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Describe a new artifact for an object, with its public URL set
    fn artifact_for(
        &self,
        kind: &str,
        key: &ObjectKey,
        revision: &str,
        file_name: &str,
    ) -> Artifact;

    /// Returns true if the artifact's file is present
    async fn exists(&self, artifact: &Artifact) -> bool;

    /// Point the artifact's URL at the current storage address
    fn set_public_url(&self, artifact: &mut Artifact);

    /// Rewrite the host of `url` to the current storage address
    fn set_hostname(&self, url: &str) -> String;

    /// Create the artifact's directory
    async fn mkdir_all(&self, artifact: &Artifact) -> Result<(), StorageError>;

    /// Acquire the exclusive lock for the artifact's path
    async fn lock(&self, artifact: &Artifact) -> Result<ArtifactLock, StorageError>;

    /// Copy the file at `source` into place, recording checksum and update time
    async fn copy_into(&self, artifact: &mut Artifact, source: &Path) -> Result<(), StorageError>;

    /// Point the alias `name` in the artifact's directory at the artifact and
    /// return the alias URL
    async fn symlink_alias(&self, artifact: &Artifact, name: &str) -> Result<String, StorageError>;

    /// Remove every artifact matched by the selector; returns removed paths
    async fn remove_all(&self, selector: &ArtifactSelector) -> Result<Vec<String>, StorageError>;

    /// Remove every artifact in `current`'s directory except `current` itself;
    /// returns removed paths
    async fn remove_all_except_current(
        &self,
        current: &Artifact,
    ) -> Result<Vec<String>, StorageError>;
}
