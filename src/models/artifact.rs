//! Artifact model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable, versioned build output held in artifact storage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Path relative to the storage root (`<kind>/<namespace>/<name>/<file>`)
    pub path: String,

    /// HTTP address the artifact is served from
    #[serde(default)]
    pub url: String,

    /// Logical revision, the chart version for HelmChart artifacts
    #[serde(default)]
    pub revision: String,

    /// SHA-256 of the stored file, hex encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,

    /// Time the file was last written to storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Returns true if this artifact was produced for `revision`
    pub fn has_revision(&self, revision: &str) -> bool {
        self.revision == revision
    }

    /// File name component of the storage path
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Convenience for `Option<&Artifact>::has_revision`, mirroring nil-safe lookups
pub fn has_revision(artifact: Option<&Artifact>, revision: &str) -> bool {
    artifact.is_some_and(|a| a.has_revision(revision))
}
