//! Source kind definitions
//!
//! A HelmChart references its upstream through a `(kind, name)` pair. The set of
//! kinds is closed: every place that branches on the kind matches on this enum
//! instead of comparing strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// API group shared by every resource this controller reads or writes
pub const SOURCE_API_GROUP: &str = "source.toolkit.fluxcd.io";

/// API version of the source resources
pub const SOURCE_API_VERSION: &str = "v1";

/// Kind of the reconciled object
pub const HELM_CHART_KIND: &str = "HelmChart";

/// Plural of the reconciled object, used for API paths and storage layout
pub const HELM_CHART_PLURAL: &str = "helmcharts";

/// Upstream source kinds a HelmChart may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    HelmRepository,
    GitRepository,
    Bucket,
}

impl SourceKind {
    /// Get the kind name as it appears in `spec.sourceRef.kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HelmRepository => "HelmRepository",
            SourceKind::GitRepository => "GitRepository",
            SourceKind::Bucket => "Bucket",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            SourceKind::HelmRepository => "helmrepositories",
            SourceKind::GitRepository => "gitrepositories",
            SourceKind::Bucket => "buckets",
        }
    }

    /// Try to parse a string into a SourceKind, returning None if invalid
    pub fn parse_optional(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// All source kinds, in watch registration order
    pub fn all() -> &'static [Self] {
        &[
            SourceKind::HelmRepository,
            SourceKind::GitRepository,
            SourceKind::Bucket,
        ]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HelmRepository" => Ok(SourceKind::HelmRepository),
            "GitRepository" => Ok(SourceKind::GitRepository),
            "Bucket" => Ok(SourceKind::Bucket),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}
