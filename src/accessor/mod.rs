//! Cluster data access
//!
//! The reconciler never talks to the API server directly. It loads and
//! persists objects through the [`Accessor`] capability, which lets the same
//! state machine run against the real cluster ([`crate::kube::KubeAccessor`]) or
//! an in-memory fake in tests.

use async_trait::async_trait;

use crate::models::{HelmChart, ObjectKey, Source, SourceKind};

/// Errors surfaced by an [`Accessor`]
#[derive(Debug, thiserror::Error)]
pub enum AccessorError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("conflict patching {kind} '{key}': the object has been modified, refetch and retry")]
    Conflict { kind: String, key: ObjectKey },

    #[error("API request failed: {0}")]
    Api(String),

    #[error("failed to decode {kind} '{key}': {message}")]
    Decode {
        kind: String,
        key: ObjectKey,
        message: String,
    },
}

impl AccessorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessorError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AccessorError::Conflict { .. })
    }
}

/// Filter for [`Accessor::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Restrict to a namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    /// Only objects whose source index key (`Kind/name`) matches
    pub source_index: Option<String>,
}

impl ListFilter {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            source_index: None,
        }
    }

    pub fn with_source_index(mut self, index: impl Into<String>) -> Self {
        self.source_index = Some(index.into());
        self
    }

    pub fn matches(&self, chart: &HelmChart) -> bool {
        let namespace_ok = self
            .namespace
            .as_deref()
            .is_none_or(|ns| chart.metadata.namespace == ns);
        let source_ok = self
            .source_index
            .as_deref()
            .is_none_or(|index| chart.spec.source_ref.index_key() == index);
        namespace_ok && source_ok
    }
}

/// What a patch writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Condition types this controller is authoritative for; only these are
    /// written, any other conditions on the object are left alone
    pub owned_conditions: &'static [&'static str],
    /// Write `metadata.finalizers`
    pub metadata: bool,
    /// Write the status subresource
    pub status: bool,
}

/// Capability for reading and writing cluster objects
#[async_trait]
pub trait Accessor: Send + Sync {
    /// Fetch a HelmChart by key
    async fn get(&self, key: &ObjectKey) -> Result<HelmChart, AccessorError>;

    /// Fetch an upstream source
    async fn get_source(
        &self,
        namespace: &str,
        kind: SourceKind,
        name: &str,
    ) -> Result<Source, AccessorError>;

    /// List HelmCharts matching the filter
    async fn list(&self, filter: &ListFilter) -> Result<Vec<HelmChart>, AccessorError>;

    /// Persist the object. The write is conditional on
    /// `metadata.resourceVersion`; a stale version yields
    /// [`AccessorError::Conflict`] and nothing is written.
    async fn patch(&self, obj: &HelmChart, options: &PatchOptions) -> Result<(), AccessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelmChartSpec, ObjectMeta, SourceReference};

    fn chart(namespace: &str, source: &str) -> HelmChart {
        HelmChart::new(
            ObjectMeta::new(namespace, "chart"),
            HelmChartSpec::new(
                "chart",
                SourceReference {
                    kind: SourceKind::GitRepository,
                    name: source.to_string(),
                    api_version: None,
                },
            ),
        )
    }

    #[test]
    fn test_list_filter_matches() {
        let filter = ListFilter::in_namespace("apps").with_source_index("GitRepository/repo");
        assert!(filter.matches(&chart("apps", "repo")));
        assert!(!filter.matches(&chart("other", "repo")));
        assert!(!filter.matches(&chart("apps", "other")));
        assert!(ListFilter::default().matches(&chart("other", "other")));
    }

    #[test]
    fn test_error_predicates() {
        let err = AccessorError::NotFound {
            kind: "HelmChart".to_string(),
            key: ObjectKey::new("default", "podinfo"),
        };
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "HelmChart 'default/podinfo' not found");
    }
}
