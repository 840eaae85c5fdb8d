//! HelmChart object model
//!
//! Only the fields the reconciler reads or writes are modelled. Objects are
//! decoded from the API server's JSON, so every optional field defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::artifact::Artifact;
use super::duration::parse_duration;
use super::source_kind::SourceKind;
use crate::status::Condition;

/// Finalizer guarding teardown of stored artifacts
pub const SOURCE_FINALIZER: &str = "finalizers.fluxcd.io";

/// Annotation users set to request an out-of-band reconciliation
pub const RECONCILE_REQUEST_ANNOTATION: &str = "reconcile.fluxcd.io/requestedAt";

/// Interval used when `spec.interval` is absent or unparsable
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Namespaced identity of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Subset of Kubernetes object metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default)]
    pub generation: i64,

    /// Optimistic concurrency token; patches carrying a stale value are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.finalizers.push(finalizer.to_string());
        }
    }

    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }

    /// Value of the reconcile-request annotation, if set
    pub fn reconcile_request(&self) -> Option<&str> {
        self.annotations
            .get(RECONCILE_REQUEST_ANNOTATION)
            .map(String::as_str)
    }
}

/// Reference to a source in the chart's own namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub kind: SourceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl SourceReference {
    /// Key under which charts are indexed by their source (`Kind/name`)
    pub fn index_key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartSpec {
    /// Chart name (HelmRepository) or path within the source (GitRepository, Bucket)
    pub chart: String,

    /// Version constraint for HelmRepository charts; `*` selects the latest
    #[serde(default = "default_version")]
    pub version: String,

    pub source_ref: SourceReference,

    #[serde(default = "default_interval")]
    pub interval: String,

    /// Values files merged over the chart's default values, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,

    /// Deprecated single values file, merged before `values_files`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<String>,

    #[serde(default)]
    pub suspend: bool,
}

fn default_version() -> String {
    "*".to_string()
}

fn default_interval() -> String {
    "1m".to_string()
}

impl HelmChartSpec {
    pub fn new(chart: impl Into<String>, source_ref: SourceReference) -> Self {
        Self {
            chart: chart.into(),
            version: default_version(),
            source_ref,
            interval: default_interval(),
            values_files: Vec::new(),
            values_file: None,
            suspend: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Stable URL of the `latest` alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled_reconcile_at: Option<String>,
}

/// The reconciled object: a desired packaged chart referencing a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    pub metadata: ObjectMeta,
    pub spec: HelmChartSpec,
    #[serde(default)]
    pub status: HelmChartStatus,
}

impl HelmChart {
    pub fn new(metadata: ObjectMeta, spec: HelmChartSpec) -> Self {
        Self {
            metadata,
            spec,
            status: HelmChartStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.status.artifact.as_ref()
    }

    /// Steady-state requeue interval
    pub fn requeue_after(&self) -> Duration {
        match parse_duration(&self.spec.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => DEFAULT_INTERVAL,
        }
    }

    /// Values files in merge order, with the deprecated single file first
    pub fn values_files(&self) -> Vec<String> {
        let mut files = Vec::with_capacity(self.spec.values_files.len() + 1);
        if let Some(file) = self.spec.values_file.as_deref().filter(|f| !f.is_empty()) {
            files.push(file.to_string());
        }
        for file in &self.spec.values_files {
            if !file.is_empty() && !files.contains(file) {
                files.push(file.clone());
            }
        }
        files
    }
}
