//! Resource models
//!
//! Rust types for the HelmChart object this controller reconciles and the
//! upstream sources it reads.

pub mod artifact;
pub mod duration;
pub mod helmchart;
pub mod source;
pub mod source_kind;

pub use artifact::Artifact;
pub use duration::parse_duration;
pub use helmchart::{
    HelmChart, HelmChartSpec, HelmChartStatus, ObjectKey, ObjectMeta, SourceReference,
    RECONCILE_REQUEST_ANNOTATION, SOURCE_FINALIZER,
};
pub use source::{Bucket, GitRepository, HelmRepository, HelmRepositorySpec, Source, SourceStatus};
pub use source_kind::{
    SourceKind, HELM_CHART_KIND, HELM_CHART_PLURAL, SOURCE_API_GROUP, SOURCE_API_VERSION,
};

use regex::Regex;
use std::sync::LazyLock;

static CHART_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new("^([-a-z0-9]*)$").unwrap()
});

/// Check that `name` is a valid Helm chart name: lower case letters and
/// numbers, optionally separated by dashes.
pub fn validate_chart_name(name: &str) -> Result<(), String> {
    if CHART_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "invalid chart name '{}', a valid name must be lower case letters and numbers \
             and MAY be separated with dashes (-)",
            name
        ))
    }
}
