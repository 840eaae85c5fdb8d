//! Kubernetes client module
//!
//! Handles connection to the Kubernetes API server and describes the
//! source.toolkit.fluxcd.io resources this controller reads and writes.

pub mod accessor;

pub use accessor::KubeAccessor;

use anyhow::{Context, Result};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Config};
use serde::de::DeserializeOwned;

use crate::models::{
    HELM_CHART_KIND, HELM_CHART_PLURAL, SOURCE_API_GROUP, SOURCE_API_VERSION, SourceKind,
};

/// Initialize and return a Kubernetes client
///
/// Uses the default kubeconfig loading strategy:
/// 1. In-cluster config (if running in a pod)
/// 2. KUBECONFIG environment variable
/// 3. ~/.kube/config
pub async fn create_client() -> Result<Client> {
    let config = Config::infer()
        .await
        .context("Failed to infer Kubernetes configuration")?;
    tracing::debug!(cluster = %config.cluster_url, "Connecting to Kubernetes API");
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    Ok(client)
}

fn source_group_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: SOURCE_API_GROUP.to_string(),
        version: SOURCE_API_VERSION.to_string(),
        api_version: format!("{}/{}", SOURCE_API_GROUP, SOURCE_API_VERSION),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// API resource for HelmChart objects
pub fn helm_chart_resource() -> ApiResource {
    source_group_resource(HELM_CHART_KIND, HELM_CHART_PLURAL)
}

/// API resource for an upstream source kind
pub fn source_resource(kind: SourceKind) -> ApiResource {
    source_group_resource(kind.as_str(), kind.plural())
}

/// Decode a dynamic object into one of the crate's models
pub fn decode_object<T: DeserializeOwned>(obj: &DynamicObject) -> serde_json::Result<T> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_chart_resource() {
        let resource = helm_chart_resource();
        assert_eq!(resource.api_version, "source.toolkit.fluxcd.io/v1");
        assert_eq!(resource.kind, "HelmChart");
        assert_eq!(resource.plural, "helmcharts");
    }

    #[test]
    fn test_decode_object() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "HelmChart",
            "metadata": {"name": "podinfo", "namespace": "default", "generation": 3},
            "spec": {
                "chart": "podinfo",
                "sourceRef": {"kind": "HelmRepository", "name": "podinfo"}
            }
        }))
        .unwrap();
        let chart: crate::models::HelmChart = decode_object(&obj).unwrap();
        assert_eq!(chart.metadata.generation, 3);
        assert_eq!(chart.spec.source_ref.kind, SourceKind::HelmRepository);
    }

    #[test]
    fn test_source_resource() {
        let resource = source_resource(SourceKind::Bucket);
        assert_eq!(resource.group, "source.toolkit.fluxcd.io");
        assert_eq!(resource.kind, "Bucket");
        assert_eq!(resource.plural, "buckets");
    }
}
