//! Accessor backed by the Kubernetes API
//!
//! Objects are read as `DynamicObject`s and decoded into the crate's models, so
//! the accessor is not tied to generated CRD types. Finalizers are written with
//! a JSON merge patch and status through server-side apply; both carry the
//! `resourceVersion` the pass started from, which makes the API server reject
//! writes based on stale state with a 409.

use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{decode_object, helm_chart_resource, source_resource};
use crate::accessor::{Accessor, AccessorError, ListFilter, PatchOptions};
use crate::models::{HELM_CHART_KIND, HelmChart, ObjectKey, SOURCE_API_GROUP, SOURCE_API_VERSION};
use crate::models::{Source, SourceKind};

/// [`Accessor`] talking to a live cluster
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
    field_manager: String,
}

impl KubeAccessor {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn charts(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &helm_chart_resource())
    }
}

fn map_error(err: kube::Error, kind: &str, key: &ObjectKey) -> AccessorError {
    match err {
        kube::Error::Api(ref response) if response.code == 404 => AccessorError::NotFound {
            kind: kind.to_string(),
            key: key.clone(),
        },
        kube::Error::Api(ref response) if response.code == 409 => AccessorError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
        },
        other => AccessorError::Api(other.to_string()),
    }
}

fn to_value(obj: &DynamicObject, kind: &str, key: &ObjectKey) -> Result<Value, AccessorError> {
    serde_json::to_value(obj).map_err(|e| AccessorError::Decode {
        kind: kind.to_string(),
        key: key.clone(),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(
    obj: &DynamicObject,
    kind: &str,
    key: &ObjectKey,
) -> Result<T, AccessorError> {
    decode_object(obj).map_err(|e| AccessorError::Decode {
        kind: kind.to_string(),
        key: key.clone(),
        message: e.to_string(),
    })
}

/// Server-side apply body for the status subresource, restricted to the
/// conditions this controller owns
fn status_apply_body(
    obj: &HelmChart,
    options: &PatchOptions,
    resource_version: Option<&str>,
) -> Value {
    let conditions: Vec<_> = obj
        .status
        .conditions
        .iter()
        .filter(|c| options.owned_conditions.contains(&c.type_.as_str()))
        .collect();

    let mut status = json!({
        "observedGeneration": obj.status.observed_generation,
        "conditions": conditions,
    });
    if let Some(url) = &obj.status.url {
        status["url"] = json!(url);
    }
    if let Some(artifact) = &obj.status.artifact {
        status["artifact"] = json!(artifact);
    }
    if let Some(request) = &obj.status.last_handled_reconcile_at {
        status["lastHandledReconcileAt"] = json!(request);
    }

    let mut metadata = json!({
        "name": obj.metadata.name,
        "namespace": obj.metadata.namespace,
    });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = json!(rv);
    }

    json!({
        "apiVersion": format!("{}/{}", SOURCE_API_GROUP, SOURCE_API_VERSION),
        "kind": HELM_CHART_KIND,
        "metadata": metadata,
        "status": status,
    })
}

#[async_trait]
impl Accessor for KubeAccessor {
    async fn get(&self, key: &ObjectKey) -> Result<HelmChart, AccessorError> {
        let obj = self
            .charts(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_error(e, HELM_CHART_KIND, key))?;
        decode(&obj, HELM_CHART_KIND, key)
    }

    async fn get_source(
        &self,
        namespace: &str,
        kind: SourceKind,
        name: &str,
    ) -> Result<Source, AccessorError> {
        let key = ObjectKey::new(namespace, name);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &source_resource(kind));
        let obj = api
            .get(name)
            .await
            .map_err(|e| map_error(e, kind.as_str(), &key))?;
        let value = to_value(&obj, kind.as_str(), &key)?;
        Source::from_value(kind, value).map_err(|e| AccessorError::Decode {
            kind: kind.to_string(),
            key,
            message: e.to_string(),
        })
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<HelmChart>, AccessorError> {
        let api: Api<DynamicObject> = match filter.namespace.as_deref() {
            Some(ns) => self.charts(ns),
            None => Api::all_with(self.client.clone(), &helm_chart_resource()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| AccessorError::Api(e.to_string()))?;

        let mut charts = Vec::with_capacity(list.items.len());
        for obj in &list.items {
            let key = ObjectKey::new(
                obj.metadata.namespace.clone().unwrap_or_default(),
                obj.metadata.name.clone().unwrap_or_default(),
            );
            match decode::<HelmChart>(obj, HELM_CHART_KIND, &key) {
                Ok(chart) if filter.matches(&chart) => charts.push(chart),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(chart = %key, error = %e, "Skipping undecodable HelmChart");
                }
            }
        }
        Ok(charts)
    }

    async fn patch(&self, obj: &HelmChart, options: &PatchOptions) -> Result<(), AccessorError> {
        let key = obj.key();
        let api = self.charts(&key.namespace);
        let mut resource_version = obj.metadata.resource_version.clone();

        if options.metadata {
            let mut metadata = json!({ "finalizers": obj.metadata.finalizers });
            if let Some(rv) = &resource_version {
                metadata["resourceVersion"] = json!(rv);
            }
            let params = PatchParams {
                field_manager: Some(self.field_manager.clone()),
                ..Default::default()
            };
            let patched = api
                .patch(&key.name, &params, &Patch::Merge(json!({ "metadata": metadata })))
                .await
                .map_err(|e| map_error(e, HELM_CHART_KIND, &key))?;
            resource_version = patched.metadata.resource_version;
        }

        // Deleted objects whose last finalizer was just removed are gone
        if options.status && !(obj.metadata.is_deleting() && obj.metadata.finalizers.is_empty()) {
            let body = status_apply_body(obj, options, resource_version.as_deref());
            let params = PatchParams::apply(&self.field_manager).force();
            api.patch_status(&key.name, &params, &Patch::Apply(body))
                .await
                .map_err(|e| map_error(e, HELM_CHART_KIND, &key))?;
        }

        Ok(())
    }
}
