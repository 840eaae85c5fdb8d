//! Watcher module
//!
//! Watches HelmCharts and the sources they reference, keeps the dependency
//! index current and turns events into reconcile requests.

pub mod index;
pub mod propagation;

pub use index::{DependencyIndex, normalize_repository_url};
pub use propagation::{
    IndexedRepositories, Propagator, requests_for_source_change, source_revision_changed,
};

use anyhow::Result;
use futures::StreamExt;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::kube::{decode_object, helm_chart_resource, source_resource};
use crate::models::{HELM_CHART_KIND, HelmChart, ObjectKey, Source, SourceKind};

/// Event emitted by resource watchers
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// HelmChart was added or updated
    ChartApplied(Box<HelmChart>),
    /// HelmChart was deleted
    ChartDeleted(ObjectKey),
    /// Source was added or updated
    SourceApplied(Box<Source>),
    /// Source was deleted
    SourceDeleted(SourceKind, ObjectKey),
    /// Watch error occurred
    Error(String),
}

/// What a watch task is watching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watched {
    Chart,
    Source(SourceKind),
}

impl Watched {
    fn resource(&self) -> ApiResource {
        match self {
            Watched::Chart => helm_chart_resource(),
            Watched::Source(kind) => source_resource(*kind),
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Watched::Chart => HELM_CHART_KIND,
            Watched::Source(kind) => kind.as_str(),
        }
    }

    fn applied(&self, obj: &DynamicObject) -> Result<WatchEvent, serde_json::Error> {
        Ok(match self {
            Watched::Chart => WatchEvent::ChartApplied(Box::new(decode_object(obj)?)),
            Watched::Source(kind) => {
                let value = serde_json::to_value(obj)?;
                WatchEvent::SourceApplied(Box::new(Source::from_value(*kind, value)?))
            }
        })
    }

    fn deleted(&self, key: ObjectKey) -> WatchEvent {
        match self {
            Watched::Chart => WatchEvent::ChartDeleted(key),
            Watched::Source(kind) => WatchEvent::SourceDeleted(*kind, key),
        }
    }
}

/// Manages the HelmChart and source watchers
///
/// Uses `Api::namespaced_with` when a namespace is set and `Api::all_with`
/// otherwise.
pub struct ResourceWatcher {
    client: Client,
    namespace: Option<String>,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    handles: Vec<JoinHandle<()>>,
}

impl ResourceWatcher {
    pub fn new(
        client: Client,
        namespace: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                namespace,
                event_tx: tx,
                handles: Vec::new(),
            },
            rx,
        )
    }

    fn watch(&mut self, watched: Watched) {
        let client = self.client.clone();
        let namespace = self.namespace.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let resource = watched.resource();
            let api: Api<DynamicObject> = match namespace {
                Some(ns) => Api::namespaced_with(client, &ns, &resource),
                None => Api::all_with(client, &resource),
            };

            // The watcher lists existing objects itself and replays them as InitApply
            let mut w = Box::pin(watcher(api, watcher::Config::default()));
            let mut error_count = 0u32;

            while let Some(event) = w.next().await {
                match event {
                    Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                        error_count = 0;
                        let event = watched.applied(&obj).unwrap_or_else(|e| {
                            WatchEvent::Error(format!(
                                "failed to decode {} {}/{}: {}",
                                watched.display_name(),
                                obj.namespace().unwrap_or_default(),
                                obj.name_any(),
                                e
                            ))
                        });
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        error_count = 0;
                        let key =
                            ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
                        if event_tx.send(watched.deleted(key)).is_err() {
                            break;
                        }
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {
                        error_count = 0;
                    }
                    Err(e) => {
                        error_count += 1;
                        // Only report occasionally to avoid spam; the watcher backs off and retries
                        if error_count == 1 || error_count.is_multiple_of(10) {
                            let _ = event_tx.send(WatchEvent::Error(format!(
                                "{} watcher error ({}): {}",
                                watched.display_name(),
                                error_count,
                                e
                            )));
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        self.handles.push(handle);
    }

    /// Start watching HelmCharts and every source kind
    pub fn watch_all(&mut self) -> Result<()> {
        self.watch(Watched::Chart);
        for kind in SourceKind::all() {
            self.watch(Watched::Source(*kind));
        }
        tracing::debug!(
            namespace = self.namespace.as_deref().unwrap_or("*"),
            watchers = self.handles.len(),
            "Started watchers"
        );
        Ok(())
    }

    /// Abort all watcher tasks
    pub fn stop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        self.handles.clear();
    }
}

impl Drop for ResourceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Apply a watch event to the index and return the charts to reconcile
pub fn route(propagator: &Propagator, event: WatchEvent) -> Vec<ObjectKey> {
    match event {
        WatchEvent::ChartApplied(chart) => propagator.chart_applied(&chart).into_iter().collect(),
        WatchEvent::ChartDeleted(key) => {
            propagator.chart_deleted(&key);
            Vec::new()
        }
        WatchEvent::SourceApplied(source) => propagator.source_applied(&source),
        WatchEvent::SourceDeleted(kind, key) => {
            propagator.source_deleted(kind, &key);
            Vec::new()
        }
        WatchEvent::Error(message) => {
            tracing::error!("{}", message);
            Vec::new()
        }
    }
}
