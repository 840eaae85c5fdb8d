//! Dependency index
//!
//! Maps each source (`Kind/name` within a namespace) to the HelmCharts that
//! reference it, and each normalized Helm repository URL to the
//! HelmRepository serving it. Written by the watch layer, read by
//! propagation and the chart builder. Readers get whatever the last
//! processed watch event left behind.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

use crate::models::{HelmChart, ObjectKey};

/// Canonical form of a Helm repository URL
///
/// Scheme and host are lower-cased, default ports dropped and the path
/// always ends in exactly one `/`. Returns `None` for empty or unparsable
/// URLs.
pub fn normalize_repository_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = Url::parse(raw).ok()?;
    url.host_str()?;
    let path = format!("{}/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    Some(url.to_string())
}

#[derive(Debug, Default)]
struct IndexState {
    /// (namespace, `Kind/name`) -> charts referencing that source
    by_source: HashMap<(String, String), BTreeSet<ObjectKey>>,
    /// chart -> the source index key it is filed under
    chart_sources: HashMap<ObjectKey, String>,
    /// (namespace, normalized URL) -> repositories serving it
    by_url: HashMap<(String, String), BTreeSet<ObjectKey>>,
    /// repository -> its normalized URL
    repository_urls: HashMap<ObjectKey, String>,
}

impl IndexState {
    fn unlink_chart(&mut self, key: &ObjectKey) {
        if let Some(index_key) = self.chart_sources.remove(key) {
            let slot = (key.namespace.clone(), index_key);
            if let Some(charts) = self.by_source.get_mut(&slot) {
                charts.remove(key);
                if charts.is_empty() {
                    self.by_source.remove(&slot);
                }
            }
        }
    }

    fn unlink_repository(&mut self, key: &ObjectKey) {
        if let Some(url) = self.repository_urls.remove(key) {
            let slot = (key.namespace.clone(), url);
            if let Some(repos) = self.by_url.get_mut(&slot) {
                repos.remove(key);
                if repos.is_empty() {
                    self.by_url.remove(&slot);
                }
            }
        }
    }
}

/// Shared, lock-protected dependency index
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    state: Arc<RwLock<IndexState>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&IndexState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut IndexState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// File a chart under the source it currently references
    pub fn upsert_chart(&self, chart: &HelmChart) {
        let key = chart.key();
        let index_key = chart.spec.source_ref.index_key();
        self.write(|s| {
            s.unlink_chart(&key);
            s.by_source
                .entry((key.namespace.clone(), index_key.clone()))
                .or_default()
                .insert(key.clone());
            s.chart_sources.insert(key, index_key);
        });
    }

    pub fn remove_chart(&self, key: &ObjectKey) {
        self.write(|s| s.unlink_chart(key));
    }

    /// Charts in `namespace` referencing the source with index key `Kind/name`
    pub fn charts_for_source(&self, namespace: &str, index_key: &str) -> Vec<ObjectKey> {
        self.read(|s| {
            s.by_source
                .get(&(namespace.to_string(), index_key.to_string()))
                .map(|charts| charts.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// File a HelmRepository under its normalized URL.
    ///
    /// A URL that cannot be normalized leaves the repository unindexed.
    pub fn upsert_repository(&self, key: &ObjectKey, url: &str) {
        let normalized = normalize_repository_url(url);
        if normalized.is_none() {
            tracing::debug!(repository = %key, url, "Repository URL not indexable");
        }
        self.write(|s| {
            s.unlink_repository(key);
            if let Some(normalized) = normalized {
                s.by_url
                    .entry((key.namespace.clone(), normalized.clone()))
                    .or_default()
                    .insert(key.clone());
                s.repository_urls.insert(key.clone(), normalized);
            }
        });
    }

    pub fn remove_repository(&self, key: &ObjectKey) {
        self.write(|s| s.unlink_repository(key));
    }

    /// HelmRepository in `namespace` serving `url`, by normalized URL
    pub fn repository_for_url(&self, namespace: &str, url: &str) -> Option<ObjectKey> {
        let normalized = normalize_repository_url(url)?;
        self.read(|s| {
            s.by_url
                .get(&(namespace.to_string(), normalized))
                .and_then(|repos| repos.iter().next().cloned())
        })
    }

    /// Number of charts currently indexed
    pub fn chart_count(&self) -> usize {
        self.read(|s| s.chart_sources.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelmChartSpec, ObjectMeta, SourceKind, SourceReference};

    fn chart(namespace: &str, name: &str, kind: SourceKind, source: &str) -> HelmChart {
        HelmChart::new(
            ObjectMeta::new(namespace, name),
            HelmChartSpec::new(
                name,
                SourceReference {
                    kind,
                    name: source.to_string(),
                    api_version: None,
                },
            ),
        )
    }

    #[test]
    fn test_normalize_repository_url() {
        assert_eq!(
            normalize_repository_url("https://Charts.Example.com:443/stable").as_deref(),
            Some("https://charts.example.com/stable/")
        );
        assert_eq!(
            normalize_repository_url("https://charts.example.com/stable//").as_deref(),
            Some("https://charts.example.com/stable/")
        );
        assert_eq!(
            normalize_repository_url("http://charts.example.com").as_deref(),
            Some("http://charts.example.com/")
        );
        assert_eq!(normalize_repository_url(""), None);
        assert_eq!(normalize_repository_url("not a url"), None);
    }

    #[test]
    fn test_chart_moves_between_sources() {
        let index = DependencyIndex::new();
        let mut podinfo = chart("default", "podinfo", SourceKind::GitRepository, "repo-a");
        index.upsert_chart(&podinfo);
        assert_eq!(
            index.charts_for_source("default", "GitRepository/repo-a"),
            vec![podinfo.key()]
        );

        podinfo.spec.source_ref.name = "repo-b".to_string();
        index.upsert_chart(&podinfo);
        assert!(index.charts_for_source("default", "GitRepository/repo-a").is_empty());
        assert_eq!(
            index.charts_for_source("default", "GitRepository/repo-b"),
            vec![podinfo.key()]
        );

        index.remove_chart(&podinfo.key());
        assert!(index.charts_for_source("default", "GitRepository/repo-b").is_empty());
        assert_eq!(index.chart_count(), 0);
    }

    #[test]
    fn test_index_is_namespace_scoped() {
        let index = DependencyIndex::new();
        index.upsert_chart(&chart("team-a", "app", SourceKind::HelmRepository, "stable"));
        index.upsert_chart(&chart("team-b", "app", SourceKind::HelmRepository, "stable"));
        assert_eq!(
            index.charts_for_source("team-a", "HelmRepository/stable"),
            vec![ObjectKey::new("team-a", "app")]
        );
    }

    #[test]
    fn test_repository_url_lookup() {
        let index = DependencyIndex::new();
        let repo = ObjectKey::new("default", "bitnami");
        index.upsert_repository(&repo, "https://charts.bitnami.com/bitnami");

        assert_eq!(
            index.repository_for_url("default", "https://CHARTS.bitnami.com:443/bitnami/"),
            Some(repo.clone())
        );
        assert_eq!(index.repository_for_url("other", "https://charts.bitnami.com/bitnami"), None);

        index.upsert_repository(&repo, "::invalid::");
        assert_eq!(
            index.repository_for_url("default", "https://charts.bitnami.com/bitnami"),
            None
        );
    }
}
