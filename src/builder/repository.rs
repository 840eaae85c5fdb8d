//! Helm repository index
//!
//! Only exact versions and `*` (latest stable) are supported as version
//! constraints.

use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use url::Url;

use super::BuildError;

/// Parsed `index.yaml` of a Helm repository
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

/// One chart version listed in a repository index
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChartVersion {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub digest: String,
}

impl RepositoryIndex {
    pub fn from_yaml(contents: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(contents)
            .map_err(|e| BuildError::Pull(format!("failed to parse repository index: {}", e)))
    }

    /// Select the version of `chart` satisfying `constraint`
    pub fn get(&self, chart: &str, constraint: &str) -> Result<&ChartVersion, BuildError> {
        let versions = self
            .entries
            .get(chart)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BuildError::Pull(format!("no chart name '{}' found in index", chart)))?;

        let constraint = constraint.trim();
        let selected = if constraint.is_empty() || constraint == "*" {
            versions
                .iter()
                .filter(|v| !v.version.contains('-'))
                .max_by(|a, b| compare_versions(&a.version, &b.version))
        } else {
            let wanted = constraint.trim_start_matches('v');
            versions
                .iter()
                .find(|v| v.version.trim_start_matches('v') == wanted)
        };

        selected.ok_or_else(|| {
            BuildError::Pull(format!(
                "no '{}' chart with version matching '{}' found",
                chart, constraint
            ))
        })
    }
}

impl ChartVersion {
    /// Download URL, resolved against the repository URL when relative
    pub fn download_url(&self, repository_url: &str) -> Result<String, BuildError> {
        let first = self.urls.first().ok_or_else(|| {
            BuildError::Pull(format!(
                "chart '{}' version '{}' has no downloadable URLs",
                self.name, self.version
            ))
        })?;
        if let Ok(absolute) = Url::parse(first) {
            return Ok(absolute.to_string());
        }
        let mut base = Url::parse(repository_url).map_err(|e| {
            BuildError::Pull(format!("invalid repository URL '{}': {}", repository_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(first)
            .map(|u| u.to_string())
            .map_err(|e| BuildError::Pull(format!("invalid chart URL '{}': {}", first, e)))
    }
}

fn split_version(version: &str) -> (Vec<u64>, Option<&str>) {
    let version = version.trim().trim_start_matches('v');
    let version = version.split('+').next().unwrap_or(version);
    let (core, pre) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    };
    let numbers = core
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect();
    (numbers, pre)
}

/// Order two semantic versions; a pre-release sorts before its release
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_core, a_pre) = split_version(a);
    let (b_core, b_pre) = split_version(b);
    let len = a_core.len().max(b_core.len());
    for i in 0..len {
        let x = a_core.get(i).copied().unwrap_or(0);
        let y = b_core.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}
