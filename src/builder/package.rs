//! Chart archives
//!
//! Charts are gzipped tarballs with every file under a top-level directory
//! named after the chart.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{BuildError, ChartMetadata};

const CHART_FILE: &str = "Chart.yaml";

/// Unpack a `.tar.gz` archive into `dest`
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), BuildError> {
    let file = File::open(archive)
        .map_err(|e| BuildError::io(format!("open archive '{}'", archive.display()), e))?;
    fs::create_dir_all(dest)
        .map_err(|e| BuildError::io(format!("create directory '{}'", dest.display()), e))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(dest)
        .map_err(|e| BuildError::Pull(format!("failed to unpack '{}': {}", archive.display(), e)))
}

fn parse_metadata(contents: &str, origin: &Path) -> Result<ChartMetadata, BuildError> {
    let meta: ChartMetadata = serde_yaml::from_str(contents)
        .map_err(|e| BuildError::Metadata(format!("'{}': {}", origin.display(), e)))?;
    if meta.name.is_empty() || meta.version.is_empty() {
        return Err(BuildError::Metadata(format!(
            "'{}' must set both name and version",
            origin.display()
        )));
    }
    Ok(meta)
}

/// Read `Chart.yaml` from a chart directory or a packaged chart
pub fn read_chart_metadata(chart: &Path) -> Result<ChartMetadata, BuildError> {
    if chart.is_dir() {
        let path = chart.join(CHART_FILE);
        let contents = fs::read_to_string(&path)
            .map_err(|e| BuildError::Metadata(format!("'{}': {}", path.display(), e)))?;
        return parse_metadata(&contents, &path);
    }

    let file = File::open(chart)
        .map_err(|e| BuildError::Metadata(format!("'{}': {}", chart.display(), e)))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| BuildError::Metadata(format!("'{}': {}", chart.display(), e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| BuildError::Metadata(format!("'{}': {}", chart.display(), e)))?;
        let is_chart_file = entry.path().is_ok_and(|p| {
            p.components().count() == 2 && p.file_name().is_some_and(|n| n == CHART_FILE)
        });
        if is_chart_file {
            let mut contents = String::new();
            entry
                .read_to_string(&mut contents)
                .map_err(|e| BuildError::Metadata(format!("'{}': {}", chart.display(), e)))?;
            return parse_metadata(&contents, chart);
        }
    }
    Err(BuildError::Metadata(format!(
        "no {} found in '{}'",
        CHART_FILE,
        chart.display()
    )))
}

/// Package a chart directory as `<dest_dir>/<name>-<version>.tgz`
pub fn pack_chart_dir(chart_dir: &Path, dest_dir: &Path) -> Result<PathBuf, BuildError> {
    let meta = read_chart_metadata(chart_dir)?;
    let dest = dest_dir.join(format!("{}-{}.tgz", meta.name, meta.version));
    let file = File::create(&dest)
        .map_err(|e| BuildError::io(format!("create '{}'", dest.display()), e))?;

    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    tar.follow_symlinks(false);
    for entry in WalkDir::new(chart_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| BuildError::Package(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(chart_dir)
            .map_err(|e| BuildError::Package(e.to_string()))?;
        let name = Path::new(&meta.name).join(relative);
        tar.append_path_with_name(entry.path(), &name)
            .map_err(|e| BuildError::Package(format!("'{}': {}", name.display(), e)))?;
    }
    tar.into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| BuildError::Package(e.to_string()))?;

    Ok(dest)
}
