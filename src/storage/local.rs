//! Filesystem-backed artifact storage
//!
//! Files live under a root directory and are served by an HTTP file server
//! reachable at `hostname`. Writes go to a temporary file in the target
//! directory and are renamed into place, so readers never observe a partial
//! artifact.

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use url::Url;

use super::{ArtifactLock, ArtifactSelector, Store, StorageError};
use crate::models::{Artifact, ObjectKey};

const LOCK_SUFFIX: &str = ".lock";

/// [`Store`] writing artifacts to a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    hostname: String,
}

impl LocalStorage {
    /// Open storage at `root`, creating the directory if needed
    pub fn new(
        root: impl Into<PathBuf>,
        hostname: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io("create storage root", &root, e))?;
        Ok(Self {
            root,
            hostname: hostname.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a storage-relative path, refusing to escape the root
    pub fn local_path(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(relative_path))
    }

    fn url_for(&self, relative: &str) -> String {
        format!("http://{}/{}", self.hostname, relative.trim_start_matches('/'))
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Run blocking filesystem work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::io("join storage task", "", io::Error::other(e)))?
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

fn is_lock_file(path: &Path) -> bool {
    path.to_string_lossy().ends_with(LOCK_SUFFIX)
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

/// Copy `source` to `dest` through a temp file, returning the SHA-256 of the bytes
fn copy_atomic(source: &Path, dest: &Path) -> Result<String, StorageError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StorageError::InvalidPath(dest.display().to_string()))?;
    let mut input = File::open(source).map_err(|e| StorageError::io("open", source, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| StorageError::io("create temporary file in", dir, e))?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = input
            .read(&mut buf)
            .map_err(|e| StorageError::io("read", source, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        temp.write_all(&buf[..n])
            .map_err(|e| StorageError::io("write", temp.path(), e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io("sync", temp.path(), e))?;
    temp.persist(dest)
        .map_err(|e| StorageError::io("rename into", dest, e.error))?;

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let staging = link.with_extension("tmplink");
    let _ = fs::remove_file(&staging);
    std::os::unix::fs::symlink(target, &staging)?;
    fs::rename(&staging, link)
}

#[cfg(not(unix))]
fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let source = link.parent().map(|dir| dir.join(target)).unwrap_or_default();
    fs::copy(source, link).map(|_| ())
}

fn remove_paths(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, StorageError> {
    let mut removed = Vec::with_capacity(paths.len());
    for path in paths {
        let result = if path.is_dir() && !is_symlink(&path) {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io("remove", &path, e)),
        }
    }
    Ok(removed)
}

#[async_trait]
impl Store for LocalStorage {
    fn artifact_for(
        &self,
        kind: &str,
        key: &ObjectKey,
        revision: &str,
        file_name: &str,
    ) -> Artifact {
        let dir = ArtifactSelector::for_object(kind, key).dir();
        let path = format!("{}/{}", dir, file_name);
        Artifact {
            url: self.url_for(&path),
            path,
            revision: revision.to_string(),
            ..Default::default()
        }
    }

    async fn exists(&self, artifact: &Artifact) -> bool {
        match self.local_path(&artifact.path) {
            Ok(path) => tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()),
            Err(_) => false,
        }
    }

    fn set_public_url(&self, artifact: &mut Artifact) {
        artifact.url = self.url_for(&artifact.path);
    }

    fn set_hostname(&self, url: &str) -> String {
        if url.is_empty() {
            return String::new();
        }
        let Ok(mut parsed) = Url::parse(url) else {
            return String::new();
        };
        let (host, port) = match self.hostname.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (self.hostname.as_str(), None),
        };
        if parsed.set_host(Some(host)).is_err() || parsed.set_port(port).is_err() {
            return String::new();
        }
        parsed.to_string()
    }

    async fn mkdir_all(&self, artifact: &Artifact) -> Result<(), StorageError> {
        let path = self.local_path(&artifact.path)?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(artifact.path.clone()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io("create directory", &dir, e))
    }

    async fn lock(&self, artifact: &Artifact) -> Result<ArtifactLock, StorageError> {
        let path = lock_path(&self.local_path(&artifact.path)?);
        let display = artifact.path.clone();
        let file = blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| StorageError::io("open lock file", &path, e))?;
            FileExt::lock_exclusive(&file).map_err(|e| StorageError::Lock {
                path: display,
                message: e.to_string(),
            })?;
            Ok(file)
        })
        .await?;

        Ok(ArtifactLock::new(move || {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(error = %e, "Failed to release artifact lock");
            }
        }))
    }

    async fn copy_into(&self, artifact: &mut Artifact, source: &Path) -> Result<(), StorageError> {
        let dest = self.local_path(&artifact.path)?;
        let source = source.to_path_buf();
        let checksum = blocking(move || copy_atomic(&source, &dest)).await?;
        artifact.checksum = checksum;
        artifact.last_update_time = Some(Utc::now());
        Ok(())
    }

    async fn symlink_alias(&self, artifact: &Artifact, name: &str) -> Result<String, StorageError> {
        let path = self.local_path(&artifact.path)?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(artifact.path.clone()))?;
        let link = dir.join(name);
        let target = PathBuf::from(artifact.file_name());
        let link_path = link.clone();
        blocking(move || {
            replace_symlink(&target, &link_path)
                .map_err(|e| StorageError::io("symlink", &link_path, e))
        })
        .await?;
        Ok(self.url_for(&self.relative(&link)))
    }

    async fn remove_all(&self, selector: &ArtifactSelector) -> Result<Vec<String>, StorageError> {
        let dir = self.local_path(&selector.dir())?;
        let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
        let matches: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();

        let removed = blocking(move || {
            let removed = remove_paths(matches)?;
            match fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io("remove directory", &dir, e)),
            }
            Ok(removed)
        })
        .await?;

        Ok(removed
            .iter()
            .filter(|p| !is_lock_file(p))
            .map(|p| self.relative(p))
            .collect())
    }

    async fn remove_all_except_current(
        &self,
        current: &Artifact,
    ) -> Result<Vec<String>, StorageError> {
        let current_path = self.local_path(&current.path)?;
        let Some(dir) = current_path.parent() else {
            return Err(StorageError::InvalidPath(current.path.clone()));
        };
        let current_lock = lock_path(&current_path);
        let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
        let stale: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .filter(|p| *p != current_path && *p != current_lock && !is_symlink(p))
            .collect();

        let removed = blocking(move || remove_paths(stale)).await?;
        Ok(removed
            .iter()
            .filter(|p| !is_lock_file(p))
            .map(|p| self.relative(p))
            .collect())
    }
}
