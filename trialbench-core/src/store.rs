//! Artifact storage port and adapters.
//!
//! Every file the orchestrator produces (model bytes, manifests, reports,
//! plots) is addressed by an [`ArtifactKey`] relative to the store root and
//! written through an [`ArtifactStore`]. The filesystem adapter backs the CLI;
//! the in-memory adapter lets the orchestration core be exercised without
//! touching disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::persistence;

/// A `/`-separated path relative to a store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    /// Build a key from a relative filesystem path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{}", self.0, segment.as_ref()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The last path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<ArtifactKey> {
        self.0.rsplit_once('/').map(|(parent, _)| Self(parent.to_string()))
    }

    /// Segments of this key below `prefix`, or `None` if `prefix` is not an ancestor.
    pub fn strip_prefix(&self, prefix: &ArtifactKey) -> Option<Vec<&str>> {
        if prefix.is_root() {
            return Some(self.segments().collect());
        }
        let rest = self.0.strip_prefix(prefix.as_str())?;
        if rest.is_empty() {
            return Some(Vec::new());
        }
        let rest = rest.strip_prefix('/')?;
        Some(rest.split('/').collect())
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |p, s| p.join(s))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Port for persisting orchestration artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Write `data` under `key`, replacing any previous content.
    fn put(&self, key: &ArtifactKey, data: &[u8]) -> io::Result<()>;

    /// Read the content under `key`, or `None` if it does not exist.
    fn get(&self, key: &ArtifactKey) -> io::Result<Option<Vec<u8>>>;

    /// Whether `key` names an existing file or directory.
    fn exists(&self, key: &ArtifactKey) -> bool;

    /// Create the directory `key` (and its parents).
    fn create_dir(&self, key: &ArtifactKey) -> io::Result<()>;

    /// All file keys below `prefix`, sorted.
    fn list(&self, prefix: &ArtifactKey) -> io::Result<Vec<ArtifactKey>>;

    /// A local filesystem path for `key`, when the store is disk-backed.
    fn local_path(&self, _key: &ArtifactKey) -> Option<PathBuf> {
        None
    }
}

/// Serialize `value` as pretty JSON and store it under `key`.
pub fn put_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    value: &T,
) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    store.put(key, &json)
}

/// Load and deserialize JSON stored under `key`.
pub fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
) -> io::Result<Option<T>> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        None => Ok(None),
    }
}

/// Filesystem-backed store rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &ArtifactKey, data: &[u8]) -> io::Result<()> {
        persistence::atomic_write(&key.to_path(&self.root), data)
    }

    fn get(&self, key: &ArtifactKey) -> io::Result<Option<Vec<u8>>> {
        persistence::read_if_file(&key.to_path(&self.root))
    }

    fn exists(&self, key: &ArtifactKey) -> bool {
        key.to_path(&self.root).exists()
    }

    fn create_dir(&self, key: &ArtifactKey) -> io::Result<()> {
        std::fs::create_dir_all(key.to_path(&self.root))
    }

    fn list(&self, prefix: &ArtifactKey) -> io::Result<Vec<ArtifactKey>> {
        let base = prefix.to_path(&self.root);
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                keys.push(ArtifactKey::from_path(relative));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn local_path(&self, key: &ArtifactKey) -> Option<PathBuf> {
        Some(key.to_path(&self.root))
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    files: RwLock<BTreeMap<ArtifactKey, Vec<u8>>>,
    dirs: RwLock<BTreeSet<ArtifactKey>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, key: &ArtifactKey, data: &[u8]) -> io::Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| io::Error::other("artifact store lock poisoned"))?;
        files.insert(key.clone(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &ArtifactKey) -> io::Result<Option<Vec<u8>>> {
        let files = self
            .files
            .read()
            .map_err(|_| io::Error::other("artifact store lock poisoned"))?;
        Ok(files.get(key).cloned())
    }

    fn exists(&self, key: &ArtifactKey) -> bool {
        let in_files = self.files.read().is_ok_and(|files| {
            files
                .keys()
                .any(|k| k == key || k.strip_prefix(key).is_some_and(|rest| !rest.is_empty()))
        });
        in_files
            || self.dirs.read().is_ok_and(|dirs| {
                dirs.iter()
                    .any(|d| d == key || d.strip_prefix(key).is_some())
            })
    }

    fn create_dir(&self, key: &ArtifactKey) -> io::Result<()> {
        let mut dirs = self
            .dirs
            .write()
            .map_err(|_| io::Error::other("artifact store lock poisoned"))?;
        dirs.insert(key.clone());
        Ok(())
    }

    fn list(&self, prefix: &ArtifactKey) -> io::Result<Vec<ArtifactKey>> {
        let files = self
            .files
            .read()
            .map_err(|_| io::Error::other("artifact store lock poisoned"))?;
        Ok(files
            .keys()
            .filter(|k| k.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()))
            .cloned()
            .collect())
    }
}
