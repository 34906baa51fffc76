//! Disk primitives behind [`FsArtifactStore`](crate::store::FsArtifactStore).
//!
//! Writes go to a `.tmp` sibling and are renamed over the target, so a
//! results file is either absent, the old content, or the new content.

use std::io;
use std::path::{Path, PathBuf};

/// Atomically write `data` to `path`, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Read `path` if it is a regular file.
pub fn read_if_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(_) if path.is_dir() => Ok(None),
        Err(e) => Err(e),
    }
}

// `model.tar.gz` must not collide with `model.tar.tmp`.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_1").join("cfg").join("model.tar.gz");

        atomic_write(&path, b"model").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"model");
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");

        atomic_write(&path, b"{}").unwrap();
        atomic_write(&path, b"{\"runs\": 2}").unwrap();

        assert!(!dir.path().join("results.json.tmp").exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"runs\": 2}");
    }

    #[test]
    fn test_read_if_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_if_file(&dir.path().join("missing.json")).unwrap(), None);
        assert_eq!(read_if_file(dir.path()).unwrap(), None);

        let path = dir.path().join("report.json");
        std::fs::write(&path, b"[]").unwrap();
        assert_eq!(read_if_file(&path).unwrap(), Some(b"[]".to_vec()));
    }
}
