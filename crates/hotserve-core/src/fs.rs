//! Output filesystem abstraction.
//!
//! The build tool may write bundles to disk or keep them in memory; the bridge
//! only ever needs to read whole files back by path.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Read access to the files a build emitted.
pub trait OutputFileSystem: Send + Sync {
    /// Read the full contents of `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read `path` as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFileSystem;

impl OutputFileSystem for DiskFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// A thread-safe in-memory filesystem.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a file.
    pub fn write(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), contents.into());
    }

    /// Remove a file, returning whether it existed.
    pub fn remove(&self, path: &Path) -> bool {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }
}

impl OutputFileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_read_write_remove() {
        let fs = MemoryFileSystem::new();
        fs.write("/out/main.js", "module.exports = 1;");
        assert_eq!(
            fs.read_to_string(Path::new("/out/main.js")).unwrap(),
            "module.exports = 1;"
        );

        assert!(fs.remove(Path::new("/out/main.js")));
        assert!(!fs.remove(Path::new("/out/main.js")));
        let err = fs.read(Path::new("/out/main.js")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memory_fs_rejects_invalid_utf8() {
        let fs = MemoryFileSystem::new();
        fs.write("/out/bin", vec![0xff, 0xfe]);
        let err = fs.read_to_string(Path::new("/out/bin")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_disk_fs_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.js");
        std::fs::write(&path, "x").unwrap();
        assert_eq!(DiskFileSystem.read(&path).unwrap(), b"x");
        assert!(DiskFileSystem.read(&dir.path().join("missing.js")).is_err());
    }
}
