//! In-memory VFS for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tephra_error::{Result, TephraError};

use crate::traits::{Vfs, VfsFile};

/// Byte storage for one file.
///
/// Multiple [`MemoryFile`] handles can reference the same storage via
/// `Arc<Mutex<..>>`, which mirrors a rotated WAL file being read by replay
/// while a stale handle still exists.
#[derive(Debug, Default)]
struct FileStorage {
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryVfsInner {
    files: HashMap<PathBuf, Arc<Mutex<FileStorage>>>,
    dirs: Vec<PathBuf>,
}

/// An in-memory VFS with no persistence.
///
/// Cloning shares the same file namespace, so a test can hold one handle
/// while the engine under test holds another.
#[derive(Debug, Clone, Default)]
pub struct MemoryVfs {
    inner: Arc<Mutex<MemoryVfsInner>>,
}

fn lock_err() -> TephraError {
    TephraError::internal("MemoryVfs lock poisoned")
}

impl MemoryVfs {
    /// Create a new empty in-memory VFS.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn storage(&self, path: &Path, create: bool, truncate: bool) -> Result<Arc<Mutex<FileStorage>>> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        if let Some(existing) = inner.files.get(path) {
            if truncate {
                existing.lock().map_err(|_| lock_err())?.data.clear();
            }
            return Ok(Arc::clone(existing));
        }
        if !create {
            return Err(TephraError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let storage = Arc::new(Mutex::new(FileStorage::default()));
        inner.files.insert(path.to_path_buf(), Arc::clone(&storage));
        Ok(storage)
    }
}

impl Vfs for MemoryVfs {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_append(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        Ok(Box::new(MemoryFile {
            storage: self.storage(path, true, false)?,
        }))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        Ok(Box::new(MemoryFile {
            storage: self.storage(path, false, false)?,
        }))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        Ok(Box::new(MemoryFile {
            storage: self.storage(path, true, true)?,
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.files.contains_key(path) || inner.dirs.iter().any(|d| d == path))
            .unwrap_or(false)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        let path = path.to_path_buf();
        if !inner.dirs.contains(&path) {
            inner.dirs.push(path);
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        let storage = inner
            .files
            .remove(from)
            .ok_or_else(|| TephraError::FileNotFound {
                path: from.to_path_buf(),
            })?;
        inner.files.insert(to.to_path_buf(), storage);
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        inner
            .files
            .remove(path)
            .ok_or_else(|| TephraError::FileNotFound {
                path: path.to_path_buf(),
            })?;
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let inner = self.inner.lock().map_err(|_| lock_err())?;
        let mut names: Vec<String> = inner
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let storage = self.storage(path, false, false)?;
        let guard = storage.lock().map_err(|_| lock_err())?;
        Ok(guard.data.len() as u64)
    }
}

/// Handle to a file inside a [`MemoryVfs`].
#[derive(Debug)]
pub struct MemoryFile {
    storage: Arc<Mutex<FileStorage>>,
}

impl VfsFile for MemoryFile {
    fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let mut guard = self.storage.lock().map_err(|_| lock_err())?;
        let offset = guard.data.len() as u64;
        guard.data.extend_from_slice(buf);
        Ok(offset)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.storage.lock().map_err(|_| lock_err())?;
        let data = &guard.data;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let mut guard = self.storage.lock().map_err(|_| lock_err())?;
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        guard.data.truncate(size);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let guard = self.storage.lock().map_err(|_| lock_err())?;
        Ok(guard.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let vfs = MemoryVfs::new();
        let path = Path::new("dir/wal.log");
        let mut file = vfs.open_append(path).expect("open");
        file.append(b"hello ").expect("append");
        file.append(b"world").expect("append");

        let mut buf = [0u8; 16];
        let n = file.read_at(&mut buf, 0).expect("read");
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(vfs.file_size(path).expect("size"), 11);
    }

    #[test]
    fn rename_moves_content() {
        let vfs = MemoryVfs::new();
        let from = Path::new("w/wal.log");
        let to = Path::new("w/wal.log.42");
        vfs.write_all(from, b"abc").expect("write");
        vfs.rename(from, to).expect("rename");
        assert!(!vfs.exists(from));
        assert_eq!(vfs.read_all(to).expect("read"), b"abc");
    }

    #[test]
    fn list_dir_only_direct_children() {
        let vfs = MemoryVfs::new();
        vfs.write_all(Path::new("w/wal.log"), b"x").expect("write");
        vfs.write_all(Path::new("w/wal.log.7"), b"x").expect("write");
        vfs.write_all(Path::new("w/sub/other"), b"x").expect("write");
        let names = vfs.list_dir(Path::new("w")).expect("list");
        assert_eq!(names, vec!["wal.log", "wal.log.7"]);
    }

    #[test]
    fn delete_missing_is_an_error() {
        let vfs = MemoryVfs::new();
        let err = vfs.delete(Path::new("nope")).expect_err("missing");
        assert!(matches!(err, TephraError::FileNotFound { .. }));
    }

    #[test]
    fn clones_share_namespace() {
        let vfs = MemoryVfs::new();
        let vfs2 = vfs.clone();
        vfs.write_all(Path::new("shared"), b"data").expect("write");
        assert_eq!(vfs2.read_all(Path::new("shared")).expect("read"), b"data");
    }

    #[test]
    fn read_past_end_is_short() {
        let vfs = MemoryVfs::new();
        vfs.write_all(Path::new("f"), b"1234").expect("write");
        let file = vfs.open_read(Path::new("f")).expect("open");
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 2).expect("read"), 2);
        assert_eq!(file.read_at(&mut buf, 100).expect("read"), 0);
    }
}
