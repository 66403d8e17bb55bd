use std::path::{Path, PathBuf};

use tephra_error::Result;

/// A virtual filesystem implementation.
///
/// This trait abstracts the file system operations the engine needs:
/// opening and appending to the current WAL file, renaming it on rotation,
/// enumerating and deleting rotated files, and reading immutable segment
/// and snapshot files. Backends: real files ([`crate::UnixVfs`]) or
/// in-memory ([`crate::MemoryVfs`]) for tests.
///
/// The trait is object-safe: the engine threads a single `Arc<dyn Vfs>`
/// through the WAL, catalog, and index readers.
pub trait Vfs: Send + Sync {
    /// The name of this VFS (e.g. "unix", "memory").
    fn name(&self) -> &'static str;

    /// Open `path` for reading and appending, creating it if absent.
    fn open_append(&self, path: &Path) -> Result<Box<dyn VfsFile>>;

    /// Open an existing `path` read-only.
    fn open_read(&self, path: &Path) -> Result<Box<dyn VfsFile>>;

    /// Create `path`, truncating any existing content.
    fn create(&self, path: &Path) -> Result<Box<dyn VfsFile>>;

    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Atomically rename `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file.
    fn delete(&self, path: &Path) -> Result<()>;

    /// File names (not paths) of the direct children of `dir`.
    ///
    /// Returns an empty list if `dir` does not exist.
    fn list_dir(&self, dir: &Path) -> Result<Vec<String>>;

    /// Size of the file at `path` in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Read the entire file at `path`.
    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        let file = self.open_read(path)?;
        let size = file.size()? as usize;
        let mut buf = vec![0u8; size];
        let read = file.read_at(&mut buf, 0)?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Write `data` as the complete content of `path`.
    fn write_all(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let mut file = self.create(path)?;
        file.append(data)?;
        file.sync()?;
        Ok(())
    }

    /// Join helper so callers can stay path-agnostic.
    fn join(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(name)
    }
}

/// A file handle opened by a VFS.
pub trait VfsFile: Send + Sync + std::fmt::Debug {
    /// Append `buf` at the end of the file. Returns the offset the write
    /// started at.
    fn append(&mut self, buf: &[u8]) -> Result<u64>;

    /// Read up to `buf.len()` bytes starting at `offset`; returns the byte
    /// count actually read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Force buffered writes to stable storage.
    fn sync(&mut self) -> Result<()>;

    /// Truncate the file to `size` bytes.
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Current file size in bytes.
    fn size(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_traits_are_object_safe() {
        fn _accepts_dyn_vfs(_v: &dyn Vfs) {}
        fn _accepts_dyn_file(_f: &dyn VfsFile) {}
    }
}
