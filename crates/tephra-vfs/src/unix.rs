//! Unix VFS over `std::fs`.
//!
//! The engine's locking needs are structural rather than advisory: the
//! current WAL file is owned exclusively by the writer thread and rotated
//! files are immutable, so no fcntl range locking is carried here.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tephra_error::{Result, TephraError};
use tracing::debug;

use crate::traits::{Vfs, VfsFile};

/// VFS backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixVfs;

impl UnixVfs {
    /// Create the unix VFS.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn map_not_found(err: std::io::Error, path: &Path) -> TephraError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TephraError::FileNotFound {
            path: path.to_path_buf(),
        }
    } else {
        TephraError::Io(err)
    }
}

impl Vfs for UnixVfs {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn open_append(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| map_not_found(e, path))?;
        debug!(path = %path.display(), "opened file for append");
        Ok(Box::new(UnixFile { file }))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        let file = File::open(path).map_err(|e| map_not_found(e, path))?;
        Ok(Box::new(UnixFile { file }))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn VfsFile>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| map_not_found(e, path))?;
        Ok(Box::new(UnixFile { file }))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| map_not_found(e, from))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| map_not_found(e, path))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(TephraError::Io(err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path).map_err(|e| map_not_found(e, path))?;
        Ok(meta.len())
    }
}

/// Handle to a file opened by [`UnixVfs`].
#[derive(Debug)]
pub struct UnixFile {
    file: File,
}

impl VfsFile for UnixFile {
    fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let offset = self.file.metadata()?.len();
        self.file.write_all(buf)?;
        Ok(offset)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut total = 0usize;
        while total < buf.len() {
            let n = self.file.read_at(&mut buf[total..], offset + total as u64)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_read_sync_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vfs = UnixVfs::new();
        let path = dir.path().join("wal.log");

        let mut file = vfs.open_append(&path).expect("open");
        assert_eq!(file.append(b"abc").expect("append"), 0);
        assert_eq!(file.append(b"def").expect("append"), 3);
        file.sync().expect("sync");

        let mut buf = [0u8; 6];
        let n = file.read_at(&mut buf, 0).expect("read");
        assert_eq!(&buf[..n], b"abcdef");
    }

    #[test]
    fn rename_and_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vfs = UnixVfs::new();
        let current = dir.path().join("wal.log");
        vfs.write_all(&current, b"frames").expect("write");
        vfs.rename(&current, &dir.path().join("wal.log.99"))
            .expect("rename");
        vfs.write_all(&current, b"").expect("recreate");

        let names = vfs.list_dir(dir.path()).expect("list");
        assert_eq!(names, vec!["wal.log", "wal.log.99"]);
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vfs = UnixVfs::new();
        let err = vfs
            .open_read(&dir.path().join("absent"))
            .expect_err("missing");
        assert!(matches!(err, TephraError::FileNotFound { .. }));
    }

    #[test]
    fn list_dir_missing_is_empty() {
        let vfs = UnixVfs::new();
        let names = vfs
            .list_dir(Path::new("/nonexistent/tephra/dir"))
            .expect("list");
        assert!(names.is_empty());
    }
}
