//! Storage backends for the journal.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte store backing one journal.
///
/// Backends are opaque append-oriented byte stores; the journal owns all
/// frame interpretation. Implementations must guarantee:
///
/// - `append` adds bytes at the end, in order
/// - `read_all` returns exactly the bytes previously appended
/// - after `sync` returns, appended bytes survive process termination
/// - `replace_all` swaps the entire contents in one atomic step
pub trait StorageBackend: Send {
    /// Returns the full contents.
    fn read_all(&mut self) -> StoreResult<Vec<u8>>;

    /// Appends bytes at the end.
    fn append(&mut self, data: &[u8]) -> StoreResult<()>;

    /// Makes all appended bytes durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Discards all bytes past `new_len`. Used to drop a torn tail
    /// frame during recovery.
    fn truncate(&mut self, new_len: u64) -> StoreResult<()>;

    /// Returns the current size in bytes.
    fn len(&self) -> StoreResult<u64>;

    /// Atomically replaces the entire contents. Used by compaction.
    fn replace_all(&mut self, data: &[u8]) -> StoreResult<()>;
}

/// An in-memory backend for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StoreResult<()> {
        self.data.truncate(new_len as usize);
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn replace_all(&mut self, data: &[u8]) -> StoreResult<()> {
        self.data = data.to_vec();
        Ok(())
    }
}

/// A file-backed backend with an exclusive advisory lock.
///
/// The lock prevents two processes from appending to the same journal;
/// a second open fails with [`StoreError::StoreLocked`] instead of
/// silently interleaving frames. Compaction replaces the file through a
/// temp-file-and-rename so a crash mid-compaction leaves either the old
/// or the new journal intact, never a mix.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
}

impl FileBackend {
    /// Opens or creates a journal file, taking the exclusive lock.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| StoreError::StoreLocked)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Returns the path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StoreResult<()> {
        self.file.set_len(new_len)?;
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn replace_all(&mut self, data: &[u8]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("compact.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }

        // Swap under the same path, then reopen and relock the handle.
        FileExt::unlock(&self.file)?;
        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::StoreLocked)?;
        self.file = file;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_append_and_read() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello ").unwrap();
        backend.append(b"world").unwrap();

        assert_eq!(backend.read_all().unwrap(), b"hello world");
        assert_eq!(backend.len().unwrap(), 11);
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.read_all().unwrap(), b"hello");
    }

    #[test]
    fn memory_replace_all() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"old contents").unwrap();
        backend.replace_all(b"new").unwrap();

        assert_eq!(backend.read_all().unwrap(), b"new");
    }

    #[test]
    fn file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.tm");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable bytes").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"durable bytes");
    }

    #[test]
    fn file_lock_excludes_second_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.tm");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StoreError::StoreLocked)));
    }

    #[test]
    fn file_replace_all_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.tm");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"before compaction").unwrap();
        backend.replace_all(b"after").unwrap();

        assert_eq!(backend.read_all().unwrap(), b"after");
        // The handle still works for appends after the swap.
        backend.append(b" more").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"after more");
    }
}
