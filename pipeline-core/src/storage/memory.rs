// pipeline-core/src/storage/memory.rs

//! In-memory storage backend.
//!
//! Holds a path → bytes table. Useful for tests and for pipelines whose
//! inputs are generated in-process.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use super::traits::{ObjectMeta, StorageBackend, StorageReader};
use crate::error::{PipelineError, Result};

/// In-memory storage backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: Arc<RwLock<BTreeMap<PathBuf, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a file.
    pub fn add_file(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), data.into());
        }
    }

    /// Removes a file, returning whether it existed.
    pub fn remove_file(&self, path: &Path) -> bool {
        self.files
            .write()
            .map(|mut files| files.remove(path).is_some())
            .unwrap_or(false)
    }

    fn get(&self, path: &Path) -> Result<Bytes> {
        let files = self
            .files
            .read()
            .map_err(|_| PipelineError::storage(path, "storage lock poisoned"))?;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::storage(path, "not found"))
    }
}

impl StorageBackend for MemoryStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        let files = self
            .files
            .read()
            .map_err(|_| PipelineError::storage(path, "storage lock poisoned"))?;
        Ok(files.contains_key(path))
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let data = self.get(path)?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            modified: None,
            is_dir: false,
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let data = self.get(path)?;
        Ok(Box::new(MemoryReader {
            size: data.len() as u64,
            data: Cursor::new(data),
        }))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let trimmed = pattern.trim_end_matches('/');
        let pattern_str = if trimmed.is_empty() { pattern } else { trimmed };
        let matcher = glob::Pattern::new(pattern_str).map_err(|e| {
            PipelineError::config_with_source(format!("invalid file pattern '{pattern}'"), e)
        })?;
        let files = self
            .files
            .read()
            .map_err(|_| PipelineError::storage(pattern, "storage lock poisoned"))?;

        // BTreeMap keys are already in lexicographic order. A pattern naming a
        // directory matches the files directly inside it.
        Ok(files
            .keys()
            .filter(|path| {
                matcher.matches_path(path)
                    || path
                        .parent()
                        .is_some_and(|dir| !dir.as_os_str().is_empty() && matcher.matches_path(dir))
            })
            .cloned()
            .collect())
    }
}

/// Reader over a shared in-memory buffer.
struct MemoryReader {
    data: Cursor<Bytes>,
    size: u64,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.data.seek(pos)
    }
}

impl StorageReader for MemoryReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let bytes = self.data.get_ref();
        let start = (start.min(self.size)) as usize;
        let end = start.saturating_add(length).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }
}
