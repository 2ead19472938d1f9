// pipeline-core/src/storage/local.rs

//! Local filesystem storage backend implementation.
//!
//! Small files are read through a buffered reader; files above the
//! configured threshold are memory-mapped.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{ObjectMeta, StorageBackend, StorageReader};
use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path that relative paths and patterns are resolved against.
    base_path: PathBuf,
    /// Buffer size for buffered I/O operations.
    buffer_size: usize,
    /// Whether to use memory-mapped I/O.
    use_mmap: bool,
    /// File size threshold above which to use mmap.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path exists but is not a directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if base_path.exists() && !base_path.is_dir() {
            return Err(PipelineError::storage(
                &base_path,
                "base path is not a directory",
            ));
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    /// Resolves a path relative to the base path.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve_path(path).exists())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let full_path = self.resolve_path(path);
        let meta = fs::metadata(&full_path).map_err(|e| {
            PipelineError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;

        Ok(ObjectMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| PipelineError::storage_with_source(&full_path, "failed to open file", e))?;

        let meta = file.metadata().map_err(|e| {
            PipelineError::storage_with_source(&full_path, "failed to read file metadata", e)
        })?;
        let size = meta.len();

        // Use mmap for large files if enabled
        if self.use_mmap && size >= self.mmap_threshold && size > 0 {
            // SAFETY: The file is opened read-only and the Mmap lives as long
            // as the reader that owns it.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                PipelineError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;

            Ok(Box::new(MmapReader::new(mmap, full_path)))
        } else {
            Ok(Box::new(LocalReader::new(
                file,
                size,
                self.buffer_size,
                full_path,
            )))
        }
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let trimmed = pattern.trim_end_matches('/');
        let pattern_path = if trimmed.is_empty() { pattern } else { trimmed };
        let full_pattern = self.resolve_path(Path::new(pattern_path));

        let mut files = Vec::new();
        for path in glob_paths(&full_pattern.to_string_lossy(), pattern)? {
            if path.is_file() {
                files.push(path);
            } else if path.is_dir() {
                // A matched directory stands for the files directly inside it.
                let dir = glob::Pattern::escape(&path.to_string_lossy());
                let inner = format!("{dir}{}*", std::path::MAIN_SEPARATOR);
                files.extend(glob_paths(&inner, pattern)?.into_iter().filter(|p| p.is_file()));
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }
}

fn glob_paths(full_pattern: &str, pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(full_pattern).map_err(|e| {
        PipelineError::config_with_source(format!("invalid file pattern '{pattern}'"), e)
    })?;
    paths
        .map(|entry| {
            entry.map_err(|e| {
                let path = e.path().to_path_buf();
                PipelineError::storage_with_source(path, "failed to list files", e.into_error())
            })
        })
        .collect()
}

/// Buffered file reader for local storage.
struct LocalReader {
    reader: BufReader<File>,
    size: u64,
    path: PathBuf,
}

impl LocalReader {
    fn new(file: File, size: u64, buffer_size: usize, path: PathBuf) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, file),
            size,
            path,
        }
    }
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for LocalReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        if start >= self.size {
            return Ok(Vec::new());
        }
        let length = (length as u64).min(self.size - start) as usize;

        self.seek(SeekFrom::Start(start)).map_err(|e| {
            PipelineError::storage_with_source(
                &self.path,
                format!("failed to seek to position {start}"),
                e,
            )
        })?;

        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf).map_err(|e| {
            PipelineError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;

        Ok(buf)
    }
}

/// Memory-mapped file reader for local storage.
struct MmapReader {
    mmap: Mmap,
    position: u64,
    path: PathBuf,
}

impl MmapReader {
    fn new(mmap: Mmap, path: PathBuf) -> Self {
        Self {
            mmap,
            position: 0,
            path,
        }
    }
}

impl Read for MmapReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = (self.position as usize).min(self.mmap.len());
        let remaining = &self.mmap[pos..];
        let to_read = buf.len().min(remaining.len());

        buf[..to_read].copy_from_slice(&remaining[..to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }
}

impl Seek for MmapReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.mmap.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let len = self.mmap.len();
        let start = usize::try_from(start).map_err(|_| {
            PipelineError::storage(&self.path, format!("offset {start} exceeds address space"))
        })?;
        if start >= len {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(length).min(len);
        Ok(self.mmap[start..end].to_vec())
    }
}
