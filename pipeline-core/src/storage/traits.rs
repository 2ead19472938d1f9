// pipeline-core/src/storage/traits.rs

//! Storage abstraction traits.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Size of the object in bytes.
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<std::time::SystemTime>,
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// A handle for reading from storage.
///
/// This trait extends `Read` and `Seek` with additional methods for
/// efficient random access.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads up to `length` bytes starting at `start`.
    ///
    /// Returns fewer bytes than requested only when the range crosses the
    /// end of the object, and an empty buffer when `start` is at or past it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// The storage backend trait used by source readers.
///
/// # Object Safety
///
/// This trait is object-safe and can be used with `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check fails (e.g., permission denied).
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or metadata cannot be read.
    fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Expands a glob pattern into the matching files.
    ///
    /// Only files are returned and the result is sorted lexicographically,
    /// so the same pattern always yields the same file order. A pattern
    /// without wildcards matches itself when the file exists. A matched
    /// directory expands to the files directly inside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is malformed or listing fails. An
    /// empty match is not an error at this level.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}
