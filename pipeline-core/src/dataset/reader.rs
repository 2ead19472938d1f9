// pipeline-core/src/dataset/reader.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::format::RecordFormat;
use crate::error::{PipelineError, Result};
use crate::storage::{StorageBackend, StorageReader};

/// Options for a [`FileRecordReader`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Number of bytes fetched from storage per read.
    pub chunk_size: usize,
    /// Number of leading records (header rows) to skip.
    pub skip_records: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024, // 64KB default
            skip_records: 0,
        }
    }
}

/// Reads the raw records of one file in order.
///
/// The reader fetches the file in bounded chunks through a single handle,
/// which is opened on the first call to [`next_record`](Self::next_record)
/// and released as soon as the file is exhausted (or the reader dropped).
/// Payloads are zero-copy slices of the chunk they were found in.
pub struct FileRecordReader {
    storage: Arc<dyn StorageBackend>,
    path: PathBuf,
    format: Arc<dyn RecordFormat>,
    options: ReaderOptions,
    handle: Option<Box<dyn StorageReader>>,
    file_size: Option<u64>,
    /// File offset of the first byte not yet fetched.
    read_offset: u64,
    buffer: Bytes,
    /// Position of the next unconsumed byte in `buffer`.
    cursor: usize,
    skipped: usize,
    records_read: u64,
    exhausted: bool,
}

impl FileRecordReader {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        path: PathBuf,
        format: Arc<dyn RecordFormat>,
        options: ReaderOptions,
    ) -> Self {
        Self {
            storage,
            path,
            format,
            options,
            handle: None,
            file_size: None,
            read_offset: 0,
            buffer: Bytes::new(),
            cursor: 0,
            skipped: 0,
            records_read: 0,
            exhausted: false,
        }
    }

    /// Returns the payload of the next record, or `Ok(None)` at end of file.
    ///
    /// # Errors
    ///
    /// Storage errors surface on the call that first needs the file. A file
    /// ending in a partial record of a format that does not accept one is a
    /// storage error.
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let file_size = self.ensure_open()?;

            if let Some(end) = self.format.find_record_end(&self.buffer, self.cursor) {
                let payload = self
                    .buffer
                    .slice_ref(self.format.payload(&self.buffer[self.cursor..end]));
                self.cursor = end;
                if let Some(payload) = self.emit(payload) {
                    return Ok(Some(payload));
                }
                continue;
            }

            if self.read_offset < file_size {
                self.fill_buffer(file_size)?;
                continue;
            }

            // Everything is fetched; whatever is left is a final partial record.
            let rest = &self.buffer[self.cursor..];
            if rest.is_empty() {
                self.close();
                return Ok(None);
            }
            let Some(payload) = self.format.trailing_record(rest) else {
                let at = self.read_offset - rest.len() as u64;
                let err = PipelineError::storage(
                    &self.path,
                    format!(
                        "truncated {} record at offset {at} ({} trailing bytes)",
                        self.format.name(),
                        rest.len()
                    ),
                );
                self.close();
                return Err(err);
            };
            let payload = self.buffer.slice_ref(payload);
            self.cursor = self.buffer.len();
            if let Some(payload) = self.emit(payload) {
                return Ok(Some(payload));
            }
        }
    }

    /// Counts skipped header records; returns the payload once past them.
    fn emit(&mut self, payload: Bytes) -> Option<Bytes> {
        if self.skipped < self.options.skip_records {
            self.skipped += 1;
            return None;
        }
        self.records_read += 1;
        Some(payload)
    }

    fn ensure_open(&mut self) -> Result<u64> {
        if let (Some(_), Some(size)) = (&self.handle, self.file_size) {
            return Ok(size);
        }
        let handle = self.storage.open_read(&self.path)?;
        let size = handle.size();
        debug!(path = %self.path.display(), size, "opened file");
        self.handle = Some(handle);
        self.file_size = Some(size);
        Ok(size)
    }

    /// Appends the next chunk to the unconsumed tail of the buffer.
    fn fill_buffer(&mut self, file_size: u64) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(PipelineError::storage(&self.path, "file handle is closed"));
        };
        let chunk = handle.read_range(self.read_offset, self.options.chunk_size.max(1))?;
        if chunk.is_empty() {
            // The file shrank underneath us; treat what we have as the end.
            self.file_size = Some(self.read_offset.min(file_size));
            return Ok(());
        }
        self.read_offset += chunk.len() as u64;

        let tail = &self.buffer[self.cursor..];
        let mut merged = BytesMut::with_capacity(tail.len() + chunk.len());
        merged.extend_from_slice(tail);
        merged.extend_from_slice(&chunk);
        self.buffer = merged.freeze();
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(path = %self.path.display(), records = self.records_read, "closed file");
        }
        self.buffer = Bytes::new();
        self.cursor = 0;
        self.exhausted = true;
    }

    /// Rewinds to the start of the file. The handle is reopened lazily.
    pub fn reset(&mut self) {
        self.handle = None;
        self.file_size = None;
        self.read_offset = 0;
        self.buffer = Bytes::new();
        self.cursor = 0;
        self.skipped = 0;
        self.records_read = 0;
        self.exhausted = false;
    }

    /// Fraction of the file consumed, between 0.0 and 1.0.
    pub fn progress(&self) -> f64 {
        if self.exhausted {
            return 1.0;
        }
        match self.file_size {
            None => 0.0,
            Some(0) => 1.0,
            Some(total) => {
                let pending = (self.buffer.len() - self.cursor) as u64;
                let consumed = self.read_offset.saturating_sub(pending);
                (consumed as f64 / total as f64).min(1.0)
            }
        }
    }

    /// Number of records yielded so far (headers excluded).
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Whether the underlying file handle is currently open.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for FileRecordReader {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
