// pipeline-core/src/dataset/interleave.rs

//! Round-robin interleaving of records from several open files.
//!
//! Up to `cycle_length` files are open at once. Each turn takes up to
//! `block_length` consecutive records from one file before moving to the
//! next. When a file runs out mid-block the block ends early; the next
//! unopened file takes over that slot and contributes on the slot's next
//! turn. Slots with no replacement leave the cycle.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use tracing::{debug, warn};

use super::format::RecordFormat;
use super::reader::{FileRecordReader, ReaderOptions};
use super::stream::Pull;
use crate::error::{PipelineError, Result};
use crate::storage::StorageBackend;

/// How the interleaved reader schedules its files.
#[derive(Debug, Clone)]
pub struct InterleaveOptions {
    /// Number of files open at once.
    pub cycle_length: usize,
    /// Consecutive records taken from a file per turn.
    pub block_length: usize,
    /// Records buffered per file by its background reader when more than
    /// one file is open.
    pub buffer_records: usize,
}

impl Default for InterleaveOptions {
    fn default() -> Self {
        Self {
            cycle_length: 1,
            block_length: 1,
            buffer_records: 64,
        }
    }
}

/// A file being read, either on the pulling thread or on its own thread.
enum SlotReader {
    Inline(FileRecordReader),
    Background(BackgroundReader),
}

impl SlotReader {
    fn next_record(&mut self) -> Result<Option<Bytes>> {
        match self {
            Self::Inline(reader) => reader.next_record(),
            Self::Background(reader) => reader.next_record(),
        }
    }
}

/// Reads one file ahead of the consumer into a bounded channel.
struct BackgroundReader {
    records: Option<Receiver<Result<Bytes>>>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl BackgroundReader {
    fn spawn(mut reader: FileRecordReader, capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let path = reader.path().to_path_buf();
        let handle = thread::spawn(move || loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    if tx.send(Ok(record)).is_err() {
                        // Consumer went away; dropping the reader closes the file.
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        });

        Self {
            records: Some(rx),
            handle: Some(handle),
            path,
        }
    }

    fn next_record(&mut self) -> Result<Option<Bytes>> {
        let Some(records) = &self.records else {
            return Ok(None);
        };
        match records.recv() {
            Ok(item) => item.map(Some),
            // Sender dropped: the thread finished or died.
            Err(_) => {
                self.records = None;
                match self.handle.take().map(JoinHandle::join) {
                    Some(Err(_)) => {
                        warn!(path = %self.path.display(), "file reader thread panicked");
                        Err(PipelineError::worker_panicked("interleave"))
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        // Unblocks a reader waiting on a full channel.
        self.records.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Yields raw record payloads from an ordered list of files, interleaved.
pub(crate) struct InterleavedRecords {
    storage: Arc<dyn StorageBackend>,
    format: Arc<dyn RecordFormat>,
    reader_options: ReaderOptions,
    options: InterleaveOptions,
    pending: VecDeque<PathBuf>,
    slots: Vec<SlotReader>,
    current: usize,
    taken_in_block: usize,
    started: bool,
}

impl InterleavedRecords {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        files: Vec<PathBuf>,
        format: Arc<dyn RecordFormat>,
        reader_options: ReaderOptions,
        options: InterleaveOptions,
    ) -> Self {
        Self {
            storage,
            format,
            reader_options,
            options,
            pending: files.into(),
            slots: Vec::new(),
            current: 0,
            taken_in_block: 0,
            started: false,
        }
    }

    fn open_next(&mut self) -> Option<SlotReader> {
        let path = self.pending.pop_front()?;
        debug!(path = %path.display(), "scheduling file");
        let reader = FileRecordReader::new(
            self.storage.clone(),
            path,
            self.format.clone(),
            self.reader_options.clone(),
        );
        Some(if self.options.cycle_length > 1 {
            SlotReader::Background(BackgroundReader::spawn(reader, self.options.buffer_records))
        } else {
            SlotReader::Inline(reader)
        })
    }

    fn advance(&mut self) {
        self.taken_in_block = 0;
        if !self.slots.is_empty() {
            self.current = (self.current + 1) % self.slots.len();
        }
    }

    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        if !self.started {
            self.started = true;
            while self.slots.len() < self.options.cycle_length.max(1) {
                match self.open_next() {
                    Some(slot) => self.slots.push(slot),
                    None => break,
                }
            }
        }

        loop {
            if self.slots.is_empty() {
                return Ok(None);
            }

            match self.slots[self.current].next_record()? {
                Some(record) => {
                    self.taken_in_block += 1;
                    if self.taken_in_block >= self.options.block_length.max(1) {
                        self.advance();
                    }
                    return Ok(Some(record));
                }
                None => match self.open_next() {
                    Some(replacement) => {
                        self.slots[self.current] = replacement;
                        self.advance();
                    }
                    None => {
                        self.slots.remove(self.current);
                        self.taken_in_block = 0;
                        if self.current >= self.slots.len() {
                            self.current = 0;
                        }
                    }
                },
            }
        }
    }
}

impl Pull<Bytes> for InterleavedRecords {
    fn pull(&mut self) -> Result<Option<Bytes>> {
        self.next_record()
    }
}
