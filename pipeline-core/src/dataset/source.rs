// pipeline-core/src/dataset/source.rs

//! Source stages: in-memory tables, integer ranges and record files.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use super::format::RecordFormat;
use super::interleave::{InterleaveOptions, InterleavedRecords};
use super::parallel::{OrderedMap, WorkFn};
use super::reader::ReaderOptions;
use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::config::ReaderConfig;
use crate::decode::{Decoder, RecordSpec};
use crate::error::{PipelineError, Result};
use crate::record::{Element, Record, Schema, Value};
use crate::storage::StorageBackend;

/// How a file source shards, schedules and decodes its files.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Number of partitions of the file list.
    pub num_shards: usize,
    /// Partition read by this source.
    pub shard_index: usize,
    /// Files open at once.
    pub parallel_files: usize,
    /// Consecutive records taken from each open file per turn.
    pub parallel_interleave: usize,
    /// Decode workers.
    pub parallel_records: usize,
    /// Records buffered per open file when reading several at once.
    pub read_buffer_records: usize,
    /// Bytes fetched from storage per read.
    pub chunk_size: usize,
    /// Records sampled for spec inference.
    pub sample_records: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self::from_config(&ReaderConfig::default(), 64 * 1024)
    }
}

impl SourceOptions {
    /// Options from the reader section of the configuration.
    pub fn from_config(reader: &ReaderConfig, chunk_size: usize) -> Self {
        Self {
            num_shards: 1,
            shard_index: 0,
            parallel_files: reader.parallel_files,
            parallel_interleave: reader.parallel_interleave,
            parallel_records: reader.parallel_records,
            read_buffer_records: reader.read_buffer_records,
            chunk_size,
            sample_records: reader.sample_records,
        }
    }

    #[must_use]
    pub fn with_shard(mut self, num_shards: usize, shard_index: usize) -> Self {
        self.num_shards = num_shards;
        self.shard_index = shard_index;
        self
    }

    #[must_use]
    pub fn with_parallel_files(mut self, parallel_files: usize) -> Self {
        self.parallel_files = parallel_files;
        self
    }

    #[must_use]
    pub fn with_interleave_block(mut self, block_length: usize) -> Self {
        self.parallel_interleave = block_length;
        self
    }

    #[must_use]
    pub fn with_parallel_records(mut self, parallel_records: usize) -> Self {
        self.parallel_records = parallel_records;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("parallel_files", self.parallel_files),
            ("parallel_interleave", self.parallel_interleave),
            ("parallel_records", self.parallel_records),
            ("read_buffer_records", self.read_buffer_records),
            ("chunk_size", self.chunk_size),
            ("sample_records", self.sample_records),
        ] {
            if value == 0 {
                return Err(PipelineError::config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Yields a shared in-memory table.
pub(crate) struct RecordsOp {
    pub elements: Arc<Vec<Element>>,
}

struct RecordsStream {
    elements: Arc<Vec<Element>>,
    position: usize,
}

impl ElementStream for RecordsStream {
    fn next(&mut self) -> Result<Option<Element>> {
        let element = self.elements.get(self.position).cloned();
        if element.is_some() {
            self.position += 1;
        }
        Ok(element)
    }
}

impl Operator for RecordsOp {
    fn describe(&self) -> String {
        format!("from_records({} rows)", self.elements.len())
    }

    fn open(&self, _inputs: &[Dataset], _ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(RecordsStream {
            elements: self.elements.clone(),
            position: 0,
        }))
    }
}

/// Yields `start..end` as records with one integer field.
pub(crate) struct RangeOp {
    pub start: i64,
    pub end: i64,
    pub schema: Arc<Schema>,
}

struct RangeStream {
    next: i64,
    end: i64,
    schema: Arc<Schema>,
}

impl ElementStream for RangeStream {
    fn next(&mut self) -> Result<Option<Element>> {
        if self.next >= self.end {
            return Ok(None);
        }
        let value = self.next;
        self.next += 1;
        Ok(Some(Element::Record(Record::from_parts(
            self.schema.clone(),
            vec![Value::Int(value)],
        ))))
    }
}

impl Operator for RangeOp {
    fn describe(&self) -> String {
        format!("range({}..{})", self.start, self.end)
    }

    fn open(&self, _inputs: &[Dataset], _ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(RangeStream {
            next: self.start,
            end: self.end,
            schema: self.schema.clone(),
        }))
    }
}

/// Reads, interleaves and decodes the records of a list of files.
pub(crate) struct FileOp {
    pub storage: Arc<dyn StorageBackend>,
    pub pattern: String,
    /// Files of this shard, in read order.
    pub files: Vec<PathBuf>,
    pub format: Arc<dyn RecordFormat>,
    pub decoder: Arc<dyn Decoder>,
    pub spec: Arc<RecordSpec>,
    pub options: SourceOptions,
}

impl Operator for FileOp {
    fn describe(&self) -> String {
        format!(
            "{}('{}', {} files, format={}, parallel_files={}, block={}, decoders={})",
            self.decoder.name(),
            self.pattern,
            self.files.len(),
            self.format.name(),
            self.options.parallel_files,
            self.options.parallel_interleave,
            self.options.parallel_records,
        )
    }

    fn open(&self, _inputs: &[Dataset], _ctx: &IterContext) -> Result<BoxStream> {
        let records = InterleavedRecords::new(
            self.storage.clone(),
            self.files.clone(),
            self.format.clone(),
            ReaderOptions {
                chunk_size: self.options.chunk_size,
                skip_records: self.spec.skip(),
            },
            InterleaveOptions {
                cycle_length: self.options.parallel_files,
                block_length: self.options.parallel_interleave,
                buffer_records: self.options.read_buffer_records,
            },
        );

        let decoder = self.decoder.clone();
        let spec = self.spec.clone();
        let decode: WorkFn<Bytes> = Arc::new(move |raw: Bytes| {
            decoder.decode(&raw, &spec).map(Element::Record)
        });
        Ok(Box::new(OrderedMap::new(
            "decode",
            records,
            decode,
            self.options.parallel_records,
        )))
    }
}
