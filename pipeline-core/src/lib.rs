// pipeline-core/src/lib.rs

//! Dataset Pipelines - Core Library
//!
//! A lazy, batched input-pipeline engine: sources read and decode records
//! from files or memory, transform stages map, filter and reshape them,
//! and shuffle, batch, repeat and prefetch stages feed a pull-based
//! iterator. Building a pipeline only describes it; work starts when an
//! iterator is driven.

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use storage::{LocalStorage, MemoryStorage, ObjectMeta, StorageBackend, StorageReader};

pub mod record;
pub use record::{Batch, DType, Element, ElementSpec, Field, Record, ScalarType, Schema, Value};

pub mod decode;
pub use decode::{BytesDecoder, CsvDecoder, Decoder, RecordSpec, TextLineDecoder};

pub mod dataset;
pub use dataset::{
    AsyncPipelineIterator, Dataset, FieldSelection, FnTransform, PaddingSpec, PipelineIterator,
    SourceOptions, Transform,
};

pub mod session;
pub use session::{CsvOptions, Session};
