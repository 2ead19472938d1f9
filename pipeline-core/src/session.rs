// pipeline-core/src/session.rs

//! Pipeline session: owns configuration and storage and builds sources.
//!
//! File sources resolve their glob pattern, shard the file list and (when
//! no record spec is given) infer one from sample records, all at build
//! time. Records are only read once an iterator is driven.
//!
//! # Example
//!
//! ```no_run
//! use pipeline_core::{CsvOptions, FieldSelection, Session};
//!
//! let session = Session::from_config_file("pipeline.toml")?;
//! let options = session.source_options().with_shard(4, 0);
//! let dataset = session
//!     .csv("train/*.csv", &CsvOptions::default(), &options)?
//!     .prepare(None, FieldSelection::include(["label"]))?
//!     .shuffle(10_000)?
//!     .batch(128, true)?
//!     .prefetch_default();
//!
//! for batch in dataset.iter() {
//!     let batch = batch?;
//!     println!("{:?}", batch.batch_len());
//! }
//! # Ok::<(), pipeline_core::PipelineError>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{
    parse_format, shard_files, Dataset, Defaults, FileOp, FileRecordReader, FixedSizeFormat,
    LengthPrefixedFormat, NewlineDelimitedFormat, ReaderOptions, RecordFormat, SourceOptions,
};
use crate::decode::{BytesDecoder, CsvDecoder, Decoder, RecordSpec, TextLineDecoder};
use crate::error::{PipelineError, Result};
use crate::record::{ElementSpec, ScalarType, Schema, Value};
use crate::storage::{LocalStorage, StorageBackend};

/// Options for [`Session::csv`].
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Whether every file starts with a header row. With inference, the
    /// header supplies the column names; it is skipped either way.
    pub header: bool,
    pub delimiter: u8,
    /// Explicit columns; inferred from sample records when absent.
    pub columns: Option<Vec<(String, ScalarType)>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: b',',
            columns: None,
        }
    }
}

impl CsvOptions {
    #[must_use]
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn with_columns<S: Into<String>>(mut self, columns: Vec<(S, ScalarType)>) -> Self {
        self.columns = Some(
            columns
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        );
        self
    }
}

/// How a file source obtains its record spec.
enum SpecSource {
    Given(RecordSpec),
    Infer { header: bool },
}

/// Entry point for building pipelines.
pub struct Session {
    config: PipelineConfig,
    storage: Arc<dyn StorageBackend>,
    defaults: Arc<Defaults>,
}

impl Session {
    /// Creates a session with default configuration over local storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be initialized.
    pub fn new() -> Result<Self> {
        Self::from_config(PipelineConfig::default())
    }

    /// Creates a session from a TOML configuration file.
    ///
    /// Environment variable overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = PipelineConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a session over local storage rooted at `storage.base_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// backend cannot be initialized.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);
        Self::with_storage(config, storage)
    }

    /// Creates a session over any storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_storage(config: PipelineConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            defaults: Arc::new(Defaults::from_config(&config)),
            config,
            storage,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Source options taken from the reader section of the configuration.
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions::from_config(&self.config.reader, self.config.storage.buffer_size)
    }

    /// An in-memory table using this session's stage defaults.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a row does not match `schema`.
    pub fn from_records(&self, schema: Schema, rows: Vec<Vec<Value>>) -> Result<Dataset> {
        Dataset::from_records_in(schema, rows, self.defaults.clone())
    }

    /// Integers `start..end` using this session's stage defaults.
    pub fn range(&self, start: i64, end: i64) -> Dataset {
        Dataset::range_in(start, end, self.defaults.clone())
    }

    /// Every line of the matching files as a single string field `line`.
    pub fn text_lines(&self, pattern: &str, options: &SourceOptions) -> Result<Dataset> {
        let decoder = TextLineDecoder::default();
        let spec = decoder.spec()?;
        self.file_source(
            pattern,
            Arc::new(NewlineDelimitedFormat::new()),
            Arc::new(decoder),
            SpecSource::Given(spec),
            options,
        )
    }

    /// Delimited text files, one record per line.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if `pattern` matches nothing,
    /// `ShardIndexOutOfRange` for a bad shard, or a `Config` error if the
    /// columns cannot be inferred.
    pub fn csv(
        &self,
        pattern: &str,
        csv: &CsvOptions,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        let decoder = CsvDecoder::default().with_delimiter(csv.delimiter);
        let spec = match &csv.columns {
            Some(columns) => SpecSource::Given(RecordSpec::new(
                columns.clone(),
                usize::from(csv.header),
            )?),
            None => SpecSource::Infer { header: csv.header },
        };
        self.file_source(
            pattern,
            Arc::new(NewlineDelimitedFormat::new()),
            Arc::new(decoder),
            spec,
            options,
        )
    }

    /// Files of back-to-back `record_size`-byte records, each yielded as a
    /// list of byte values in field `bytes`.
    pub fn fixed_length_records(
        &self,
        pattern: &str,
        record_size: usize,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        if record_size == 0 {
            return Err(PipelineError::config("fixed record size must be > 0"));
        }
        self.byte_records(pattern, Arc::new(FixedSizeFormat::new(record_size)), options)
    }

    /// Files of records framed by a 4-byte big-endian length.
    pub fn length_prefixed_records(
        &self,
        pattern: &str,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        self.byte_records(pattern, Arc::new(LengthPrefixedFormat::new()), options)
    }

    /// Byte records framed by a format string: `"newline"`, `"fixed:N"` or
    /// `"length-prefixed"`.
    pub fn raw_records(
        &self,
        pattern: &str,
        format: &str,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        self.byte_records(pattern, parse_format(format)?, options)
    }

    fn byte_records(
        &self,
        pattern: &str,
        format: Arc<dyn RecordFormat>,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        let decoder = BytesDecoder::default();
        let spec = decoder.spec()?;
        self.file_source(pattern, format, Arc::new(decoder), SpecSource::Given(spec), options)
    }

    /// A file source with any framing and decoder. Without a `spec`, one is
    /// inferred from sample records (no header row).
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if `pattern` matches nothing and
    /// `ShardIndexOutOfRange` for a bad shard.
    pub fn files(
        &self,
        pattern: &str,
        format: Arc<dyn RecordFormat>,
        decoder: Arc<dyn Decoder>,
        spec: Option<RecordSpec>,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        let spec = match spec {
            Some(spec) => SpecSource::Given(spec),
            None => SpecSource::Infer { header: false },
        };
        self.file_source(pattern, format, decoder, spec, options)
    }

    fn file_source(
        &self,
        pattern: &str,
        format: Arc<dyn RecordFormat>,
        decoder: Arc<dyn Decoder>,
        spec: SpecSource,
        options: &SourceOptions,
    ) -> Result<Dataset> {
        options.validate()?;
        let all_files = self.storage.glob(pattern)?;
        if all_files.is_empty() {
            return Err(PipelineError::source_not_found(pattern));
        }
        let files = shard_files(&all_files, options.num_shards, options.shard_index)?;

        let spec = match spec {
            SpecSource::Given(spec) => spec,
            SpecSource::Infer { header } => {
                let samples = self.sample(&all_files, &format, header, options)?;
                decoder.infer_spec(&samples, header)?
            }
        };

        info!(
            pattern,
            matched = all_files.len(),
            shard_files = files.len(),
            shard = options.shard_index,
            num_shards = options.num_shards,
            decoder = decoder.name(),
            "resolved file source"
        );

        let element_spec = ElementSpec::Record(decoder.output_schema(&spec));
        Ok(Dataset::source(
            FileOp {
                storage: self.storage.clone(),
                pattern: pattern.to_string(),
                files,
                format,
                decoder,
                spec: Arc::new(spec),
                options: options.clone(),
            },
            element_spec,
            self.defaults.clone(),
        ))
    }

    /// Reads up to `sample_records` raw records across `files`, in order.
    /// With a header, only the first file's header row is kept.
    fn sample(
        &self,
        files: &[PathBuf],
        format: &Arc<dyn RecordFormat>,
        header: bool,
        options: &SourceOptions,
    ) -> Result<Vec<Bytes>> {
        let mut samples = Vec::new();
        for (i, path) in files.iter().enumerate() {
            let mut reader = FileRecordReader::new(
                self.storage.clone(),
                path.clone(),
                format.clone(),
                ReaderOptions {
                    chunk_size: options.chunk_size,
                    skip_records: usize::from(header && i > 0),
                },
            );
            while samples.len() < options.sample_records {
                match reader.next_record()? {
                    Some(record) => samples.push(record),
                    None => break,
                }
            }
            if samples.len() >= options.sample_records {
                break;
            }
        }
        debug!(samples = samples.len(), "sampled records for spec inference");
        Ok(samples)
    }
}
