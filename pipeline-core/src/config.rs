// pipeline-core/src/config.rs

//! Configuration management for dataset pipelines.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values. The values
//! here are defaults used by [`crate::Session`] when building sources and
//! stages; every builder method still accepts explicit arguments.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub reader: ReaderConfig,
    pub execution: ExecutionConfig,
    pub shuffle: ShuffleConfig,
    pub logging: LoggingConfig,
}

/// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative locators are resolved against.
    pub base_path: PathBuf,
    // Chunk size in bytes used when reading record files.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for large files.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

/// Source reader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Number of files read concurrently.
    pub parallel_files: usize,
    /// Number of consecutive records taken from one file per interleave turn.
    pub parallel_interleave: usize,
    /// Number of decode workers.
    pub parallel_records: usize,
    /// Depth of the per-file queue filled by background readers.
    pub read_buffer_records: usize,
    /// Number of raw records sampled when inferring a record spec.
    pub sample_records: usize,
}

/// Execution options for transform and prefetch stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default number of map workers.
    pub num_parallel_calls: usize,
    /// Default prefetch depth (batches). Zero disables prefetching.
    pub prefetch_batches: usize,
}

/// Shuffle defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Seed applied to shuffles that do not specify one.
    pub seed: Option<u64>,
    /// Whether each repetition reshuffles with a fresh order.
    pub reshuffle_each_iteration: bool,
}

/// Logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            parallel_files: 1,
            parallel_interleave: 1,
            parallel_records: 1,
            read_buffer_records: 64,
            sample_records: 1000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_parallel_calls: 1,
            prefetch_batches: 2,
        }
    }
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            seed: None,
            reshuffle_each_iteration: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl FromStr for PipelineConfig {
    type Err = PipelineError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| PipelineError::config_with_source("failed to parse TOML config", e))
    }
}

/// Reads `key` from the environment and parses it, ignoring unparsable values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|val| val.parse().ok())
}

impl PipelineConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `DSP_` and use underscores
    // to separate nested fields, e.g. `DSP_READER_PARALLEL_FILES` overrides
    // `reader.parallel_files` and `DSP_SHUFFLE_SEED` overrides `shuffle.seed`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("DSP_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Some(v) = env_parse("DSP_STORAGE_BUFFER_SIZE") {
            self.storage.buffer_size = v;
        }
        if let Some(v) = env_parse("DSP_STORAGE_USE_MMAP") {
            self.storage.use_mmap = v;
        }
        if let Some(v) = env_parse("DSP_STORAGE_MMAP_THRESHOLD") {
            self.storage.mmap_threshold = v;
        }

        // Reader overrides
        if let Some(v) = env_parse("DSP_READER_PARALLEL_FILES") {
            self.reader.parallel_files = v;
        }
        if let Some(v) = env_parse("DSP_READER_PARALLEL_INTERLEAVE") {
            self.reader.parallel_interleave = v;
        }
        if let Some(v) = env_parse("DSP_READER_PARALLEL_RECORDS") {
            self.reader.parallel_records = v;
        }
        if let Some(v) = env_parse("DSP_READER_READ_BUFFER_RECORDS") {
            self.reader.read_buffer_records = v;
        }
        if let Some(v) = env_parse("DSP_READER_SAMPLE_RECORDS") {
            self.reader.sample_records = v;
        }

        // Execution overrides
        if let Some(v) = env_parse("DSP_EXECUTION_NUM_PARALLEL_CALLS") {
            self.execution.num_parallel_calls = v;
        }
        if let Some(v) = env_parse("DSP_EXECUTION_PREFETCH_BATCHES") {
            self.execution.prefetch_batches = v;
        }

        // Shuffle overrides
        if let Some(v) = env_parse("DSP_SHUFFLE_SEED") {
            self.shuffle.seed = Some(v);
        }
        if let Some(v) = env_parse("DSP_SHUFFLE_RESHUFFLE_EACH_ITERATION") {
            self.shuffle.reshuffle_each_iteration = v;
        }

        // Logging overrides
        if let Ok(val) = std::env::var("DSP_LOGGING_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(PipelineError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.reader.parallel_files == 0 {
            return Err(PipelineError::config(
                "reader.parallel_files must be greater than 0",
            ));
        }
        if self.reader.parallel_interleave == 0 {
            return Err(PipelineError::config(
                "reader.parallel_interleave must be greater than 0",
            ));
        }
        if self.reader.parallel_records == 0 {
            return Err(PipelineError::config(
                "reader.parallel_records must be greater than 0",
            ));
        }
        if self.reader.read_buffer_records == 0 {
            return Err(PipelineError::config(
                "reader.read_buffer_records must be greater than 0",
            ));
        }
        if self.reader.sample_records == 0 {
            return Err(PipelineError::config(
                "reader.sample_records must be greater than 0",
            ));
        }

        if self.execution.num_parallel_calls == 0 {
            return Err(PipelineError::config(
                "execution.num_parallel_calls must be greater than 0",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(PipelineError::config("logging.level must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();

        assert_eq!(config.storage.base_path, PathBuf::from("."));
        assert_eq!(config.storage.buffer_size, 64 * 1024);
        assert!(config.storage.use_mmap);

        assert_eq!(config.reader.parallel_files, 1);
        assert_eq!(config.reader.parallel_interleave, 1);
        assert_eq!(config.reader.parallel_records, 1);
        assert_eq!(config.reader.sample_records, 1000);

        assert_eq!(config.execution.num_parallel_calls, 1);
        assert_eq!(config.execution.prefetch_batches, 2);

        assert!(config.shuffle.seed.is_none());
        assert!(config.shuffle.reshuffle_each_iteration);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: PipelineConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [storage]
            base_path = "/data/training"
            buffer_size = 131072
            use_mmap = false

            [reader]
            parallel_files = 4
            parallel_interleave = 16
            parallel_records = 8

            [execution]
            num_parallel_calls = 4
            prefetch_batches = 0

            [shuffle]
            seed = 42
            reshuffle_each_iteration = false

            [logging]
            level = "debug"
        "#;

        let config: PipelineConfig = toml.parse().unwrap();

        assert_eq!(config.storage.base_path, PathBuf::from("/data/training"));
        assert_eq!(config.storage.buffer_size, 131072);
        assert!(!config.storage.use_mmap);
        assert_eq!(config.reader.parallel_files, 4);
        assert_eq!(config.reader.parallel_interleave, 16);
        assert_eq!(config.reader.parallel_records, 8);
        // Unset fields keep their defaults
        assert_eq!(config.reader.read_buffer_records, 64);
        assert_eq!(config.execution.num_parallel_calls, 4);
        assert_eq!(config.execution.prefetch_batches, 0);
        assert_eq!(config.shuffle.seed, Some(42));
        assert!(!config.shuffle.reshuffle_each_iteration);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<PipelineConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [reader]
            parallel_files = 3
            "#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.reader.parallel_files, 3);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[reader]\nparallel_interleave = 0").unwrap();

        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("parallel_interleave"));
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(PipelineConfig::from_file("/nonexistent/pipeline.toml").is_err());
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = PipelineConfig::default();
        config.storage.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.reader.parallel_files = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.reader.parallel_records = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.execution.num_parallel_calls = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.logging.level = "  ".to_string();
        assert!(config.validate().is_err());
    }

    fn clear_dsp_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("DSP_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variables are process-global, so all override checks live
    // in one test.
    #[test]
    fn test_env_overrides() {
        clear_dsp_env_vars();

        std::env::set_var("DSP_READER_PARALLEL_FILES", "6");
        std::env::set_var("DSP_EXECUTION_PREFETCH_BATCHES", "8");
        std::env::set_var("DSP_SHUFFLE_SEED", "12345");
        std::env::set_var("DSP_LOGGING_LEVEL", "trace");

        let config = PipelineConfig::default().with_env_overrides();
        assert_eq!(config.reader.parallel_files, 6);
        assert_eq!(config.execution.prefetch_batches, 8);
        assert_eq!(config.shuffle.seed, Some(12345));
        assert_eq!(config.logging.level, "trace");

        clear_dsp_env_vars();

        // Unparsable values are ignored
        std::env::set_var("DSP_STORAGE_BUFFER_SIZE", "not_a_number");
        let config = PipelineConfig::default().with_env_overrides();
        assert_eq!(config.storage.buffer_size, 64 * 1024);

        clear_dsp_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut original = PipelineConfig::default();
        original.shuffle.seed = Some(7);
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: PipelineConfig = toml_str.parse().unwrap();

        assert_eq!(original.storage.base_path, parsed.storage.base_path);
        assert_eq!(original.reader.sample_records, parsed.reader.sample_records);
        assert_eq!(parsed.shuffle.seed, Some(7));
    }
}
