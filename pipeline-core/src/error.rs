// pipeline-core/src/error.rs

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while building or driving a dataset pipeline.
///
/// The type is `Clone` so an iterator can keep reporting the same terminal
/// error on every pull after a failure.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("No files match '{pattern}'")]
    SourceNotFound { pattern: String },

    #[error("Shard index {shard_index} out of range (num shards: {num_shards})")]
    ShardIndexOutOfRange { shard_index: usize, num_shards: usize },

    #[error("Decode error{}: {message} (record: {record:?})", field_suffix(.field_index))]
    Decode {
        record: String,
        field_index: Option<usize>,
        message: String,
    },

    #[error("Field selection error: {message}")]
    FieldSelection { message: String },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("Iteration exhausted: the iterator already reached end-of-data")]
    IterationExhausted,

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transform error: {message}")]
    Transform { message: String },

    #[error("Worker for stage '{stage}' terminated abnormally")]
    WorkerPanicked { stage: String },
}

fn field_suffix(field_index: &Option<usize>) -> String {
    match field_index {
        Some(idx) => format!(" at field {idx}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// Convenience constructors
impl PipelineError {
    pub fn source_not_found(pattern: impl Into<String>) -> Self {
        Self::SourceNotFound {
            pattern: pattern.into(),
        }
    }

    pub fn shard_out_of_range(shard_index: usize, num_shards: usize) -> Self {
        Self::ShardIndexOutOfRange {
            shard_index,
            num_shards,
        }
    }

    /// Builds a decode error, keeping a lossy UTF-8 copy of the raw record.
    pub fn decode(raw: &[u8], field_index: Option<usize>, message: impl Into<String>) -> Self {
        Self::Decode {
            record: String::from_utf8_lossy(raw).into_owned(),
            field_index,
            message: message.into(),
        }
    }

    pub fn field_selection(message: impl Into<String>) -> Self {
        Self::FieldSelection {
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    pub fn worker_panicked(stage: impl Into<String>) -> Self {
        Self::WorkerPanicked {
            stage: stage.into(),
        }
    }

    /// Returns true for errors raised while validating a pipeline graph.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::ShardIndexOutOfRange { .. }
                | Self::FieldSelection { .. }
                | Self::TypeMismatch { .. }
                | Self::Config { .. }
                | Self::SourceNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_message() {
        let err = PipelineError::decode(b"1,abc,3", Some(1), "expected integer");
        let msg = err.to_string();
        assert!(msg.contains("at field 1"), "{msg}");
        assert!(msg.contains("1,abc,3"), "{msg}");

        let err = PipelineError::decode(b"1,2", None, "expected 3 fields, found 2");
        assert!(!err.to_string().contains("at field"));
    }

    #[test]
    fn test_errors_are_cloneable_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = PipelineError::storage_with_source("data/a.csv", "failed to open file", io);
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(std::error::Error::source(&cloned).is_some());
    }

    #[test]
    fn test_build_error_classification() {
        assert!(PipelineError::shard_out_of_range(3, 2).is_build_error());
        assert!(PipelineError::field_selection("overlap").is_build_error());
        assert!(!PipelineError::IterationExhausted.is_build_error());
        assert!(!PipelineError::decode(b"x", None, "bad").is_build_error());
    }
}
