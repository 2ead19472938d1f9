// pipeline-core/src/dataset/format.rs

//! Raw record framing.
//!
//! A [`RecordFormat`] finds where one record ends in a byte buffer and which
//! part of the framed bytes is payload. Formats never look past the record
//! they are asked about, so a reader can feed them arbitrary chunks.

use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Describes how to find record boundaries
pub trait RecordFormat: Send + Sync {
    /// Name of this record format
    fn name(&self) -> &'static str;

    /// Returns the exclusive end of the record that starts at `offset`, or
    /// `None` if `data` does not hold the complete record.
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize>;

    /// The payload of one complete framed record.
    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        record
    }

    /// Handles bytes left at end-of-file that do not form a complete record.
    ///
    /// Returns the payload if the format accepts an unterminated final
    /// record, or `None` if the leftover bytes are a truncated record.
    fn trailing_record<'a>(&self, rest: &'a [u8]) -> Option<&'a [u8]> {
        let _ = rest;
        None
    }
}

/// Fixed-size records
#[derive(Debug, Clone)]
pub struct FixedSizeFormat {
    pub record_size: usize,
}

impl FixedSizeFormat {
    pub fn new(record_size: usize) -> Self {
        Self { record_size }
    }
}

impl RecordFormat for FixedSizeFormat {
    fn name(&self) -> &'static str {
        "fixed-size"
    }

    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        let end = offset.checked_add(self.record_size)?;
        (self.record_size > 0 && end <= data.len()).then_some(end)
    }
}

/// Newline-delimited records (text, CSV, JSONL)
///
/// The terminator (`\n` or `\r\n`) is not part of the payload. A final line
/// without a terminator is still a record.
#[derive(Debug, Clone, Default)]
pub struct NewlineDelimitedFormat;

impl NewlineDelimitedFormat {
    pub fn new() -> Self {
        Self
    }
}

fn strip_carriage_return(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl RecordFormat for NewlineDelimitedFormat {
    fn name(&self) -> &'static str {
        "newline-delimited"
    }

    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        let rest = data.get(offset..)?;
        rest.iter()
            .position(|&byte| byte == b'\n')
            .map(|i| offset + i + 1)
    }

    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        strip_carriage_return(record.strip_suffix(b"\n").unwrap_or(record))
    }

    fn trailing_record<'a>(&self, rest: &'a [u8]) -> Option<&'a [u8]> {
        Some(strip_carriage_return(rest))
    }
}

/// Length-prefixed records (4-byte big-endian length + data)
#[derive(Debug, Clone, Default)]
pub struct LengthPrefixedFormat;

impl LengthPrefixedFormat {
    pub fn new() -> Self {
        Self
    }
}

const LENGTH_PREFIX: usize = 4;

impl RecordFormat for LengthPrefixedFormat {
    fn name(&self) -> &'static str {
        "length-prefixed"
    }

    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        let prefix: [u8; LENGTH_PREFIX] = data
            .get(offset..offset.checked_add(LENGTH_PREFIX)?)?
            .try_into()
            .ok()?;
        let length = u32::from_be_bytes(prefix) as usize;

        let end = offset.checked_add(LENGTH_PREFIX)?.checked_add(length)?;
        (end <= data.len()).then_some(end)
    }

    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        record.get(LENGTH_PREFIX..).unwrap_or_default()
    }
}

/// Parses a format string into a RecordFormat implementation.
///
/// Supported formats:
/// - "fixed:N" - Fixed-size records of N bytes
/// - "newline" - Newline-delimited records
/// - "length-prefixed" - 4-byte big-endian length prefix + data
pub fn parse_format(format: &str) -> Result<Arc<dyn RecordFormat>> {
    if let Some(size_str) = format.strip_prefix("fixed:") {
        let size: usize = size_str.parse().map_err(|_| {
            PipelineError::config(format!("invalid fixed record size: '{size_str}'"))
        })?;
        if size == 0 {
            return Err(PipelineError::config("fixed record size must be > 0"));
        }
        Ok(Arc::new(FixedSizeFormat::new(size)))
    } else {
        match format {
            "newline" => Ok(Arc::new(NewlineDelimitedFormat::new())),
            "length-prefixed" => Ok(Arc::new(LengthPrefixedFormat::new())),
            _ => Err(PipelineError::config(format!(
                "unknown record format: '{format}'. Expected 'fixed:N', 'newline', or 'length-prefixed'"
            ))),
        }
    }
}
