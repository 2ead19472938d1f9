// pipeline-core/src/decode/mod.rs

//! Record decoders.
//!
//! A [`Decoder`] turns one raw record payload (a line of text, a fixed-size
//! blob, ...) into a typed [`Record`] according to a [`RecordSpec`]. It can
//! also infer a spec from a sample of raw records, which is how CSV sources
//! work without an explicit column list.

mod delimited;
mod raw;
mod text;

pub use delimited::CsvDecoder;
pub use raw::BytesDecoder;
pub use text::TextLineDecoder;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{PipelineError, Result};
use crate::record::{DType, Field, Record, ScalarType, Schema, Value};

/// Column names and types of decoded records, plus the number of leading
/// rows of each file to skip (headers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    columns: Vec<(String, ScalarType)>,
    skip: usize,
    schema: Arc<Schema>,
}

impl RecordSpec {
    /// Creates a spec; column names must be unique.
    pub fn new<S: Into<String>>(columns: Vec<(S, ScalarType)>, skip: usize) -> Result<Self> {
        let columns: Vec<(String, ScalarType)> =
            columns.into_iter().map(|(n, t)| (n.into(), t)).collect();
        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, ty)| Field::new(name.clone(), DType::Scalar(*ty)))
                .collect(),
        )?;
        Ok(Self {
            columns,
            skip,
            schema: Arc::new(schema),
        })
    }

    pub fn columns(&self) -> &[(String, ScalarType)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of leading records skipped in every file.
    pub fn skip(&self) -> usize {
        self.skip
    }

    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Schema of the records this spec decodes into.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Converts decoded text fields into a record, reporting the first field
    /// that cannot be coerced.
    ///
    /// Empty numeric fields take the column default (`0` / `0.0`).
    pub fn build_record(&self, raw: &[u8], fields: &[&str]) -> Result<Record> {
        if fields.len() != self.columns.len() {
            return Err(PipelineError::decode(
                raw,
                Some(fields.len().min(self.columns.len())),
                format!(
                    "expected {} fields, found {}",
                    self.columns.len(),
                    fields.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(self.columns.len());
        for (idx, (text, (name, ty))) in fields.iter().zip(&self.columns).enumerate() {
            let value = parse_scalar(text, *ty).ok_or_else(|| {
                PipelineError::decode(
                    raw,
                    Some(idx),
                    format!("cannot parse {text:?} as {ty} for column '{name}'"),
                )
            })?;
            values.push(value);
        }
        Ok(Record::from_parts(self.schema.clone(), values))
    }
}

/// Parses `text` as a value of type `ty`.
pub fn parse_scalar(text: &str, ty: ScalarType) -> Option<Value> {
    let trimmed = text.trim();
    match ty {
        ScalarType::String => Some(Value::Str(text.to_string())),
        _ if trimmed.is_empty() => Some(Value::default_for(ty)),
        ScalarType::Integer => trimmed.parse::<i64>().ok().map(Value::Int),
        ScalarType::Float => trimmed.parse::<f64>().ok().map(Value::Float),
    }
}

/// Infers the narrowest scalar type every sample fits: integer, then float,
/// then string. Empty samples are ignored; a column with no non-empty
/// samples is a string column.
pub fn infer_scalar_type<'a>(samples: impl IntoIterator<Item = &'a str>) -> ScalarType {
    let mut ty = ScalarType::Integer;
    let mut seen_any = false;
    for sample in samples {
        let sample = sample.trim();
        if sample.is_empty() {
            continue;
        }
        seen_any = true;
        if ty == ScalarType::Integer && sample.parse::<i64>().is_err() {
            ty = ScalarType::Float;
        }
        if ty == ScalarType::Float && sample.parse::<f64>().is_err() {
            return ScalarType::String;
        }
    }
    if seen_any {
        ty
    } else {
        ScalarType::String
    }
}

/// Pluggable conversion from raw record payloads to typed records.
pub trait Decoder: Send + Sync {
    /// Name of this decoder, used in pipeline descriptions.
    fn name(&self) -> &'static str;

    /// Decodes one raw record.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Decode` when the record does not match `spec`.
    fn decode(&self, raw: &[u8], spec: &RecordSpec) -> Result<Record>;

    /// Schema of the records `decode` produces for `spec`.
    fn output_schema(&self, spec: &RecordSpec) -> Arc<Schema> {
        spec.schema().clone()
    }

    /// Infers a spec from sample records (the first records of a file).
    ///
    /// When `header` is true the first sample supplies column names and the
    /// returned spec skips one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the samples cannot be tokenized.
    fn infer_spec(&self, samples: &[Bytes], header: bool) -> Result<RecordSpec>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_scalar_type() {
        assert_eq!(infer_scalar_type(["1", "2", "-3"]), ScalarType::Integer);
        assert_eq!(infer_scalar_type(["1", "2.5"]), ScalarType::Float);
        assert_eq!(infer_scalar_type(["1e3", "4"]), ScalarType::Float);
        assert_eq!(infer_scalar_type(["1", "x", "2.0"]), ScalarType::String);
        assert_eq!(infer_scalar_type(["", "7", " "]), ScalarType::Integer);
        assert_eq!(infer_scalar_type(["", ""]), ScalarType::String);
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar(" 42 ", ScalarType::Integer), Some(Value::Int(42)));
        assert_eq!(parse_scalar("4.5", ScalarType::Float), Some(Value::Float(4.5)));
        assert_eq!(parse_scalar("", ScalarType::Float), Some(Value::Float(0.0)));
        assert_eq!(parse_scalar("abc", ScalarType::Integer), None);
        assert_eq!(
            parse_scalar(" keep ", ScalarType::String),
            Some(Value::Str(" keep ".to_string()))
        );
    }

    #[test]
    fn test_build_record_reports_field_index() {
        let spec = RecordSpec::new(
            vec![("a", ScalarType::Integer), ("b", ScalarType::Float)],
            0,
        )
        .unwrap();

        let record = spec.build_record(b"1,2.5", &["1", "2.5"]).unwrap();
        assert_eq!(record.get("b"), Some(&Value::Float(2.5)));

        match spec.build_record(b"1,x", &["1", "x"]) {
            Err(PipelineError::Decode { field_index, record, .. }) => {
                assert_eq!(field_index, Some(1));
                assert_eq!(record, "1,x");
            }
            other => panic!("expected decode error, got {other:?}"),
        }

        match spec.build_record(b"1", &["1"]) {
            Err(PipelineError::Decode { field_index, .. }) => assert_eq!(field_index, Some(1)),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_spec_rejects_duplicate_names() {
        let result = RecordSpec::new(
            vec![("a", ScalarType::Integer), ("a", ScalarType::Integer)],
            0,
        );
        assert!(result.is_err());
    }
}
