// pipeline-core/src/decode/raw.rs

use std::sync::Arc;

use bytes::Bytes;

use super::{Decoder, RecordSpec};
use crate::error::{PipelineError, Result};
use crate::record::{DType, Field, Record, ScalarType, Schema, Value};

/// Decodes binary records (fixed-length or length-prefixed payloads) into a
/// single `list<integer>` field holding the payload bytes.
#[derive(Debug, Clone)]
pub struct BytesDecoder {
    schema: Arc<Schema>,
}

impl Default for BytesDecoder {
    fn default() -> Self {
        Self::new("bytes")
    }
}

impl BytesDecoder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            schema: Arc::new(Schema::single(Field::new(
                field,
                DType::list_of(DType::int()),
            ))),
        }
    }

    pub fn field(&self) -> &str {
        &self.schema.fields()[0].name
    }

    /// The spec paired with this decoder: one column named after the field.
    pub fn spec(&self) -> Result<RecordSpec> {
        RecordSpec::new(vec![(self.field().to_string(), ScalarType::Integer)], 0)
    }
}

impl Decoder for BytesDecoder {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn decode(&self, raw: &[u8], spec: &RecordSpec) -> Result<Record> {
        match spec.columns() {
            [(name, _)] if name == self.field() => {}
            _ => {
                return Err(PipelineError::decode(
                    raw,
                    None,
                    format!("bytes decoder expects a single '{}' column", self.field()),
                ))
            }
        }
        let values = raw.iter().map(|&b| Value::Int(i64::from(b))).collect();
        Ok(Record::from_parts(self.schema.clone(), vec![Value::List(values)]))
    }

    fn output_schema(&self, _spec: &RecordSpec) -> Arc<Schema> {
        self.schema.clone()
    }

    fn infer_spec(&self, _samples: &[Bytes], header: bool) -> Result<RecordSpec> {
        Ok(self.spec()?.with_skip(usize::from(header)))
    }
}
