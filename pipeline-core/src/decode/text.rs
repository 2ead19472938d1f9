// pipeline-core/src/decode/text.rs

use bytes::Bytes;

use super::{Decoder, RecordSpec};
use crate::error::{PipelineError, Result};
use crate::record::{Record, ScalarType, Value};

/// Decodes each raw record as a single UTF-8 string field.
#[derive(Debug, Clone)]
pub struct TextLineDecoder {
    field: String,
}

impl Default for TextLineDecoder {
    fn default() -> Self {
        Self::new("line")
    }
}

impl TextLineDecoder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// The spec this decoder produces: one string column.
    pub fn spec(&self) -> Result<RecordSpec> {
        RecordSpec::new(vec![(self.field.clone(), ScalarType::String)], 0)
    }
}

impl Decoder for TextLineDecoder {
    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(&self, raw: &[u8], spec: &RecordSpec) -> Result<Record> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| PipelineError::decode(raw, Some(0), format!("invalid UTF-8: {e}")))?;
        match spec.columns() {
            [(_, ScalarType::String)] => Ok(Record::from_parts(
                spec.schema().clone(),
                vec![Value::Str(text.to_string())],
            )),
            _ => spec.build_record(raw, &[text]),
        }
    }

    fn infer_spec(&self, _samples: &[Bytes], header: bool) -> Result<RecordSpec> {
        Ok(self.spec()?.with_skip(usize::from(header)))
    }
}
