// pipeline-core/src/decode/delimited.rs

//! CSV (and other single-byte delimited) records.

use bytes::Bytes;
use csv::{ReaderBuilder, StringRecord, Trim};

use super::{infer_scalar_type, Decoder, RecordSpec};
use crate::error::{PipelineError, Result};
use crate::record::Record;

/// Decodes one delimited line per record.
///
/// Quoting follows RFC 4180 via the `csv` crate. Each raw record must hold
/// a complete line; records spanning lines are not supported.
#[derive(Debug, Clone, Copy)]
pub struct CsvDecoder {
    delimiter: u8,
    quote: u8,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl CsvDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Splits a raw line into fields. A blank line has no fields.
    fn tokenize(&self, raw: &[u8]) -> Result<StringRecord> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::Headers)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .from_reader(raw);

        let mut record = StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(_) => Ok(record),
            Err(e) => Err(PipelineError::decode(raw, None, e.to_string())),
        }
    }
}

impl Decoder for CsvDecoder {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn decode(&self, raw: &[u8], spec: &RecordSpec) -> Result<Record> {
        let record = self.tokenize(raw)?;
        let fields: Vec<&str> = record.iter().collect();
        spec.build_record(raw, &fields)
    }

    fn infer_spec(&self, samples: &[Bytes], header: bool) -> Result<RecordSpec> {
        let mut rows = Vec::with_capacity(samples.len());
        for sample in samples {
            let row = self.tokenize(sample)?;
            if !row.is_empty() {
                rows.push(row);
            }
        }

        let (names, data): (Vec<String>, &[StringRecord]) = if header {
            let (first, rest) = rows.split_first().ok_or_else(|| {
                PipelineError::config("cannot infer CSV columns: no header row found")
            })?;
            (first.iter().map(|name| name.trim().to_string()).collect(), rest)
        } else {
            let width = rows.iter().map(StringRecord::len).max().ok_or_else(|| {
                PipelineError::config("cannot infer CSV columns from an empty sample")
            })?;
            ((0..width).map(|i| format!("column_{i}")).collect(), &rows[..])
        };

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let ty = infer_scalar_type(data.iter().filter_map(|row| row.get(idx)));
                (name, ty)
            })
            .collect();

        RecordSpec::new(columns, usize::from(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::record::{ScalarType, Value};

    fn samples(lines: &[&'static str]) -> Vec<Bytes> {
        lines.iter().map(|l| Bytes::from_static(l.as_bytes())).collect()
    }

    #[test]
    fn test_infer_with_header() {
        let decoder = CsvDecoder::new();
        let spec = decoder
            .infer_spec(&samples(&["id,score,name", "1,0.5,a", "2,1,b"]), true)
            .unwrap();

        assert_eq!(spec.skip(), 1);
        assert_eq!(
            spec.columns(),
            &[
                ("id".to_string(), ScalarType::Integer),
                ("score".to_string(), ScalarType::Float),
                ("name".to_string(), ScalarType::String),
            ]
        );
    }

    #[test]
    fn test_infer_without_header() {
        let decoder = CsvDecoder::new();
        let spec = decoder.infer_spec(&samples(&["1,x", "2,y"]), false).unwrap();
        assert_eq!(spec.skip(), 0);
        assert_eq!(spec.columns()[0], ("column_0".to_string(), ScalarType::Integer));
        assert_eq!(spec.columns()[1], ("column_1".to_string(), ScalarType::String));
    }

    #[test]
    fn test_infer_header_only_gives_string_columns() {
        let decoder = CsvDecoder::new();
        let spec = decoder.infer_spec(&samples(&["a,b"]), true).unwrap();
        assert!(spec.columns().iter().all(|(_, ty)| *ty == ScalarType::String));
    }

    #[test]
    fn test_infer_empty_sample_fails() {
        let decoder = CsvDecoder::new();
        assert!(decoder.infer_spec(&[], false).is_err());
        assert!(decoder.infer_spec(&[], true).is_err());
    }

    #[test]
    fn test_decode_quoted_fields() {
        let decoder = CsvDecoder::new();
        let spec = RecordSpec::new(
            vec![("id", ScalarType::Integer), ("text", ScalarType::String)],
            0,
        )
        .unwrap();

        let record = decoder.decode(br#"7,"hello, world""#, &spec).unwrap();
        assert_eq!(record.get("id"), Some(&Value::Int(7)));
        assert_eq!(record.get("text").and_then(Value::as_str), Some("hello, world"));
    }

    #[test]
    fn test_decode_with_tab_delimiter() {
        let decoder = CsvDecoder::new().with_delimiter(b'\t');
        let spec = RecordSpec::new(
            vec![("a", ScalarType::Float), ("b", ScalarType::Float)],
            0,
        )
        .unwrap();
        let record = decoder.decode(b"1.5\t2", &spec).unwrap();
        assert_eq!(record.values(), &[Value::Float(1.5), Value::Float(2.0)]);
    }

    #[test]
    fn test_decode_error_carries_field_index() {
        let decoder = CsvDecoder::new();
        let spec = RecordSpec::new(
            vec![
                ("a", ScalarType::Integer),
                ("b", ScalarType::Integer),
                ("c", ScalarType::Integer),
            ],
            0,
        )
        .unwrap();

        match decoder.decode(b"1,2,three", &spec) {
            Err(PipelineError::Decode { field_index, record, .. }) => {
                assert_eq!(field_index, Some(2));
                assert_eq!(record, "1,2,three");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
