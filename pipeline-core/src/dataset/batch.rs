// pipeline-core/src/dataset/batch.rs

//! Batching: stacking consecutive elements field by field, optionally
//! padding variable-length fields, and the inverse (unbatch).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::error::{PipelineError, Result};
use crate::record::{DType, Element, ElementSpec, Record, Schema, Value};

/// Per-field padding for [`Dataset::padded_batch`](super::Dataset::padded_batch).
///
/// Every list-typed field is padded to the longest value in its batch, or
/// to a fixed length if one is configured. Fields without an explicit pad
/// value are padded with `0`, `0.0` or the empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaddingSpec {
    lengths: BTreeMap<String, usize>,
    values: BTreeMap<String, Value>,
}

impl PaddingSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pads `field` to exactly `length` items.
    #[must_use]
    pub fn with_length(mut self, field: impl Into<String>, length: usize) -> Self {
        self.lengths.insert(field.into(), length);
        self
    }

    /// Pads `field` with `value` instead of the type's zero value.
    #[must_use]
    pub fn with_pad_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn length(&self, field: &str) -> Option<usize> {
        self.lengths.get(field).copied()
    }

    pub fn pad_value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    fn named_fields(&self) -> impl Iterator<Item = &str> {
        self.lengths.keys().chain(self.values.keys()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct FieldPad {
    length: Option<usize>,
    value: Value,
}

/// Stacks records of one schema into a batch record.
#[derive(Debug)]
struct Stacker {
    batched: Arc<Schema>,
    pads: Vec<Option<FieldPad>>,
}

impl Stacker {
    fn new(schema: &Schema, padding: Option<&PaddingSpec>) -> Result<Self> {
        let pads = schema
            .fields()
            .iter()
            .map(|field| {
                let Some(padding) = padding else {
                    return Ok(None);
                };
                let DType::List(inner) = &field.dtype else {
                    if padding.length(&field.name).is_some()
                        || padding.pad_value(&field.name).is_some()
                    {
                        return Err(PipelineError::type_mismatch(format!(
                            "cannot pad scalar field '{}' of type {}",
                            field.name, field.dtype
                        )));
                    }
                    return Ok(None);
                };
                let value = match padding.pad_value(&field.name) {
                    Some(value) if value.conforms_to(inner) => value.clone(),
                    Some(value) => {
                        return Err(PipelineError::type_mismatch(format!(
                            "pad value {value:?} for field '{}' is not of type {inner}",
                            field.name
                        )))
                    }
                    None => default_value(inner),
                };
                Ok(Some(FieldPad {
                    length: padding.length(&field.name),
                    value,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            batched: Arc::new(schema.batched()),
            pads,
        })
    }

    fn stack(&self, rows: Vec<Record>) -> Result<Record> {
        let mut columns: Vec<Vec<Value>> = (0..self.pads.len())
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for row in rows {
            for (column, value) in columns.iter_mut().zip(row.into_values()) {
                column.push(value);
            }
        }

        let fields = self.batched.fields();
        for ((column, pad), field) in columns.iter_mut().zip(&self.pads).zip(fields) {
            if let Some(pad) = pad {
                pad_column(&field.name, column, pad)?;
            }
        }

        Ok(Record::from_parts(
            self.batched.clone(),
            columns.into_iter().map(Value::List).collect(),
        ))
    }
}

/// Zero value of a (possibly nested) list item type.
fn default_value(dtype: &DType) -> Value {
    match dtype {
        DType::Scalar(scalar) => Value::default_for(*scalar),
        DType::List(_) => Value::List(Vec::new()),
    }
}

fn pad_column(name: &str, column: &mut [Value], pad: &FieldPad) -> Result<()> {
    let longest = column
        .iter()
        .filter_map(Value::as_list)
        .map(<[Value]>::len)
        .max()
        .unwrap_or(0);
    let target = pad.length.unwrap_or(longest);
    if longest > target {
        return Err(PipelineError::transform(format!(
            "field '{name}' has a value of length {longest}, longer than its padded length {target}"
        )));
    }
    for value in column.iter_mut() {
        if let Value::List(items) = value {
            items.resize(target, pad.value.clone());
        }
    }
    Ok(())
}

#[derive(Debug)]
enum Layout {
    Record(Stacker),
    Pair { features: Stacker, response: Stacker },
}

impl Layout {
    fn new(spec: &ElementSpec, padding: Option<&PaddingSpec>) -> Result<Self> {
        if let Some(padding) = padding {
            for name in padding.named_fields() {
                let known = match spec {
                    ElementSpec::Record(schema) => schema.index_of(name).is_some(),
                    ElementSpec::Pair { features, response } => {
                        features.index_of(name).is_some() || response.index_of(name).is_some()
                    }
                };
                if !known {
                    return Err(PipelineError::field_selection(format!(
                        "padding names unknown field '{name}' (element spec: {spec})"
                    )));
                }
            }
        }
        Ok(match spec {
            ElementSpec::Record(schema) => Self::Record(Stacker::new(schema, padding)?),
            ElementSpec::Pair { features, response } => Self::Pair {
                features: Stacker::new(features, padding)?,
                response: Stacker::new(response, padding)?,
            },
        })
    }

    fn stack(&self, elements: Vec<Element>) -> Result<Element> {
        match self {
            Self::Record(stacker) => {
                let rows = elements
                    .into_iter()
                    .map(|element| {
                        element.into_record().ok_or_else(|| {
                            PipelineError::type_mismatch("batch mixes records and pairs")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Element::Record(stacker.stack(rows)?))
            }
            Self::Pair {
                features: x_stacker,
                response: y_stacker,
            } => {
                let mut xs = Vec::with_capacity(elements.len());
                let mut ys = Vec::with_capacity(elements.len());
                for element in elements {
                    let Element::Pair { features, response } = element else {
                        return Err(PipelineError::type_mismatch("batch mixes records and pairs"));
                    };
                    xs.push(features);
                    ys.push(response);
                }
                Ok(Element::Pair {
                    features: x_stacker.stack(xs)?,
                    response: y_stacker.stack(ys)?,
                })
            }
        }
    }
}

pub(crate) struct BatchOp {
    batch_size: usize,
    drop_remainder: bool,
    padded: bool,
    layout: Arc<Layout>,
}

impl BatchOp {
    pub fn new(
        input: &ElementSpec,
        batch_size: usize,
        drop_remainder: bool,
        padding: Option<&PaddingSpec>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::config("batch_size must be > 0"));
        }
        Ok(Self {
            batch_size,
            drop_remainder,
            padded: padding.is_some(),
            layout: Arc::new(Layout::new(input, padding)?),
        })
    }
}

/// Upper bound on a group's initial allocation; larger groups grow as they fill.
const MAX_PREALLOC: usize = 1024;

struct BatchStream {
    upstream: BoxStream,
    batch_size: usize,
    drop_remainder: bool,
    layout: Arc<Layout>,
    done: bool,
}

impl ElementStream for BatchStream {
    fn next(&mut self) -> Result<Option<Element>> {
        if self.done {
            return Ok(None);
        }
        let mut group = Vec::with_capacity(self.batch_size.min(MAX_PREALLOC));
        while group.len() < self.batch_size {
            match self.upstream.next()? {
                Some(element) => group.push(element),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if group.is_empty() || (group.len() < self.batch_size && self.drop_remainder) {
            return Ok(None);
        }
        self.layout.stack(group).map(Some)
    }
}

impl Operator for BatchOp {
    fn describe(&self) -> String {
        format!(
            "{}({}, drop_remainder={})",
            if self.padded { "padded_batch" } else { "batch" },
            self.batch_size,
            self.drop_remainder
        )
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(BatchStream {
            upstream: inputs[0].open(ctx)?,
            batch_size: self.batch_size,
            drop_remainder: self.drop_remainder,
            layout: self.layout.clone(),
            done: false,
        }))
    }
}

/// Splits list-valued batches back into one element per row.
pub(crate) struct UnbatchOp {
    output: ElementSpec,
}

impl UnbatchOp {
    pub fn new(input: &ElementSpec) -> Result<Self> {
        let output = input.unbatched().ok_or_else(|| {
            PipelineError::type_mismatch(format!(
                "unbatch requires every field to be a list, but upstream yields {input}"
            ))
        })?;
        Ok(Self { output })
    }

    pub fn output(&self) -> &ElementSpec {
        &self.output
    }
}

fn split_record(record: Record, schema: &Arc<Schema>) -> Result<Vec<Record>> {
    let columns: Vec<Vec<Value>> = record
        .into_values()
        .into_iter()
        .map(|value| match value {
            Value::List(items) => Ok(items),
            other => Err(PipelineError::type_mismatch(format!(
                "unbatch expected a list but got {other:?}"
            ))),
        })
        .collect::<Result<_>>()?;

    let rows = columns.first().map_or(0, Vec::len);
    if columns.iter().any(|c| c.len() != rows) {
        return Err(PipelineError::type_mismatch(
            "unbatch received a batch whose fields have different lengths",
        ));
    }

    let mut columns: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
    Ok((0..rows)
        .map(|_| {
            let values = columns.iter_mut().filter_map(Iterator::next).collect();
            Record::from_parts(schema.clone(), values)
        })
        .collect())
}

struct UnbatchStream {
    upstream: BoxStream,
    output: ElementSpec,
    pending: VecDeque<Element>,
}

impl ElementStream for UnbatchStream {
    fn next(&mut self) -> Result<Option<Element>> {
        loop {
            if let Some(element) = self.pending.pop_front() {
                return Ok(Some(element));
            }
            let Some(batch) = self.upstream.next()? else {
                return Ok(None);
            };
            match (batch, &self.output) {
                (Element::Record(record), ElementSpec::Record(schema)) => {
                    self.pending
                        .extend(split_record(record, schema)?.into_iter().map(Element::Record));
                }
                (
                    Element::Pair { features, response },
                    ElementSpec::Pair {
                        features: x_schema,
                        response: y_schema,
                    },
                ) => {
                    let xs = split_record(features, x_schema)?;
                    let ys = split_record(response, y_schema)?;
                    if xs.len() != ys.len() {
                        return Err(PipelineError::type_mismatch(
                            "unbatch received features and response of different lengths",
                        ));
                    }
                    self.pending.extend(
                        xs.into_iter()
                            .zip(ys)
                            .map(|(features, response)| Element::Pair { features, response }),
                    );
                }
                _ => {
                    return Err(PipelineError::type_mismatch(
                        "unbatch received an element of unexpected shape",
                    ))
                }
            }
        }
    }
}

impl Operator for UnbatchOp {
    fn describe(&self) -> String {
        "unbatch".to_string()
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(UnbatchStream {
            upstream: inputs[0].open(ctx)?,
            output: self.output.clone(),
            pending: VecDeque::new(),
        }))
    }
}
