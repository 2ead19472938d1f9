// pipeline-core/src/dataset/transform.rs

//! Element-wise transform stages: map, filter and prepare.

use std::collections::HashSet;
use std::sync::Arc;

use super::parallel::{OrderedMap, WorkFn};
use super::stream::{BoxStream, ElementStream, IterContext};
use super::{Dataset, Operator};
use crate::error::{PipelineError, Result};
use crate::record::{Element, ElementSpec, Record, Schema};

/// A user-supplied element function with a declared output spec.
pub trait Transform: Send + Sync {
    /// Name shown in pipeline descriptions.
    fn name(&self) -> &str;

    /// The spec of the elements produced from inputs of spec `input`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the transform cannot accept `input`.
    fn output_spec(&self, input: &ElementSpec) -> Result<ElementSpec>;

    /// Applies the transform to one element.
    fn apply(&self, element: Element) -> Result<Element>;
}

/// A [`Transform`] backed by a closure.
pub struct FnTransform<F> {
    name: String,
    input: Option<ElementSpec>,
    output: Option<ElementSpec>,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Element) -> Result<Element> + Send + Sync,
{
    /// A transform producing elements of spec `output`.
    pub fn new(name: impl Into<String>, output: ElementSpec, func: F) -> Self {
        Self {
            name: name.into(),
            input: None,
            output: Some(output),
            func,
        }
    }

    /// A transform whose output has the same spec as its input.
    pub fn preserving(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            input: None,
            output: None,
            func,
        }
    }

    /// Declares the input spec; building on an upstream with any other spec
    /// fails with `TypeMismatch`.
    #[must_use]
    pub fn with_input(mut self, input: ElementSpec) -> Self {
        self.input = Some(input);
        self
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(Element) -> Result<Element> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output_spec(&self, input: &ElementSpec) -> Result<ElementSpec> {
        if let Some(declared) = &self.input {
            if declared != input {
                return Err(PipelineError::type_mismatch(format!(
                    "transform '{}' expects input {declared} but upstream yields {input}",
                    self.name
                )));
            }
        }
        Ok(self.output.clone().unwrap_or_else(|| input.clone()))
    }

    fn apply(&self, element: Element) -> Result<Element> {
        (self.func)(element)
    }
}

pub(crate) struct MapOp {
    transform: Arc<dyn Transform>,
    output: ElementSpec,
    parallelism: usize,
}

impl MapOp {
    pub fn new(
        transform: Arc<dyn Transform>,
        input: &ElementSpec,
        parallelism: usize,
    ) -> Result<Self> {
        if parallelism == 0 {
            return Err(PipelineError::config("num_parallel_calls must be > 0"));
        }
        let output = transform.output_spec(input)?;
        Ok(Self {
            transform,
            output,
            parallelism,
        })
    }

    pub fn output(&self) -> &ElementSpec {
        &self.output
    }
}

impl Operator for MapOp {
    fn describe(&self) -> String {
        format!("map({}, parallel={})", self.transform.name(), self.parallelism)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        let upstream = inputs[0].open(ctx)?;
        let transform = self.transform.clone();
        let output = self.output.clone();
        let func: WorkFn<Element> = Arc::new(move |element: Element| {
            let result = transform.apply(element)?;
            output.check(&result).map_err(|e| {
                PipelineError::type_mismatch(format!(
                    "transform '{}' produced an element that does not match its declared output: {e}",
                    transform.name()
                ))
            })?;
            Ok(result)
        });
        Ok(Box::new(OrderedMap::new("map", upstream, func, self.parallelism)))
    }
}

pub(crate) type Predicate = Arc<dyn Fn(&Element) -> bool + Send + Sync>;

pub(crate) struct FilterOp {
    pub predicate: Predicate,
}

struct FilterStream {
    upstream: BoxStream,
    predicate: Predicate,
}

impl ElementStream for FilterStream {
    fn next(&mut self) -> Result<Option<Element>> {
        while let Some(element) = self.upstream.next()? {
            if (self.predicate)(&element) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }
}

impl Operator for FilterOp {
    fn describe(&self) -> String {
        "filter".to_string()
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        Ok(Box::new(FilterStream {
            upstream: inputs[0].open(ctx)?,
            predicate: self.predicate.clone(),
        }))
    }
}

/// Selects fields by name, positively or negatively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// Exactly these fields, in this order.
    Include(Vec<String>),
    /// Every field except these, in schema order.
    Exclude(Vec<String>),
}

impl FieldSelection {
    pub fn include<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(names.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(names.into_iter().map(Into::into).collect())
    }

    /// Resolves the selection to field indices of `schema`.
    ///
    /// # Errors
    ///
    /// Returns `FieldSelection` if a name is unknown or repeated, or if the
    /// selection is empty.
    pub fn resolve(&self, schema: &Schema) -> Result<Vec<usize>> {
        let names = match self {
            Self::Include(names) | Self::Exclude(names) => names,
        };
        let mut seen = HashSet::with_capacity(names.len());
        let mut named = Vec::with_capacity(names.len());
        for name in names {
            let idx = schema.index_of(name).ok_or_else(|| {
                PipelineError::field_selection(format!(
                    "unknown field '{name}' (available: {schema})"
                ))
            })?;
            if !seen.insert(idx) {
                return Err(PipelineError::field_selection(format!(
                    "field '{name}' selected more than once"
                )));
            }
            named.push(idx);
        }

        let indices = match self {
            Self::Include(_) => named,
            Self::Exclude(_) => (0..schema.len()).filter(|i| !seen.contains(i)).collect(),
        };
        if indices.is_empty() {
            return Err(PipelineError::field_selection(format!(
                "selection {self:?} selects no fields"
            )));
        }
        Ok(indices)
    }
}

/// Splits records into `(features, response)` pairs.
#[derive(Clone)]
pub(crate) struct PrepareOp {
    x: Vec<usize>,
    y: Vec<usize>,
    x_schema: Arc<Schema>,
    y_schema: Arc<Schema>,
}

impl PrepareOp {
    /// Resolves both selections against `input`. Without an explicit `x`,
    /// the features are every field not selected as response.
    pub fn new(
        input: &ElementSpec,
        x: Option<&FieldSelection>,
        y: &FieldSelection,
    ) -> Result<Self> {
        let schema = input.expect_record("prepare")?;
        let y_idx = y.resolve(schema)?;
        let x_idx = match x {
            Some(selection) => selection.resolve(schema)?,
            None => {
                let excluded: Vec<String> =
                    y_idx.iter().map(|&i| schema.fields()[i].name.clone()).collect();
                FieldSelection::Exclude(excluded).resolve(schema)?
            }
        };

        let overlap: Vec<&str> = x_idx
            .iter()
            .filter(|i| y_idx.contains(i))
            .map(|&i| schema.fields()[i].name.as_str())
            .collect();
        if !overlap.is_empty() {
            return Err(PipelineError::field_selection(format!(
                "fields {overlap:?} are selected as both features and response"
            )));
        }

        Ok(Self {
            x_schema: Arc::new(schema.project(&x_idx)),
            y_schema: Arc::new(schema.project(&y_idx)),
            x: x_idx,
            y: y_idx,
        })
    }

    pub fn output(&self) -> ElementSpec {
        ElementSpec::Pair {
            features: self.x_schema.clone(),
            response: self.y_schema.clone(),
        }
    }

    fn split(&self, element: Element) -> Result<Element> {
        let Element::Record(record) = element else {
            return Err(PipelineError::type_mismatch(
                "prepare received a (features, response) pair",
            ));
        };
        let mut values: Vec<_> = record.into_values().into_iter().map(Some).collect();
        let mut take = |indices: &[usize]| -> Vec<_> {
            indices.iter().filter_map(|&i| values.get_mut(i)?.take()).collect()
        };
        let features = take(&self.x);
        let response = take(&self.y);
        Ok(Element::Pair {
            features: Record::from_parts(self.x_schema.clone(), features),
            response: Record::from_parts(self.y_schema.clone(), response),
        })
    }
}

impl Operator for PrepareOp {
    fn describe(&self) -> String {
        format!("prepare(x={}, y={})", self.x_schema, self.y_schema)
    }

    fn open(&self, inputs: &[Dataset], ctx: &IterContext) -> Result<BoxStream> {
        let upstream = inputs[0].open(ctx)?;
        let op = self.clone();
        let func: WorkFn<Element> = Arc::new(move |element: Element| op.split(element));
        Ok(Box::new(OrderedMap::new("prepare", upstream, func, 1)))
    }
}
