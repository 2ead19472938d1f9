// pipeline-core/src/record.rs

//! Values, schemas and the elements that flow through a pipeline.
//!
//! A [`Record`] is an ordered set of named values sharing one [`Schema`].
//! Pipelines yield [`Element`]s: either a plain record or, after
//! `prepare`, a `(features, response)` pair. Batching does not introduce a
//! new shape: a batch is an element whose fields hold [`Value::List`]s with
//! one entry per stacked record.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Scalar type of a decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Integer,
    Float,
    String,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("string"),
        }
    }
}

/// Type of a field value: a scalar, or a (possibly nested) sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    Scalar(ScalarType),
    List(Box<DType>),
}

impl DType {
    pub fn int() -> Self {
        Self::Scalar(ScalarType::Integer)
    }

    pub fn float() -> Self {
        Self::Scalar(ScalarType::Float)
    }

    pub fn string() -> Self {
        Self::Scalar(ScalarType::String)
    }

    pub fn list_of(inner: DType) -> Self {
        Self::List(Box::new(inner))
    }

    /// The scalar type at the bottom of any list nesting.
    pub fn scalar(&self) -> ScalarType {
        match self {
            Self::Scalar(s) => *s,
            Self::List(inner) => inner.scalar(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Returns true if this value is an instance of `dtype`.
    ///
    /// Empty lists conform to any list type.
    pub fn conforms_to(&self, dtype: &DType) -> bool {
        match (self, dtype) {
            (Self::Int(_), DType::Scalar(ScalarType::Integer))
            | (Self::Float(_), DType::Scalar(ScalarType::Float))
            | (Self::Str(_), DType::Scalar(ScalarType::String)) => true,
            (Self::List(items), DType::List(inner)) => {
                items.iter().all(|item| item.conforms_to(inner))
            }
            _ => false,
        }
    }

    /// The zero value used for padding: `0`, `0.0` or the empty string.
    pub fn default_for(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Integer => Self::Int(0),
            ScalarType::Float => Self::Float(0.0),
            ScalarType::String => Self::Str(String::new()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Ordered list of uniquely named fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema, rejecting duplicate field names.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// A schema with exactly one field.
    pub fn single(field: Field) -> Self {
        Self {
            fields: vec![field],
        }
    }

    /// Shorthand for a schema of scalar fields.
    pub fn scalars<S: AsRef<str>>(fields: &[(S, ScalarType)]) -> Result<Self> {
        Self::new(
            fields
                .iter()
                .map(|(name, ty)| Field::new(name.as_ref(), DType::Scalar(*ty)))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// The schema after stacking values into batches: every field becomes a
    /// list of its previous type.
    pub fn batched(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .map(|f| Field::new(f.name.clone(), DType::list_of(f.dtype.clone())))
                .collect(),
        }
    }

    /// The schema of the records inside a batch, if every field is a list.
    pub fn unbatched(&self) -> Option<Self> {
        let fields = self
            .fields
            .iter()
            .map(|f| match &f.dtype {
                DType::List(inner) => Some(Field::new(f.name.clone(), (**inner).clone())),
                DType::Scalar(_) => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { fields })
    }

    /// Projects the fields at `indices`, in that order.
    pub(crate) fn project(&self, indices: &[usize]) -> Self {
        Self {
            fields: indices.iter().map(|&i| self.fields[i].clone()).collect(),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.dtype)?;
        }
        f.write_str("}")
    }
}

/// An immutable row of values described by a shared schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    /// Creates a record, checking arity and value types against `schema`.
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(PipelineError::type_mismatch(format!(
                "record has {} values but schema {} has {} fields",
                values.len(),
                schema,
                schema.len()
            )));
        }
        for (field, value) in schema.fields().iter().zip(&values) {
            if !value.conforms_to(&field.dtype) {
                return Err(PipelineError::type_mismatch(format!(
                    "field '{}' expects {} but got {:?}",
                    field.name, field.dtype, value
                )));
            }
        }
        Ok(Self { schema, values })
    }

    /// Creates a record whose values are known to match `schema`.
    pub(crate) fn from_parts(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema.names().zip(self.values.iter())
    }
}

/// Description of the elements a dataset yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementSpec {
    Record(Arc<Schema>),
    Pair {
        features: Arc<Schema>,
        response: Arc<Schema>,
    },
}

impl ElementSpec {
    pub fn record(schema: Schema) -> Self {
        Self::Record(Arc::new(schema))
    }

    pub fn pair(features: Schema, response: Schema) -> Self {
        Self::Pair {
            features: Arc::new(features),
            response: Arc::new(response),
        }
    }

    /// The record schema, or a `TypeMismatch` naming `stage` for pairs.
    pub fn expect_record(&self, stage: &str) -> Result<&Arc<Schema>> {
        match self {
            Self::Record(schema) => Ok(schema),
            Self::Pair { .. } => Err(PipelineError::type_mismatch(format!(
                "{stage} requires record elements, but upstream yields (features, response) pairs"
            ))),
        }
    }

    /// The spec after batching.
    pub fn batched(&self) -> Self {
        match self {
            Self::Record(schema) => Self::Record(Arc::new(schema.batched())),
            Self::Pair { features, response } => Self::Pair {
                features: Arc::new(features.batched()),
                response: Arc::new(response.batched()),
            },
        }
    }

    /// The spec after unbatching, if every field is list-typed.
    pub fn unbatched(&self) -> Option<Self> {
        Some(match self {
            Self::Record(schema) => Self::Record(Arc::new(schema.unbatched()?)),
            Self::Pair { features, response } => Self::Pair {
                features: Arc::new(features.unbatched()?),
                response: Arc::new(response.unbatched()?),
            },
        })
    }

    /// Checks that `element` has this shape and its values have these types.
    pub fn check(&self, element: &Element) -> Result<()> {
        match (self, element) {
            (Self::Record(schema), Element::Record(record)) => check_record(schema, record),
            (Self::Pair { features, response }, Element::Pair { features: x, response: y }) => {
                check_record(features, x)?;
                check_record(response, y)
            }
            (Self::Record(_), Element::Pair { .. }) => Err(PipelineError::type_mismatch(
                "expected a record element but got a (features, response) pair",
            )),
            (Self::Pair { .. }, Element::Record(_)) => Err(PipelineError::type_mismatch(
                "expected a (features, response) pair but got a record element",
            )),
        }
    }
}

fn check_record(schema: &Schema, record: &Record) -> Result<()> {
    if record.schema.as_ref() == schema {
        return Ok(());
    }
    // Same names and types under a different allocation are fine; anything
    // else is reported field by field.
    if record.len() != schema.len() {
        return Err(PipelineError::type_mismatch(format!(
            "expected {} fields {} but got {}",
            schema.len(),
            schema,
            record.schema
        )));
    }
    for (field, (name, value)) in schema.fields().iter().zip(record.iter()) {
        if field.name != name {
            return Err(PipelineError::type_mismatch(format!(
                "expected field '{}' but got '{}'",
                field.name, name
            )));
        }
        if !value.conforms_to(&field.dtype) {
            return Err(PipelineError::type_mismatch(format!(
                "field '{}' expects {} but got {:?}",
                field.name, field.dtype, value
            )));
        }
    }
    Ok(())
}

impl fmt::Display for ElementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(schema) => write!(f, "{schema}"),
            Self::Pair { features, response } => write!(f, "(x: {features}, y: {response})"),
        }
    }
}

/// One item yielded by a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Record(Record),
    Pair { features: Record, response: Record },
}

/// A batch is an element whose field values are stacked lists.
pub type Batch = Element;

impl Element {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Pair { .. } => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Pair { .. } => None,
        }
    }

    pub fn features(&self) -> Option<&Record> {
        match self {
            Self::Pair { features, .. } => Some(features),
            Self::Record(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Record> {
        match self {
            Self::Pair { response, .. } => Some(response),
            Self::Record(_) => None,
        }
    }

    /// Number of rows in a batch: the length of the first list-valued field.
    ///
    /// Returns `None` for unbatched elements.
    pub fn batch_len(&self) -> Option<usize> {
        let record = match self {
            Self::Record(record) => record,
            Self::Pair { features, .. } => features,
        };
        record.values().first().and_then(|v| v.as_list()).map(<[Value]>::len)
    }
}

impl From<Record> for Element {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}
