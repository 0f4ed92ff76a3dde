//! Query-set algebra
//!
//! A [`QuerySet`] is a bag of query parameters (filters, a sort clause,
//! paging clauses). This module defines how a query set is turned into a
//! canonical registry key, and the [`Algebra`] contract used to decide
//! whether a record belongs to a query and where it sorts.
//!
//! The predicate language is pluggable. [`DefaultAlgebra`] implements a
//! simple one: every non-reserved parameter is an equality filter, and a
//! sort clause of the form `"field"` / `"field desc"` orders the results.
//! Object-valued filters (operator clauses) are rejected.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::AlgebraError;
use crate::instance::{Instance, Props, RecordId};

/// Order-insensitive description of a query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerySet {
    params: Props,
}

impl QuerySet {
    /// An empty query set (matches every record)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_props(params: Props) -> Self {
        Self { params }
    }

    /// Build a query set from a JSON object
    pub fn from_value(value: Value) -> Result<Self, AlgebraError> {
        match value {
            Value::Object(params) => Ok(Self { params }),
            other => Err(AlgebraError::MalformedQuery(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Add a clause
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(&self) -> &Props {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Canonical registry key of this query set
    pub fn key(&self) -> CanonicalKey {
        serialize(self)
    }
}

impl PartialEq for QuerySet {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QuerySet {}

/// Serialized form of a query set, identical for structurally equal sets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a query set with its keys sorted lexicographically
pub fn serialize(set: &QuerySet) -> CanonicalKey {
    let sorted = canonicalize(&Value::Object(set.params.clone()));
    CanonicalKey(sorted.to_string())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Props::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Position of the record with identity `id` in `items`
pub fn index_of(items: &[Instance], id: &RecordId) -> Option<usize> {
    items
        .iter()
        .position(|item| item.id().as_ref() == Some(id))
}

/// Evaluation contract for query sets
///
/// Implementations must be pure: the same set and properties always give
/// the same answer, and evaluation has no side effects.
pub trait Algebra: Send + Sync {
    /// Whether a record with `props` is a member of `set`
    fn belongs_to(&self, set: &QuerySet, props: &Props) -> Result<bool, AlgebraError>;

    /// Index at which `props` should be inserted into the sorted `items`
    ///
    /// Returns `None` when `set` defines no ordering; callers append.
    fn locate(
        &self,
        set: &QuerySet,
        items: &[Props],
        props: &Props,
    ) -> Result<Option<usize>, AlgebraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SortSpec {
    field: String,
    descending: bool,
}

/// Equality filters plus a single-field sort clause
#[derive(Debug, Clone)]
pub struct DefaultAlgebra {
    sort_param: String,
    paging_params: Vec<String>,
}

impl Default for DefaultAlgebra {
    fn default() -> Self {
        Self {
            sort_param: "sort".to_string(),
            paging_params: ["start", "end", "limit", "offset"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DefaultAlgebra {
    pub fn new(sort_param: impl Into<String>, paging_params: Vec<String>) -> Self {
        Self {
            sort_param: sort_param.into(),
            paging_params,
        }
    }

    /// Reserved parameter names from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sort_param.clone(), config.paging_params.clone())
    }

    fn is_reserved(&self, key: &str) -> bool {
        key == self.sort_param || self.paging_params.iter().any(|p| p == key)
    }

    fn sort_spec(&self, set: &QuerySet) -> Result<Option<SortSpec>, AlgebraError> {
        let clause = match set.get(&self.sort_param) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(AlgebraError::MalformedQuery(format!(
                    "sort clause must be a string, got {}",
                    other
                )))
            }
        };

        let mut parts = clause.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| AlgebraError::MalformedQuery("empty sort clause".to_string()))?;
        let descending = match parts.next() {
            None => false,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => false,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => true,
            Some(dir) => {
                return Err(AlgebraError::MalformedQuery(format!(
                    "unknown sort direction '{}'",
                    dir
                )))
            }
        };
        if parts.next().is_some() {
            return Err(AlgebraError::MalformedQuery(format!(
                "unexpected tokens in sort clause '{}'",
                clause
            )));
        }

        Ok(Some(SortSpec {
            field: field.to_string(),
            descending,
        }))
    }
}

impl Algebra for DefaultAlgebra {
    fn belongs_to(&self, set: &QuerySet, props: &Props) -> Result<bool, AlgebraError> {
        for (clause, expected) in set.params() {
            if self.is_reserved(clause) {
                continue;
            }
            if expected.is_object() {
                return Err(AlgebraError::Predicate {
                    clause: clause.clone(),
                    details: "operator clauses are not supported".to_string(),
                });
            }
            let Some(actual) = props.get(clause) else {
                return Ok(false);
            };
            let matched = match expected {
                Value::Array(options) => options.iter().any(|o| values_equal(o, actual)),
                other => values_equal(other, actual),
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn locate(
        &self,
        set: &QuerySet,
        items: &[Props],
        props: &Props,
    ) -> Result<Option<usize>, AlgebraError> {
        let Some(spec) = self.sort_spec(set)? else {
            return Ok(None);
        };

        let key = sort_key(props, &spec.field)?;
        for (index, item) in items.iter().enumerate() {
            let mut ordering = compare_values(key, sort_key(item, &spec.field)?);
            if spec.descending {
                ordering = ordering.reverse();
            }
            // Equal keys keep arrival order: insert after them.
            if ordering == Ordering::Less {
                return Ok(Some(index));
            }
        }
        Ok(Some(items.len()))
    }
}

static NULL: Value = Value::Null;

fn sort_key<'a>(props: &'a Props, field: &str) -> Result<&'a Value, AlgebraError> {
    match props.get(field) {
        None => Ok(&NULL),
        Some(Value::Array(_)) | Some(Value::Object(_)) => Err(AlgebraError::Unorderable {
            field: field.to_string(),
            details: "composite values have no order".to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
