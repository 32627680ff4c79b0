//! Canonical value representation shared by rows, expressions, indexes and the
//! storage gateway.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{PenumbraError, RecordId, Result};

/// Typed value tagged with explicit type information so serialized rows stay
/// unambiguous.
///
/// Equality and ordering follow [`Value::total_cmp`], a total order usable for
/// sorting and index keys. Predicate semantics (null never matches, numbers
/// compare across int/float) live in [`Value::compare`] and [`Value::equals`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal, also the value of an absent property.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Milliseconds since Unix epoch in UTC.
    DateTime(i64),
    /// Document nested inside a record, without identity of its own.
    Embedded(BTreeMap<String, Value>),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed mapping.
    Map(BTreeMap<String, Value>),
    /// Reference to a stored record.
    Link(RecordId),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::DateTime(_) => 4,
            Value::Link(_) => 5,
            Value::List(_) => 6,
            Value::Embedded(_) => 7,
            Value::Map(_) => 8,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Embedded(_) => "embedded",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Link(_) => "link",
        }
    }

    /// Total order across all variants. Nulls sort first, numbers compare by
    /// magnitude regardless of representation.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let (left, right) = (self.rank(), other.rank());
        if left != right {
            return left.cmp(&right);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Embedded(a), Value::Embedded(b)) | (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (a, b) => match numeric_cmp(a, b) {
                Some(Ordering::Equal) => {
                    // Int sorts before an equal Float so the order stays total.
                    matches!(a, Value::Float(_)).cmp(&matches!(b, Value::Float(_)))
                }
                Some(ord) => ord,
                None => Ordering::Equal,
            },
        }
    }

    /// Predicate comparison: `None` when either side is null, an error when
    /// the two values have no meaningful order.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        if let Some(ord) = numeric_cmp(self, other) {
            return Ok(Some(ord));
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
            (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
            (Value::DateTime(a), Value::DateTime(b)) => Ok(Some(a.cmp(b))),
            (Value::Link(a), Value::Link(b)) => Ok(Some(a.cmp(b))),
            _ => Err(PenumbraError::TypeMismatch(format!(
                "cannot order {} against {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Predicate equality: null never equals anything, numbers compare by
    /// magnitude, values of unrelated types are simply unequal.
    pub fn equals(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        if let Some(ord) = numeric_cmp(self, other) {
            return ord == Ordering::Equal;
        }
        self.rank() == other.rank() && self.total_cmp(other) == Ordering::Equal
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Only a boolean `true` satisfies a predicate.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<RecordId> {
        match self {
            Value::Link(rid) => Some(*rid),
            _ => None,
        }
    }

    /// Elements of a collection value; scalars are treated as a single element.
    pub fn elements(&self) -> Vec<&Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items.iter().collect(),
            Value::Map(map) | Value::Embedded(map) => map.values().collect(),
            other => vec![other],
        }
    }

    /// Renders the value as plain JSON, without type tags.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(*v),
            Value::Int(v) => Json::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(v) => Json::String(v.clone()),
            Value::DateTime(v) => Json::from(*v),
            Value::Link(rid) => Json::String(rid.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Embedded(map) | Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => Some(x.total_cmp(y)),
        (Value::Int(x), Value::Float(y)) => Some((*x as f64).total_cmp(y)),
        (Value::Float(x), Value::Int(y)) => Some(x.total_cmp(&(*y as f64))),
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "datetime({v})"),
            Value::Link(rid) => write!(f, "{rid}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Embedded(map) | Value::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Value::Link(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
