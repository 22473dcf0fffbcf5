//! Runtime values exchanged with storage backends.

use serde_json::Number;

/// A dynamically-typed value stored in, or bound against, a backend.
///
/// `Value` deliberately covers only the types the schema layer knows about:
/// integers (INT/BIGINT share [`Value::Int`]), strings, JSON documents, and
/// booleans. [`Value::Array`] never appears in a stored row; it is only
/// meaningful inside predicates, where an EQ against an array lowers to a
/// membership test.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL / absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer (covers both INT and BIGINT fields).
    Int(i64),
    /// UTF-8 string.
    Text(String),
    /// Arbitrary JSON document (stored serialized).
    Json(serde_json::Value),
    /// A list of values; predicate-only (EQ array => IN).
    Array(Vec<Value>),
}

impl Value {
    /// Whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract an `i64` if this is an integer value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an `i64`, accepting the text representation drivers in text
    /// protocols hand back for numeric columns.
    #[must_use]
    pub fn coerce_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Extract a `bool` if this is a boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a string slice if this is a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Human-readable name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// Convert into a `serde_json::Value` (the file backend's disk shape).
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(Number::from(i)),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Json(j) => j,
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
        }
    }

    /// Build a `Value` from a `serde_json::Value` read off disk.
    ///
    /// Integral numbers become [`Value::Int`]; everything the schema layer has
    /// no scalar for (floats, objects) is carried as [`Value::Json`] so that
    /// round-tripping a row never loses data.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Json(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            other @ serde_json::Value::Object(_) => Value::Json(other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Json(j) => write!(f, "{j}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
