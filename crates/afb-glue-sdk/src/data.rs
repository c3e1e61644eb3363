//! Structured data exchanged across the bridge
//!
//! [`Data`] is the generic object/array/scalar/null tree used for all value
//! exchange between the scripting layer and the binder runtime. A scripting
//! callable travels as an explicit [`Data::Callable`] leaf: it is the only
//! variant allowed to carry an executable reference through configuration
//! parsing, and it renders as [`CALLABLE_MARKER`] when written out as JSON.

use serde_json::{Map, Number, Value as JsonValue};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Text written in place of a callable leaf when data is rendered as JSON
pub const CALLABLE_MARKER: &str = "<callable>";

// ============================================================================
// Callable leaf
// ============================================================================

/// Opaque, reference-counted handle on a scripting-side callable.
///
/// Cloning a `CallableRef` increments the count on the underlying callable;
/// the owning layer recovers the exact object with [`CallableRef::downcast`].
#[derive(Clone)]
pub struct CallableRef {
    label: Arc<str>,
    target: Arc<dyn Any + Send + Sync>,
}

impl CallableRef {
    /// Wrap a callable object
    pub fn new(label: impl Into<Arc<str>>, target: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            label: label.into(),
            target,
        }
    }

    /// Human readable label, usually the callable's name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Recover the callable as its concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.target).downcast::<T>().ok()
    }

    /// Whether two references point at the same callable
    pub fn ptr_eq(&self, other: &CallableRef) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.target) as *const (),
            Arc::as_ptr(&other.target) as *const (),
        )
    }
}

impl fmt::Debug for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallableRef({})", self.label)
    }
}

// ============================================================================
// Data tree
// ============================================================================

/// Structured data value
#[derive(Clone, Default)]
pub enum Data {
    /// Null / absent
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer above `i64::MAX`
    Uint(u64),
    /// Double precision float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered sequence
    Array(Vec<Data>),
    /// String-keyed mapping
    Object(BTreeMap<String, Data>),
    /// Scripting callable reference
    Callable(CallableRef),
}

impl Data {
    /// Build an object from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Data)>,
    {
        Data::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Get type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "bool",
            Data::Int(_) | Data::Uint(_) => "int",
            Data::Float(_) => "float",
            Data::String(_) => "string",
            Data::Array(_) => "array",
            Data::Object(_) => "object",
            Data::Callable(_) => "callable",
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// Extract boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract a signed integer, including unsigned values that fit
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Int(i) => Some(*i),
            Data::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Extract an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Data::Int(i) => u64::try_from(*i).ok(),
            Data::Uint(u) => Some(*u),
            _ => None,
        }
    }

    /// Extract a float, widening integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Int(i) => Some(*i as f64),
            Data::Uint(u) => Some(*u as f64),
            Data::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract array elements
    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Extract object entries
    pub fn as_object(&self) -> Option<&BTreeMap<String, Data>> {
        match self {
            Data::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Extract callable reference
    pub fn as_callable(&self) -> Option<&CallableRef> {
        match self {
            Data::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Look up an object member
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Look up a string object member
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Data::as_str)
    }

    /// Render as a JSON value; callable leaves become [`CALLABLE_MARKER`]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Data::Null => JsonValue::Null,
            Data::Bool(b) => JsonValue::Bool(*b),
            Data::Int(i) => JsonValue::Number(Number::from(*i)),
            Data::Uint(u) => JsonValue::Number(Number::from(*u)),
            Data::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Data::String(s) => JsonValue::String(s.clone()),
            Data::Array(items) => JsonValue::Array(items.iter().map(Data::to_json).collect()),
            Data::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(out)
            }
            Data::Callable(_) => JsonValue::String(CALLABLE_MARKER.to_string()),
        }
    }
}

impl From<JsonValue> for Data {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Data::Null,
            JsonValue::Bool(b) => Data::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Data::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Data::Uint(u)
                } else {
                    Data::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Data::String(s),
            JsonValue::Array(items) => Data::Array(items.into_iter().map(Data::from).collect()),
            JsonValue::Object(map) => {
                Data::Object(map.into_iter().map(|(k, v)| (k, Data::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<i64> for Data {
    fn from(i: i64) -> Self {
        Data::Int(i)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Bool(b)
    }
}

impl From<f64> for Data {
    fn from(f: f64) -> Self {
        Data::Float(f)
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Null, Data::Null) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Int(a), Data::Int(b)) => a == b,
            (Data::Uint(a), Data::Uint(b)) => a == b,
            (Data::Int(a), Data::Uint(b)) | (Data::Uint(b), Data::Int(a)) => {
                u64::try_from(*a).map_or(false, |a| a == *b)
            }
            (Data::Float(a), Data::Float(b)) => a == b,
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Array(a), Data::Array(b)) => a == b,
            (Data::Object(a), Data::Object(b)) => a == b,
            (Data::Callable(a), Data::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Callable(c) => write!(f, "{:?}", c),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
