//! Script-side values
//!
//! [`Value`] models the dynamic values a script exchanges with the glue, and
//! [`ScriptFn`] models a script callable. Callables are compared by identity,
//! never by content.

use crate::error::GlueResult;
use crate::glue::Scope;
use crate::handle::Handle;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Callables
// ============================================================================

type CallableBody = dyn Fn(&mut Scope, Vec<Value>) -> GlueResult<Value> + Send + Sync;

/// Callable body shared by every [`ScriptFn`] clone
pub struct ScriptFnInner {
    name: String,
    body: Box<CallableBody>,
}

/// Reference-counted script callable
#[derive(Clone)]
pub struct ScriptFn(pub(crate) Arc<ScriptFnInner>);

impl ScriptFn {
    /// Wrap a closure as a script callable
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Scope, Vec<Value>) -> GlueResult<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(ScriptFnInner {
            name: name.into(),
            body: Box::new(body),
        }))
    }

    /// Callable name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Invoke directly. Dispatch goes through [`Scope::invoke`], which also
    /// contains panics.
    pub fn call(&self, scope: &mut Scope, args: Vec<Value>) -> GlueResult<Value> {
        (self.0.body)(scope, args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ScriptFn) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references, including ones held by data leaves
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for ScriptFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name())
    }
}

// ============================================================================
// Values
// ============================================================================

/// Dynamic script value
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Arbitrary-width integer; widths above 64 bits do not cross the bridge
    Int(i128),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Sequence
    List(Vec<Value>),
    /// String-keyed mapping
    Dict(BTreeMap<String, Value>),
    /// Raw bytes, not representable as structured data
    Bytes(Vec<u8>),
    /// Callable
    Callable(ScriptFn),
    /// Bridged runtime object
    Handle(Handle),
}

impl Value {
    /// Build a dict from key/value pairs
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Bytes(_) => "bytes",
            Value::Callable(_) => "callable",
            Value::Handle(_) => "handle",
        }
    }

    /// Check for none
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Extract integer
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract sequence
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Extract mapping
    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Extract callable
    pub fn as_callable(&self) -> Option<&ScriptFn> {
        match self {
            Value::Callable(f) => Some(f),
            _ => None,
        }
    }

    /// Extract handle
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Look up a dict member
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|map| map.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i128)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i as i128)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i as i128)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ScriptFn> for Value {
    fn from(f: ScriptFn) -> Self {
        Value::Callable(f)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Dict(map) => f.debug_map().entries(map).finish(),
            other => write!(f, "{}", other),
        }
    }
}

/// Plain rendering used by the logging call-outs: strings print raw,
/// containers print their elements in debug form.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Dict(_) => write!(f, "{:?}", self),
            Value::Bytes(b) => write!(f, "<bytes len={}>", b.len()),
            Value::Callable(c) => write!(f, "{:?}", c),
            Value::Handle(h) => write!(f, "{}", h),
        }
    }
}
