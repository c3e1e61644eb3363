//! Value bridge
//!
//! Converts script [`Value`]s to structured [`Data`] and back, and native
//! payloads to script values. Callables cross as [`Data::Callable`] leaves
//! holding one extra reference on the callable, so the exact object can be
//! recovered on the other side.
//!
//! Integer policy: values fitting `i64` become [`Data::Int`], values fitting
//! `u64` become [`Data::Uint`], anything wider fails. Native integers of any
//! width widen to [`Value::Int`]; nothing is coerced to bool.

use crate::value::{ScriptFn, ScriptFnInner, Value};
use afb_glue_sdk::{CallableRef, Data, NativeData};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Maximum nesting depth accepted in either direction
pub const MAX_DEPTH: usize = 64;

/// Errors raised while converting values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// Value kind has no structured representation
    #[error("value of type {0} cannot be converted to structured data")]
    Unsupported(&'static str),

    /// Integer outside the 64-bit range
    #[error("integer {0} does not fit a 64-bit structured integer")]
    IntegerOverflow(i128),

    /// Callable leaf was not produced by this bridge
    #[error("callable '{0}' does not belong to this interpreter")]
    ForeignCallable(String),

    /// Native payload type has no script representation
    #[error("unsupported native data type {0}")]
    UnsupportedNative(String),

    /// Serialized payload is not valid JSON
    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    /// Nesting deeper than [`MAX_DEPTH`]
    #[error("maximum conversion depth exceeded")]
    MaxDepthExceeded,
}

// ============================================================================
// Script value -> structured data
// ============================================================================

/// Convert a script value to structured data
pub fn to_data(value: &Value) -> Result<Data, ConversionError> {
    to_data_recursive(value, 0)
}

fn to_data_recursive(value: &Value, depth: usize) -> Result<Data, ConversionError> {
    if depth > MAX_DEPTH {
        return Err(ConversionError::MaxDepthExceeded);
    }

    match value {
        Value::None => Ok(Data::Null),
        Value::Bool(b) => Ok(Data::Bool(*b)),
        Value::Int(i) => int_to_data(*i),
        Value::Float(f) => Ok(Data::Float(*f)),
        Value::Str(s) => Ok(Data::String(s.clone())),
        Value::List(items) => items
            .iter()
            .map(|item| to_data_recursive(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Data::Array),
        Value::Dict(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, item) in map {
                out.insert(key.clone(), to_data_recursive(item, depth + 1)?);
            }
            Ok(Data::Object(out))
        }
        Value::Callable(f) => Ok(Data::Callable(callable_leaf(f))),
        Value::Bytes(_) | Value::Handle(_) => Err(ConversionError::Unsupported(value.type_name())),
    }
}

fn int_to_data(i: i128) -> Result<Data, ConversionError> {
    if let Ok(small) = i64::try_from(i) {
        Ok(Data::Int(small))
    } else if let Ok(wide) = u64::try_from(i) {
        Ok(Data::Uint(wide))
    } else {
        Err(ConversionError::IntegerOverflow(i))
    }
}

/// Wrap a callable as a data leaf, taking one reference on it
pub fn callable_leaf(f: &ScriptFn) -> CallableRef {
    let target: Arc<dyn Any + Send + Sync> = Arc::clone(&f.0) as Arc<dyn Any + Send + Sync>;
    CallableRef::new(f.name(), target)
}

/// Recover the script callable behind a data leaf
pub fn callable_from_leaf(leaf: &CallableRef) -> Result<ScriptFn, ConversionError> {
    leaf.downcast::<ScriptFnInner>()
        .map(ScriptFn)
        .ok_or_else(|| ConversionError::ForeignCallable(leaf.label().to_string()))
}

// ============================================================================
// Structured data -> script value
// ============================================================================

/// Convert structured data to a script value
pub fn from_data(data: &Data) -> Result<Value, ConversionError> {
    from_data_recursive(data, 0)
}

fn from_data_recursive(data: &Data, depth: usize) -> Result<Value, ConversionError> {
    if depth > MAX_DEPTH {
        return Err(ConversionError::MaxDepthExceeded);
    }

    match data {
        Data::Null => Ok(Value::None),
        Data::Bool(b) => Ok(Value::Bool(*b)),
        Data::Int(i) => Ok(Value::Int(*i as i128)),
        Data::Uint(u) => Ok(Value::Int(*u as i128)),
        Data::Float(f) => Ok(Value::Float(*f)),
        Data::String(s) => Ok(Value::Str(s.clone())),
        Data::Array(items) => items
            .iter()
            .map(|item| from_data_recursive(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Data::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, item) in map {
                out.insert(key.clone(), from_data_recursive(item, depth + 1)?);
            }
            Ok(Value::Dict(out))
        }
        Data::Callable(leaf) => callable_from_leaf(leaf).map(Value::Callable),
    }
}

// ============================================================================
// Native payloads
// ============================================================================

/// Convert a script value to an outgoing native payload
pub fn to_native(value: &Value) -> Result<NativeData, ConversionError> {
    to_data(value).map(NativeData::Tree)
}

/// Convert a list of script values to native payloads
pub fn to_native_args(values: &[Value]) -> Result<Vec<NativeData>, ConversionError> {
    values.iter().map(to_native).collect()
}

/// Convert an incoming native payload to a script value.
///
/// An empty string payload stands for "no value" and maps to `None`.
pub fn from_native(data: &NativeData) -> Result<Value, ConversionError> {
    let value = match data {
        NativeData::Stringz(s) if s.is_empty() => Value::None,
        NativeData::Stringz(s) => Value::Str(s.clone()),
        NativeData::Bool(b) => Value::Bool(*b),
        NativeData::I8(i) => Value::Int(*i as i128),
        NativeData::U8(i) => Value::Int(*i as i128),
        NativeData::I16(i) => Value::Int(*i as i128),
        NativeData::U16(i) => Value::Int(*i as i128),
        NativeData::I32(i) => Value::Int(*i as i128),
        NativeData::U32(i) => Value::Int(*i as i128),
        NativeData::I64(i) => Value::Int(*i as i128),
        NativeData::U64(i) => Value::Int(*i as i128),
        NativeData::Float(f) => Value::Float(*f as f64),
        NativeData::Double(f) => Value::Float(*f),
        NativeData::Json(text) => {
            let parsed: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| ConversionError::InvalidJson(e.to_string()))?;
            from_data(&Data::from(parsed))?
        }
        NativeData::Tree(tree) => from_data(tree)?,
        NativeData::Opaque { type_name } => {
            return Err(ConversionError::UnsupportedNative(type_name.clone()))
        }
    };
    Ok(value)
}

/// Convert a list of native payloads to script values
pub fn from_native_args(data: &[NativeData]) -> Result<Vec<Value>, ConversionError> {
    data.iter().map(from_native).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GlueResult;

    fn sample_fn(name: &str) -> ScriptFn {
        ScriptFn::new(name, |_, _| -> GlueResult<Value> { Ok(Value::None) })
    }

    #[test]
    fn test_round_trip_scalars_and_containers() {
        let value = Value::dict([
            ("none", Value::None),
            ("flag", Value::Bool(true)),
            ("small", Value::Int(-42)),
            ("wide", Value::Int(u64::MAX as i128)),
            ("ratio", Value::Float(2.5)),
            ("name", Value::from("demo")),
            (
                "nested",
                Value::List(vec![Value::Int(1), Value::dict([("k", Value::from("v"))])]),
            ),
        ]);

        let data = to_data(&value).unwrap();
        assert_eq!(data.get("wide"), Some(&Data::Uint(u64::MAX)));
        assert_eq!(from_data(&data).unwrap(), value);
    }

    #[test]
    fn test_integer_overflow_fails() {
        let too_wide = Value::Int(u64::MAX as i128 + 1);
        assert_eq!(
            to_data(&too_wide),
            Err(ConversionError::IntegerOverflow(u64::MAX as i128 + 1))
        );
        assert!(matches!(
            to_data(&Value::Int(i64::MIN as i128 - 1)),
            Err(ConversionError::IntegerOverflow(_))
        ));
    }

    #[test]
    fn test_callable_round_trip_is_identity() {
        let f = sample_fn("on_ping");
        let value = Value::dict([("callback", Value::Callable(f.clone()))]);
        let before = f.ref_count();

        let data = to_data(&value).unwrap();
        assert_eq!(f.ref_count(), before + 1);

        let back = from_data(&data).unwrap();
        let recovered = back.get("callback").and_then(Value::as_callable).unwrap();
        assert!(recovered.ptr_eq(&f));

        drop(back);
        drop(data);
        assert_eq!(f.ref_count(), before);
    }

    #[test]
    fn test_foreign_callable_rejected() {
        let leaf = CallableRef::new("alien", Arc::new(7u8));
        assert_eq!(
            from_data(&Data::Callable(leaf)),
            Err(ConversionError::ForeignCallable("alien".to_string()))
        );
    }

    #[test]
    fn test_unsupported_kinds_fail() {
        assert_eq!(
            to_data(&Value::Bytes(vec![1, 2])),
            Err(ConversionError::Unsupported("bytes"))
        );
        let nested = Value::List(vec![Value::Bytes(Vec::new())]);
        assert!(to_data(&nested).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::None;
        for _ in 0..=MAX_DEPTH + 1 {
            value = Value::List(vec![value]);
        }
        assert_eq!(to_data(&value), Err(ConversionError::MaxDepthExceeded));
    }

    #[test]
    fn test_native_integers_never_boolified() {
        assert_eq!(from_native(&NativeData::U8(1)).unwrap(), Value::Int(1));
        assert_eq!(from_native(&NativeData::I32(-7)).unwrap(), Value::Int(-7));
        assert_eq!(
            from_native(&NativeData::U64(u64::MAX)).unwrap(),
            Value::Int(u64::MAX as i128)
        );
        assert_eq!(from_native(&NativeData::Bool(false)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_native_strings_and_json() {
        assert_eq!(from_native(&NativeData::Stringz(String::new())).unwrap(), Value::None);
        assert_eq!(
            from_native(&NativeData::Stringz("hi".into())).unwrap(),
            Value::from("hi")
        );
        assert_eq!(
            from_native(&NativeData::Json(r#"{"count": 3}"#.into())).unwrap(),
            Value::dict([("count", Value::Int(3))])
        );
        assert!(matches!(
            from_native(&NativeData::Json("{oops".into())),
            Err(ConversionError::InvalidJson(_))
        ));
        assert_eq!(
            from_native(&NativeData::Opaque { type_name: "blob".into() }),
            Err(ConversionError::UnsupportedNative("blob".into()))
        );
    }
}
