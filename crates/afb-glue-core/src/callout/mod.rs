//! Call-out surface
//!
//! Every runtime operation a script can invoke, registered by name in a
//! [`CallOutTable`]. Each call-out validates its arguments through [`Args`],
//! which turns arity and type mistakes into [`GlueError::Syntax`] carrying
//! the call-out name.

mod api;
mod binder;
mod event;
mod job;
mod log;
mod request;
mod timer;

use crate::error::{GlueError, GlueResult};
use crate::glue::Scope;
use crate::handle::{Handle, HandleBody, HandleKind};
use crate::value::{ScriptFn, Value};
use afb_glue_sdk::{ApiId, CallOrigin};
use std::collections::{BTreeMap, HashMap};

/// A call-out entry point
pub type CallOut = fn(&mut Scope, Args) -> GlueResult<Value>;

// ============================================================================
// Call-out table (name-based dispatch)
// ============================================================================

/// Registry of call-outs indexed by script-visible name
pub struct CallOutTable {
    entries: HashMap<&'static str, CallOut>,
}

impl CallOutTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Table with every standard call-out
    pub fn standard() -> Self {
        let mut table = Self::new();
        binder::register(&mut table);
        api::register(&mut table);
        request::register(&mut table);
        event::register(&mut table);
        timer::register(&mut table);
        job::register(&mut table);
        log::register(&mut table);
        table
    }

    /// Register a call-out, replacing any previous one with that name
    pub fn register(&mut self, name: &'static str, callout: CallOut) {
        if self.entries.insert(name, callout).is_some() {
            tracing::debug!(callout = name, "call-out replaced");
        }
    }

    /// Get a call-out by name
    pub fn get(&self, name: &str) -> Option<CallOut> {
        self.entries.get(name).copied()
    }

    /// Check if a call-out is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered call-outs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for CallOutTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Argument validation
// ============================================================================

/// Positional arguments of one call-out invocation
#[derive(Debug)]
pub struct Args {
    callout: String,
    values: Vec<Value>,
}

impl Args {
    /// Wrap the arguments passed to `callout`
    pub fn new(callout: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            callout: callout.into(),
            values,
        }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no argument was passed
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Syntax error prefixed with the call-out name
    pub fn syntax(&self, detail: impl AsRef<str>) -> GlueError {
        GlueError::Syntax(format!("{}: {}", self.callout, detail.as_ref()))
    }

    /// Fail unless `min <= len <= max`
    pub fn check_arity(&self, min: usize, max: Option<usize>) -> GlueResult<()> {
        let n = self.values.len();
        let too_many = max.map_or(false, |max| n > max);
        if n < min || too_many {
            let expected = match max {
                Some(max) if max == min => format!("{}", min),
                Some(max) => format!("{} to {}", min, max),
                None => format!("at least {}", min),
            };
            return Err(self.syntax(format!("expected {} arguments, got {}", expected, n)));
        }
        Ok(())
    }

    /// Argument `i`, required
    pub fn value(&self, i: usize) -> GlueResult<&Value> {
        self.values
            .get(i)
            .ok_or_else(|| self.syntax(format!("missing argument #{}", i + 1)))
    }

    /// Argument `i`; absent and `None` both read as missing
    pub fn optional(&self, i: usize) -> Option<&Value> {
        self.values.get(i).filter(|v| !v.is_none())
    }

    /// Argument `i` as a handle of any kind
    pub fn handle(&self, i: usize) -> GlueResult<Handle> {
        match self.value(i)? {
            Value::Handle(h) => Ok(h.clone()),
            other => Err(self.syntax(format!(
                "argument #{} should be a handle, got {}",
                i + 1,
                other.type_name()
            ))),
        }
    }

    /// Argument `i` as a handle of one of `kinds`
    pub fn handle_of(&self, i: usize, kinds: &[HandleKind]) -> GlueResult<Handle> {
        let handle = self.handle(i)?;
        if !kinds.contains(&handle.kind()) {
            let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
            return Err(self.syntax(format!(
                "argument #{} should be a {} handle, got {}",
                i + 1,
                names.join("/"),
                handle.kind()
            )));
        }
        Ok(handle)
    }

    /// Argument `i` as a string
    pub fn string(&self, i: usize) -> GlueResult<&str> {
        let value = self.value(i)?;
        value.as_str().ok_or_else(|| {
            self.syntax(format!("argument #{} should be a string, got {}", i + 1, value.type_name()))
        })
    }

    /// Argument `i` as a 64-bit integer
    pub fn int(&self, i: usize) -> GlueResult<i64> {
        let value = self.value(i)?;
        value
            .as_int()
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| {
                self.syntax(format!(
                    "argument #{} should be an integer, got {}",
                    i + 1,
                    value.type_name()
                ))
            })
    }

    /// Argument `i` as a callable
    pub fn callable(&self, i: usize) -> GlueResult<ScriptFn> {
        let value = self.value(i)?;
        value.as_callable().cloned().ok_or_else(|| {
            self.syntax(format!("argument #{} should be callable, got {}", i + 1, value.type_name()))
        })
    }

    /// Argument `i` as a callable, `None` when absent
    pub fn optional_callable(&self, i: usize) -> GlueResult<Option<ScriptFn>> {
        match self.optional(i) {
            None => Ok(None),
            Some(_) => self.callable(i).map(Some),
        }
    }

    /// Argument `i` as a dict
    pub fn dict(&self, i: usize) -> GlueResult<&BTreeMap<String, Value>> {
        let value = self.value(i)?;
        value.as_dict().ok_or_else(|| {
            self.syntax(format!("argument #{} should be a dict, got {}", i + 1, value.type_name()))
        })
    }

    /// Arguments from `from` onward
    pub fn rest(&self, from: usize) -> &[Value] {
        self.values.get(from..).unwrap_or(&[])
    }

    /// Argument `i` as user data, `None` when absent
    pub fn userdata(&self, i: usize) -> Value {
        self.values.get(i).cloned().unwrap_or_default()
    }

    /// Same arguments with positions `a` and `b` exchanged, when both exist
    pub fn swapped(mut self, a: usize, b: usize) -> Self {
        if a < self.values.len() && b < self.values.len() {
            self.values.swap(a, b);
        }
        self
    }

    /// Same arguments without the first `n`
    pub fn skip(mut self, n: usize) -> Self {
        self.values.drain(..n.min(self.values.len()));
        self
    }

    /// Same arguments with `value` in front
    pub fn prepend(mut self, value: Value) -> Self {
        self.values.insert(0, value);
        self
    }
}

// ============================================================================
// Origin resolution
// ============================================================================

/// Context a subcall issued from `handle` runs in
pub(crate) fn origin_of(scope: &Scope, handle: &Handle) -> GlueResult<CallOrigin> {
    match handle.body() {
        HandleBody::Request(req) => Ok(CallOrigin::Request(req.request)),
        HandleBody::Job(job) => origin_of(scope, &job.origin),
        HandleBody::PostedCall(call) | HandleBody::AsyncCall(call) => origin_of(scope, &call.origin),
        _ => api_of(scope, handle).map(CallOrigin::Api),
    }
}

/// API owning `handle`
pub(crate) fn api_of(scope: &Scope, handle: &Handle) -> GlueResult<ApiId> {
    scope
        .registry()
        .native_api(handle, scope.native().as_ref())
        .ok_or_else(|| GlueError::protocol(format!("{} is not bound to an api", handle)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_names() {
        let table = CallOutTable::standard();
        for name in [
            "binder", "apiadd", "apicreate", "apiimport", "loopstart", "config", "reply",
            "binding", "callasync", "callsync", "verbadd", "evtnew", "evtpush", "evtsubscribe",
            "evtunsubscribe", "evthandler", "evtdelete", "timernew", "timeraddref",
            "timerunref", "jobpost", "jobcall", "jobenter", "jobleave", "jobabort", "setloa",
            "clientinfo", "exit", "ping", "userdata", "error", "warning", "notice", "info",
            "debug", "mainloop", "schedpost", "schedcancel", "schedwait", "schedunlock",
        ] {
            assert!(table.contains(name), "missing call-out {}", name);
        }
        assert_eq!(table.len(), 40);
        assert!(!table.contains("evtrenew"));
    }

    #[test]
    fn test_names_sorted() {
        let names = CallOutTable::standard().names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_arity_messages() {
        let args = Args::new("evtsubscribe", vec![Value::None]);
        let err = args.check_arity(2, Some(2)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "syntax error: evtsubscribe: expected 2 arguments, got 1"
        );
        assert!(args.check_arity(1, None).is_ok());
        assert!(Args::new("x", vec![Value::None; 3]).check_arity(1, Some(2)).is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let args = Args::new(
            "timernew",
            vec![Value::from("tick"), Value::Int(5), Value::None, Value::Int(1i128 << 70)],
        );
        assert_eq!(args.string(0).unwrap(), "tick");
        assert_eq!(args.int(1).unwrap(), 5);
        assert!(args.optional(2).is_none());
        assert!(args.int(3).is_err());
        assert!(args.string(1).unwrap_err().to_string().contains("should be a string"));
        assert!(args.callable(0).is_err());
        assert!(args.optional_callable(2).unwrap().is_none());
        assert_eq!(args.rest(2).len(), 2);
        assert!(args.rest(9).is_empty());
        assert_eq!(args.userdata(9), Value::None);
    }

    #[test]
    fn test_reshaped_args() {
        let args = Args::new("schedwait", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let args = args.swapped(1, 2);
        assert_eq!(args.rest(0), &[Value::Int(1), Value::Int(3), Value::Int(2)]);
        let args = args.swapped(0, 7).skip(1);
        assert_eq!(args.rest(0), &[Value::Int(3), Value::Int(2)]);
        let args = args.prepend(Value::from("x")).skip(9);
        assert!(args.is_empty());
    }
}
