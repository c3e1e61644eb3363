//! Shared helpers for glue integration tests
#![allow(dead_code)]

use afb_glue_core::{Glue, GlueResult, Handle, Scope, ScriptFn, Value};
use afb_glue_runtime::LocalBinder;
use crossbeam::channel::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

/// Glue over a fresh in-process runtime
pub fn setup() -> (Glue, Arc<LocalBinder>) {
    let runtime = Arc::new(LocalBinder::new());
    let glue = Glue::new(runtime.clone());
    (glue, runtime)
}

/// Configure the binder through the `binder` call-out
pub fn configure(scope: &mut Scope) -> Handle {
    let config = Value::dict([("uid", Value::from("test-binder")), ("workers", Value::from(2))]);
    match scope.call("binder", vec![config]).unwrap() {
        Value::Handle(handle) => handle,
        other => panic!("binder returned {:?}", other),
    }
}

/// Wrap a closure as a callable value
pub fn callable<F>(name: &str, body: F) -> Value
where
    F: Fn(&mut Scope, Vec<Value>) -> GlueResult<Value> + Send + Sync + 'static,
{
    Value::Callable(ScriptFn::new(name, body))
}

pub fn handle(value: Value) -> Handle {
    match value {
        Value::Handle(handle) => handle,
        other => panic!("expected a handle, got {:?}", other),
    }
}

/// Receive with the interpreter lock released so workers can run callbacks
pub fn recv<T>(scope: &mut Scope, rx: &Receiver<T>) -> T {
    scope
        .allow_threads(|| rx.recv_timeout(WAIT))
        .expect("callback did not fire")
}

/// Nothing arrives within `within`
pub fn silent<T>(scope: &mut Scope, rx: &Receiver<T>, within: Duration) -> bool {
    scope.allow_threads(|| rx.recv_timeout(within)).is_err()
}

/// Poll `cond` with the interpreter lock released
pub fn eventually(scope: &mut Scope, cond: impl Fn(&Scope) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond(scope) {
            return true;
        }
        scope.allow_threads(|| thread::sleep(Duration::from_millis(5)));
    }
    cond(scope)
}
