//! Binder lifecycle call-outs: `binder`, `loopstart` (also `mainloop`),
//! `config`, `binding`, `exit`, `ping`

use super::{Args, CallOutTable};
use crate::convert::{from_data, to_data};
use crate::dispatch::startup_hook;
use crate::error::{GlueError, GlueResult};
use crate::glue::Scope;
use crate::handle::{BinderBody, HandleBody, HandleKind};
use crate::value::Value;
use std::sync::Arc;

const DEFAULT_BINDER_UID: &str = "afb-binder";

pub(super) fn register(table: &mut CallOutTable) {
    table.register("binder", configure_binder);
    table.register("loopstart", start_loop);
    table.register("mainloop", main_loop);
    table.register("config", get_config);
    table.register("binding", load_binding);
    table.register("exit", exit);
    table.register("ping", ping);
}

/// `binder(config)`: configure the runtime once
fn configure_binder(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let config = args.dict(0)?;
    let uid = match config.get("uid") {
        None => DEFAULT_BINDER_UID.to_string(),
        Some(v) => v
            .as_str()
            .ok_or_else(|| args.syntax("'uid' should be a string"))?
            .to_string(),
    };
    let data = to_data(args.value(0)?)?;

    if scope.shared().binder.lock().is_some() {
        return Err(already_loaded());
    }

    // Runtime callbacks may need the interpreter while the runtime configures
    let native = Arc::clone(scope.native());
    let root_api = match scope.allow_threads(|| native.configure(&data)) {
        Ok(root_api) => root_api,
        Err(_) if scope.shared().binder.lock().is_some() => return Err(already_loaded()),
        Err(err) => return Err(err.into()),
    };

    let handle = scope.registry().create(HandleBody::Binder(BinderBody {
        uid: uid.clone(),
        root_api,
        config: args.value(0)?.clone(),
    }));
    {
        let mut slot = scope.shared().binder.lock();
        if slot.is_some() {
            return Err(already_loaded());
        }
        *slot = Some(handle.clone());
    }
    tracing::info!(%uid, %root_api, "binder configured");
    Ok(Value::Handle(handle))
}

fn already_loaded() -> GlueError {
    GlueError::Syntax("(hoops) binder(config) already loaded".into())
}

/// `loopstart(binder, [callback], [userdata])`: run the main loop
fn start_loop(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(3))?;
    let binder = args.handle_of(0, &[HandleKind::Binder])?;
    let callback = args.optional_callable(1)?;
    let userdata = args.userdata(2);

    let hook = startup_hook(Arc::downgrade(scope.shared()), binder, callback, userdata);
    let native = Arc::clone(scope.native());
    let status = scope.allow_threads(move || native.start(Some(hook)));
    tracing::info!(status, "main loop exited");
    Ok(Value::from(status))
}

/// `mainloop([callback], [userdata])`: `loopstart` on the configured binder
fn main_loop(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(0, Some(2))?;
    let binder = scope
        .binder()
        .ok_or_else(|| args.syntax("binder(config) not loaded"))?;
    start_loop(scope, args.prepend(Value::Handle(binder)))
}

/// `config(handle, [key])`: configuration a handle was created with
fn get_config(_scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(2))?;
    let handle = args.handle(0)?;

    let config = match handle.body() {
        HandleBody::Binder(binder) => binder.config.clone(),
        HandleBody::Api(api) => api.config.clone(),
        HandleBody::Request(req) => from_data(req.verb.config())?,
        HandleBody::Timer(timer) => timer.config.get_or_none(),
        HandleBody::Event(event) => event.config.get_or_none(),
        _ => return Err(args.syntax(format!("{} handle has no config", handle.kind()))),
    };

    match args.optional(1) {
        None => Ok(config),
        Some(_) => {
            let key = args.string(1)?;
            config
                .get(key)
                .cloned()
                .ok_or_else(|| args.syntax(format!("unknown config key '{}'", key)))
        }
    }
}

/// `binding(config)`: load a binding by path
fn load_binding(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let config = args.dict(0)?;
    if !config.get("path").map_or(false, |p| p.as_str().is_some()) {
        return Err(args.syntax("binding config requires a 'path' string"));
    }
    let data = to_data(args.value(0)?)?;
    scope.native().load_binding(&data)?;
    Ok(Value::None)
}

/// `exit(handle, code)`: request runtime shutdown
fn exit(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let handle = args.handle(0)?;
    let code = i32::try_from(args.int(1)?).map_err(|_| args.syntax("exit code out of range"))?;
    tracing::info!(%handle, code, "exit requested");
    scope.native().exit(code);
    Ok(Value::None)
}

/// `ping()`: increasing counter, for liveness checks
fn ping(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(0, Some(0))?;
    Ok(Value::from(scope.next_ping() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glue::Glue;
    use crate::testing::CountingBinder;
    use crossbeam::channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_configure_lets_other_threads_enter() {
        let native = Arc::new(CountingBinder::default());
        let glue = Glue::new(native.clone());
        let mut scope = glue.enter();
        let weak = Arc::downgrade(scope.shared());

        let (tx, rx) = channel::bounded(1);
        *native.on_configure.lock() = Some(Box::new(move || {
            let (entered_tx, entered_rx) = channel::bounded(1);
            thread::spawn(move || {
                if let Some(other) = Scope::upgrade(&weak) {
                    let _ = entered_tx.send(other.binder().is_none());
                }
            });
            let _ = tx.send(entered_rx.recv_timeout(Duration::from_secs(2)));
        }));

        let config = Value::dict([("uid", Value::from("demo"))]);
        let handle = scope.call("binder", vec![config.clone()]).unwrap();
        assert!(matches!(handle, Value::Handle(_)));
        assert_eq!(rx.try_recv().unwrap(), Ok(true));
        assert!(glue.binder().is_some());

        let err = scope.call("binder", vec![config]).unwrap_err();
        assert!(err.to_string().contains("already loaded"), "unexpected {}", err);
    }
}
