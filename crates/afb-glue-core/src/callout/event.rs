//! Event call-outs: `evtnew`, `evtpush`, `evtsubscribe`, `evtunsubscribe`,
//! `evthandler`, `evtdelete`

use super::{api_of, Args, CallOutTable};
use crate::convert::to_native_args;
use crate::dispatch::HandlerAdapter;
use crate::error::{GlueError, GlueResult};
use crate::glue::Scope;
use crate::handle::{EventBody, EventSource, Handle, HandleBody, HandleKind, Release};
use crate::value::Value;
use afb_glue_sdk::{EventId, NativeError};
use std::sync::Arc;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("evtnew", new_event);
    table.register("evtpush", push_event);
    table.register("evtsubscribe", subscribe);
    table.register("evtunsubscribe", unsubscribe);
    table.register("evthandler", add_handler);
    table.register("evtdelete", delete_handler);
}

/// Runtime event behind an emitter handle that is still alive
fn live_emitter(args: &Args, i: usize) -> GlueResult<(Handle, EventId)> {
    let handle = args.handle_of(i, &[HandleKind::Event])?;
    let event = match &handle.as_event().source {
        EventSource::Emitter { event, .. } => *event,
        EventSource::Handler { pattern } => {
            return Err(args.syntax(format!("'{}' is a handler, not an event", pattern)))
        }
    };
    if handle.is_released() {
        return Err(GlueError::protocol(format!("{} is stale", handle)));
    }
    Ok((handle, event))
}

/// `evtnew(api, label | {uid, name?})`
fn new_event(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let owner = args.handle(0)?;
    let config = args.value(1)?.clone();
    let (uid, label) = match &config {
        Value::Str(label) => (label.clone(), label.clone()),
        Value::Dict(map) => {
            let uid = map
                .get("uid")
                .and_then(Value::as_str)
                .ok_or_else(|| args.syntax("event config requires a 'uid' string"))?;
            let name = match map.get("name") {
                None | Some(Value::None) => uid,
                Some(v) => v
                    .as_str()
                    .ok_or_else(|| args.syntax("event 'name' should be a string"))?,
            };
            (uid.to_string(), name.to_string())
        }
        other => {
            return Err(args.syntax(format!(
                "event should be a label or a config dict, got {}",
                other.type_name()
            )))
        }
    };

    let api = api_of(scope, &owner)?;
    let event = scope.native().new_event(api, &label)?;
    let name = match scope.native().api_name(api) {
        Some(api_name) => format!("{}/{}", api_name, label),
        None => label,
    };

    tracing::debug!(%uid, event = %name, "event created");
    let source = EventSource::Emitter { event, name };
    let handle = scope
        .registry()
        .create(HandleBody::Event(EventBody::new(api, uid, source, config)));
    Ok(Value::Handle(handle))
}

/// `evtpush(event, ...args)`: returns the number of deliveries
fn push_event(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, None)?;
    let (handle, event) = live_emitter(&args, 0)?;
    let params = to_native_args(args.rest(1))?;

    let native = Arc::clone(scope.native());
    let delivered = scope.allow_threads(|| native.push_event(event, params))?;
    handle.as_event().bump();
    Ok(Value::from(delivered as i64))
}

/// `evtsubscribe(request, event)`
fn subscribe(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let request = args.handle_of(0, &[HandleKind::Request])?;
    let (_, event) = live_emitter(&args, 1)?;
    scope.native().subscribe(request.as_request().request, event)?;
    Ok(Value::None)
}

/// `evtunsubscribe(request, event)`
fn unsubscribe(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let request = args.handle_of(0, &[HandleKind::Request])?;
    let (_, event) = live_emitter(&args, 1)?;
    scope.native().unsubscribe(request.as_request().request, event)?;
    Ok(Value::None)
}

/// `evthandler(api, {uid?, pattern, callback, api?}, [userdata])`
fn add_handler(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(3))?;
    let owner = args.handle(0)?;
    let config = args.dict(1)?;
    let pattern = config
        .get("pattern")
        .and_then(Value::as_str)
        .ok_or_else(|| args.syntax("handler config requires a 'pattern' string"))?
        .to_string();
    let uid = config
        .get("uid")
        .and_then(Value::as_str)
        .unwrap_or(&pattern)
        .to_string();
    let callback = match config.get("callback") {
        Some(Value::Callable(f)) => f.clone(),
        _ => return Err(args.syntax("handler config requires a callable 'callback'")),
    };

    let api = match config.get("api") {
        None | Some(Value::None) => api_of(scope, &owner)?,
        Some(Value::Str(name)) => scope
            .native()
            .find_api(name)
            .ok_or_else(|| NativeError::not_found("api", name))?,
        Some(other) => {
            return Err(args.syntax(format!("'api' should be a string, got {}", other.type_name())))
        }
    };

    let body = EventBody::new(
        api,
        uid.clone(),
        EventSource::Handler {
            pattern: pattern.clone(),
        },
        args.value(1)?.clone(),
    )
    .with_callback(callback, args.userdata(2));
    let handle = scope.registry().create(HandleBody::Event(body));
    let listener = Arc::new(HandlerAdapter::new(scope.shared(), handle.clone()));

    if let Err(err) = scope.native().add_event_handler(api, &uid, &pattern, listener) {
        scope.registry().discard(&handle);
        return Err(err.into());
    }
    scope
        .shared()
        .handlers
        .insert((api, pattern.clone()), handle.clone());

    tracing::debug!(%uid, %pattern, %api, "event handler registered");
    Ok(Value::Handle(handle))
}

/// Drop the script reference to an emitter; later pushes see it as stale
fn delete_emitter(scope: &mut Scope, handle: &Handle, name: &str) -> GlueResult<Value> {
    let native = Arc::clone(scope.native());
    match scope.registry().release(handle, native.as_ref()) {
        Release::AlreadyReleased => Err(GlueError::protocol(format!(
            "event '{}' already deleted",
            name
        ))),
        _ => {
            tracing::debug!(event = %name, "event deleted");
            Ok(Value::None)
        }
    }
}

/// `evtdelete(handler | event)` or `evtdelete(handle, pattern)`
fn delete_handler(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(2))?;

    let (handle, key) = if args.len() == 1 {
        let handle = args.handle_of(0, &[HandleKind::Event])?;
        let body = handle.as_event();
        let pattern = match &body.source {
            EventSource::Handler { pattern } => pattern.clone(),
            EventSource::Emitter { name, .. } => return delete_emitter(scope, &handle, name),
        };
        let key = (body.api, pattern);
        (handle, key)
    } else {
        let owner = args.handle(0)?;
        let pattern = args.string(1)?.to_string();
        let api = api_of(scope, &owner)?;
        let key = (api, pattern);
        let handle = scope
            .shared()
            .handlers
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NativeError::not_found("event handler", &key.1))?;
        (handle, key)
    };

    scope
        .shared()
        .handlers
        .remove_if(&key, |_, indexed| *indexed == handle);

    let native = Arc::clone(scope.native());
    match scope.registry().release(&handle, native.as_ref()) {
        Release::AlreadyReleased => Err(GlueError::protocol(format!(
            "handler '{}' already deleted",
            key.1
        ))),
        _ => {
            tracing::debug!(pattern = %key.1, "event handler deleted");
            Ok(Value::None)
        }
    }
}
