//! Request and subcall call-outs: `reply`, `userdata`, `setloa`,
//! `clientinfo`, `callsync`, `callasync`

use super::{origin_of, Args, CallOutTable};
use crate::convert::{from_data, from_native_args, to_native_args};
use crate::dispatch::{async_completion, deliver_reply};
use crate::error::{GlueError, GlueResult};
use crate::glue::Scope;
use crate::handle::{CallBody, HandleBody, HandleKind};
use crate::value::Value;
use afb_glue_sdk::NativeError;
use std::sync::Arc;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("reply", reply);
    table.register("userdata", userdata);
    table.register("setloa", set_loa);
    table.register("clientinfo", client_info);
    table.register("callsync", call_sync);
    table.register("callasync", call_async);
}

fn status_arg(args: &Args, i: usize) -> GlueResult<i32> {
    i32::try_from(args.int(i)?).map_err(|_| args.syntax("status out of range"))
}

/// `reply(request, status, ...values)`
fn reply(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, None)?;
    let request = args.handle_of(0, &[HandleKind::Request])?;
    let status = status_arg(&args, 1)?;
    let data = to_native_args(args.rest(2))?;
    deliver_reply(scope, &request, status, data)?;
    Ok(Value::None)
}

/// `userdata(handle)`: user data attached to a request's verb or to a
/// timer, event handler or job
fn userdata(_scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let handle = args.handle(0)?;
    let value = match handle.body() {
        HandleBody::Request(req) => req.userdata.clone().unwrap_or_default(),
        HandleBody::Timer(timer) => timer.userdata.get_or_none(),
        HandleBody::Event(event) => event.userdata.get_or_none(),
        HandleBody::Job(job) => job.userdata.get_or_none(),
        HandleBody::PostedCall(call) | HandleBody::AsyncCall(call) => call.userdata.get_or_none(),
        HandleBody::Binder(_) | HandleBody::Api(_) => {
            return Err(args.syntax(format!("{} handle has no userdata", handle.kind())))
        }
    };
    Ok(value)
}

/// `setloa(request, level)`
fn set_loa(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let request = args.handle_of(0, &[HandleKind::Request])?;
    let level = u32::try_from(args.int(1)?)
        .map_err(|_| args.syntax("assurance level should be a non-negative integer"))?;
    scope.native().set_loa(request.as_request().request, level)?;
    Ok(Value::None)
}

/// `clientinfo(request, [key])`
fn client_info(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(2))?;
    let request = args.handle_of(0, &[HandleKind::Request])?;
    let info = scope.native().client_info(request.as_request().request)?;

    match args.optional(1) {
        None => Ok(from_data(&info)?),
        Some(_) => {
            let key = args.string(1)?;
            let item = info
                .get(key)
                .ok_or_else(|| args.syntax(format!("unknown clientinfo key '{}'", key)))?;
            Ok(from_data(item)?)
        }
    }
}

/// `callsync(handle, api, verb, ...args)`: returns `[status, ...replies]`.
/// A refusal by the runtime raises with the runtime's error text.
fn call_sync(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, None)?;
    let origin_handle = args.handle(0)?;
    let api = args.string(1)?.to_string();
    let verb = args.string(2)?.to_string();
    let params = to_native_args(args.rest(3))?;
    let origin = origin_of(scope, &origin_handle)?;

    let native = Arc::clone(scope.native());
    let reply = scope.allow_threads(|| native.call_sync(origin, &api, &verb, params))?;

    if let Some(errno) = reply.errno() {
        tracing::debug!(%api, %verb, error = errno.text(), "synchronous subcall refused");
        return Err(GlueError::Native(NativeError::Errno(errno)));
    }

    let mut out = Vec::with_capacity(reply.data.len() + 1);
    out.push(Value::from(reply.status));
    out.extend(from_native_args(&reply.data)?);
    Ok(Value::List(out))
}

/// `callasync(handle, api, verb, callback, userdata, ...args)`
fn call_async(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(5, None)?;
    let origin_handle = args.handle(0)?;
    let api = args.string(1)?.to_string();
    let verb = args.string(2)?.to_string();
    let callback = args.callable(3)?;
    let userdata = args.userdata(4);
    let params = to_native_args(args.rest(5))?;
    let origin = origin_of(scope, &origin_handle)?;

    let call = scope.registry().create(HandleBody::AsyncCall(CallBody::new(
        origin_handle,
        callback,
        userdata,
    )));
    let done = async_completion(
        Arc::downgrade(scope.shared()),
        call.clone(),
        api.clone(),
        verb.clone(),
    );

    if let Err(err) = scope.native().call_async(origin, &api, &verb, params, done) {
        let native = Arc::clone(scope.native());
        scope.registry().release(&call, native.as_ref());
        return Err(err.into());
    }
    Ok(Value::None)
}
