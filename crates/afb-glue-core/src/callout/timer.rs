//! Timer call-outs: `timernew`, `timeraddref`, `timerunref`

use super::{api_of, Args, CallOutTable};
use crate::dispatch::TimerAdapter;
use crate::error::{GlueError, GlueResult};
use crate::glue::Scope;
use crate::handle::{HandleBody, HandleKind, Release, TimerBody};
use crate::value::Value;
use afb_glue_sdk::TimerSpec;
use std::sync::Arc;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("timernew", new_timer);
    table.register("timeraddref", addref);
    table.register("timerunref", unref);
}

/// `timernew(api, {uid, callback, period, count?}, [userdata])`
///
/// `period` is in milliseconds and must be positive; `count` of zero (the
/// default) ticks until released.
fn new_timer(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(3))?;
    let owner = args.handle(0)?;
    let config = args.dict(1)?;

    let uid = config
        .get("uid")
        .and_then(Value::as_str)
        .ok_or_else(|| args.syntax("timer config requires a 'uid' string"))?
        .to_string();
    let callback = match config.get("callback") {
        Some(Value::Callable(f)) => f.clone(),
        _ => return Err(args.syntax("timer config requires a callable 'callback'")),
    };
    let period_ms = config
        .get("period")
        .and_then(Value::as_int)
        .and_then(|p| u64::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| args.syntax("timer 'period' should be a positive integer"))?;
    let count = match config.get("count") {
        None | Some(Value::None) => 0,
        Some(v) => v
            .as_int()
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| args.syntax("timer 'count' should be a non-negative integer"))?,
    };

    let api = api_of(scope, &owner)?;
    let body = TimerBody::new(
        api,
        uid.clone(),
        period_ms,
        count,
        args.value(1)?.clone(),
        callback,
        args.userdata(2),
    );
    let handle = scope.registry().create(HandleBody::Timer(body));
    let listener = Arc::new(TimerAdapter::new(scope.shared(), handle.clone()));
    let spec = TimerSpec {
        uid: uid.clone(),
        period_ms,
        count,
    };

    // Ticks need the interpreter lock, so none can observe the handle before
    // it is bound below.
    match scope.native().create_timer(api, &spec, listener) {
        Ok(timer) => handle.as_timer().bind(timer),
        Err(err) => {
            scope.registry().discard(&handle);
            return Err(err.into());
        }
    }

    tracing::debug!(%uid, period_ms, count, "timer armed");
    Ok(Value::Handle(handle))
}

/// `timeraddref(timer)`
fn addref(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let timer = args.handle_of(0, &[HandleKind::Timer])?;
    let native = Arc::clone(scope.native());
    scope.registry().addref(&timer, native.as_ref())?;
    Ok(Value::None)
}

/// `timerunref(timer)`
fn unref(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let timer = args.handle_of(0, &[HandleKind::Timer])?;
    let native = Arc::clone(scope.native());
    match scope.registry().release(&timer, native.as_ref()) {
        Release::AlreadyReleased => Err(GlueError::protocol(format!("{} already released", timer))),
        outcome => {
            tracing::trace!(uid = %timer.as_timer().uid, ?outcome, "timer unref");
            Ok(Value::None)
        }
    }
}
