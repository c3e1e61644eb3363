//! Scheduler call-outs: `jobpost`, `jobabort`, `jobcall`, `jobenter`,
//! `jobleave`, and their `sched*` forms

use super::{Args, CallOutTable};
use crate::dispatch::{entered_job, posted_job};
use crate::error::GlueResult;
use crate::glue::Scope;
use crate::handle::{CallBody, HandleBody, HandleKind, JobBody};
use crate::value::Value;
use afb_glue_sdk::{JobId, NativeError, TIMEOUT_STATUS};
use std::sync::Arc;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("jobpost", post);
    table.register("jobabort", abort);
    table.register("jobcall", call);
    table.register("jobenter", enter);
    table.register("jobleave", leave);

    // earlier names, taking the timeout before the callback
    table.register("schedpost", sched_post);
    table.register("schedcancel", abort);
    table.register("schedwait", sched_wait);
    table.register("schedunlock", sched_unlock);
}

fn millis(args: &Args, i: usize, what: &str) -> GlueResult<u64> {
    u64::try_from(args.int(i)?)
        .map_err(|_| args.syntax(format!("{} should be a non-negative integer", what)))
}

/// `jobpost(handle, callback, delayMs, [userdata])`: returns the job id
fn post(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(4))?;
    let origin = args.handle(0)?;
    let callback = args.callable(1)?;
    let delay = millis(&args, 2, "delay")?;

    let call = scope.registry().create(HandleBody::PostedCall(CallBody::new(
        origin,
        callback,
        args.userdata(3),
    )));
    let job = posted_job(Arc::downgrade(scope.shared()), call.clone());

    match scope.native().post_job(delay, job) {
        Ok(id) => {
            tracing::debug!(job = id.as_u64(), delay, "job posted");
            Ok(Value::from(id.as_u64()))
        }
        Err(err) => {
            let native = Arc::clone(scope.native());
            scope.registry().release(&call, native.as_ref());
            Err(err.into())
        }
    }
}

/// `jobabort(jobId)`: cancel a posted job before it fires
fn abort(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let id = args.int(0)?;
    if id <= 0 {
        return Err(args.syntax("job id should be a positive integer"));
    }

    let native = Arc::clone(scope.native());
    scope.allow_threads(|| native.abort_job(JobId::from_raw(id as u64)))?;
    tracing::debug!(job = id, "job aborted");
    Ok(Value::None)
}

/// `jobcall(handle, callback, timeoutMs, [userdata])`: run on the scheduler
/// and wait; returns the callback status, or the timeout status
fn call(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(4))?;
    let origin = args.handle(0)?;
    let callback = args.callable(1)?;
    let timeout = millis(&args, 2, "timeout")?;

    let call = scope.registry().create(HandleBody::PostedCall(CallBody::new(
        origin,
        callback,
        args.userdata(3),
    )));
    let job = posted_job(Arc::downgrade(scope.shared()), call.clone());

    let native = Arc::clone(scope.native());
    match scope.allow_threads(|| native.call_job(timeout, job)) {
        Ok(()) => Ok(Value::from(call.as_call().status().unwrap_or(0))),
        Err(NativeError::Timeout(ms)) => {
            tracing::warn!(timeout_ms = ms, "job call timed out");
            Ok(Value::from(TIMEOUT_STATUS))
        }
        Err(err) => {
            if !call.is_released() {
                scope.registry().release(&call, native.as_ref());
            }
            Err(err.into())
        }
    }
}

/// `jobenter(handle, callback, timeoutMs, [userdata])`: take a scheduler
/// lock, run the callback with the job handle, and block until `jobleave`.
/// Returns the leave status, or the timeout status.
fn enter(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(4))?;
    let origin = args.handle(0)?;
    let callback = args.callable(1)?;
    let timeout = millis(&args, 2, "timeout")?;

    let job = scope
        .registry()
        .create(HandleBody::Job(JobBody::new(origin, callback, args.userdata(3))));
    let body = entered_job(Arc::downgrade(scope.shared()), job.clone());

    let native = Arc::clone(scope.native());
    let outcome = scope.allow_threads(|| native.sched_enter(timeout, body));
    let status = match outcome {
        Ok(()) => Ok(job.as_job().status().unwrap_or(0)),
        Err(NativeError::Timeout(ms)) => {
            tracing::warn!(timeout_ms = ms, "scheduler lock timed out");
            Ok(TIMEOUT_STATUS as i64)
        }
        Err(err) => Err(err),
    };

    scope.registry().release(&job, native.as_ref());
    Ok(Value::from(status?))
}

/// `jobleave(job, status)`: hand an entered lock back
fn leave(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(2))?;
    let job = args.handle_of(0, &[HandleKind::Job])?;
    let status = args.int(1)?;

    let lock = job.as_job().complete(status)?;
    let native = Arc::clone(scope.native());
    scope.allow_threads(|| native.sched_leave(lock))?;
    tracing::debug!(status, "scheduler lock left");
    Ok(Value::None)
}

/// `schedpost(handle, delayMs, callback, [userdata])`
fn sched_post(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(4))?;
    post(scope, args.swapped(1, 2))
}

/// `schedwait(handle, timeoutMs, callback, [userdata])`
fn sched_wait(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(4))?;
    enter(scope, args.swapped(1, 2))
}

/// `schedunlock(handle, job, status)`
fn sched_unlock(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(3, Some(3))?;
    args.handle(0)?;
    leave(scope, args.skip(1))
}
