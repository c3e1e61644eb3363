//! Dispatch adapters
//!
//! Entry points the runtime calls back into. Each one:
//!
//! 1. checks the handle it was registered with (kind mismatch panics)
//! 2. enters the interpreter through a [`Scope`]
//! 3. resolves the script callable, cached in the registration side-table
//!    for verbs and config-declared events
//! 4. converts native arguments and invokes the callable
//! 5. turns the result into a reply or status
//!
//! Script failures stop here: verbs answer with an error reply, everything
//! else logs. Nothing unwinds into the runtime.

use crate::convert::{callable_from_leaf, from_data, from_native_args, to_native_args};
use crate::error::{GlueError, GlueResult};
use crate::glue::{GlueShared, Scope};
use crate::handle::{Handle, HandleBody, RequestBody};
use crate::value::{ScriptFn, Value};
use afb_glue_sdk::{
    ApiHandler, ApiId, Completion, ControlEvent, Data, EnterFn, EventListener, JobFn, JobSignal,
    NativeData, Registration, Reply, RequestId, StartupFn, TimerId, TimerListener,
};
use std::any::Any;
use std::sync::{Arc, Weak};

/// Status replied when a verb callback fails
pub const ERROR_STATUS: i32 = -1;

// ============================================================================
// Callable resolution and result shaping
// ============================================================================

/// Callable and user data bound to a verb or event registration
pub(crate) struct VerbBinding {
    pub(crate) callback: ScriptFn,
    pub(crate) userdata: Option<Value>,
}

/// Resolve the binding of a registration, caching it on first use
pub(crate) fn resolve_binding(reg: &Registration) -> GlueResult<Arc<VerbBinding>> {
    let cached = reg.side_table().get_or_try_init(|| -> GlueResult<_> {
        let leaf = reg
            .config()
            .get("callback")
            .and_then(Data::as_callable)
            .ok_or_else(|| {
                GlueError::protocol(format!("'{}' has no callable 'callback'", reg.uid()))
            })?;
        let callback = callable_from_leaf(leaf)?;
        let userdata = reg.config().get("userdata").map(from_data).transpose()?;
        tracing::trace!(uid = reg.uid(), "callback resolved and cached");
        let binding: Arc<dyn Any + Send + Sync> = Arc::new(VerbBinding { callback, userdata });
        Ok(binding)
    })?;

    Arc::clone(cached)
        .downcast::<VerbBinding>()
        .map_err(|_| GlueError::protocol(format!("'{}' side-table holds foreign data", reg.uid())))
}

/// Attach a binding up front, for verbs added with explicit user data
pub(crate) fn bind_registration(reg: &Registration, callback: ScriptFn, userdata: Option<Value>) {
    let binding: Arc<dyn Any + Send + Sync> = Arc::new(VerbBinding { callback, userdata });
    if reg.side_table().set(binding).is_err() {
        tracing::debug!(uid = reg.uid(), "registration already bound");
    }
}

fn status_from(i: i128) -> GlueResult<i32> {
    i32::try_from(i).map_err(|_| GlueError::protocol(format!("status {} out of range", i)))
}

/// `None` is status 0; integers are statuses; anything else is a bad response
pub(crate) fn status_or_zero(value: &Value) -> GlueResult<i32> {
    match value {
        Value::None => Ok(0),
        Value::Int(i) => status_from(*i),
        other => Err(GlueError::protocol(format!(
            "callback should return an integer status, got {}",
            other.type_name()
        ))),
    }
}

/// Shape a verb result as a reply; `None` means the script replies later
pub(crate) fn reply_payload(ret: Value) -> GlueResult<Option<(i32, Vec<NativeData>)>> {
    match ret {
        Value::None => Ok(None),
        Value::Int(i) => Ok(Some((status_from(i)?, Vec::new()))),
        Value::List(items) => {
            let status = match items.first() {
                Some(Value::Int(i)) => status_from(*i)?,
                _ => {
                    return Err(GlueError::protocol(
                        "response 1st element should be status/integer",
                    ))
                }
            };
            Ok(Some((status, to_native_args(&items[1..])?)))
        }
        other => Err(GlueError::protocol(format!(
            "verb should return status or (status, ...), got {}",
            other.type_name()
        ))),
    }
}

/// Send the single reply of a request
pub(crate) fn deliver_reply(
    scope: &mut Scope,
    request: &Handle,
    status: i32,
    data: Vec<NativeData>,
) -> GlueResult<()> {
    let body = request.as_request();
    if !body.claim_reply() {
        tracing::warn!(verb = body.verb.name(), status, "unique response require, reply rejected");
        return Err(GlueError::protocol("request already replied"));
    }
    scope.native().reply(body.request, status, data)?;
    Ok(())
}

fn error_payload(err: &GlueError, api: &str, verb: &str) -> NativeData {
    NativeData::Tree(Data::object([
        ("message", Data::from(err.to_string())),
        ("kind", Data::from(err.kind())),
        ("api", Data::from(api)),
        ("verb", Data::from(verb)),
    ]))
}

fn reply_error(scope: &mut Scope, request: &Handle, api: &str, err: &GlueError) {
    let body = request.as_request();
    if body.replied() {
        tracing::debug!(verb = body.verb.name(), error = %err, "failure after reply, not reported");
        return;
    }
    let payload = error_payload(err, api, body.verb.name());
    if let Err(reply_err) = deliver_reply(scope, request, ERROR_STATUS, vec![payload]) {
        tracing::warn!(error = %reply_err, "failed to send error reply");
    }
}

// ============================================================================
// API adapter
// ============================================================================

/// Verb, control, event and info entry points of a script API
pub(crate) struct ApiAdapter {
    glue: Weak<GlueShared>,
    api: Handle,
}

impl ApiAdapter {
    pub(crate) fn new(glue: &Arc<GlueShared>, api: Handle) -> Self {
        Self {
            glue: Arc::downgrade(glue),
            api,
        }
    }
}

impl ApiHandler for ApiAdapter {
    fn on_control(&self, api: ApiId, event: &ControlEvent) -> i32 {
        let body = self.api.as_api();
        body.bind(api);
        let phase = event.phase();

        if let ControlEvent::OrphanEvent { name } = event {
            tracing::warn!(api = %body.name, event = %name, "orphan event, no handler matched");
        }

        let Some(control) = body.control.clone() else {
            tracing::debug!(api = %body.name, phase, "no control callback registered");
            return 0;
        };
        let Some(mut scope) = Scope::upgrade(&self.glue) else {
            return ERROR_STATUS;
        };

        let args = vec![Value::Handle(self.api.clone()), Value::from(phase)];
        match scope.invoke(&control, args).and_then(|v| status_or_zero(&v)) {
            Ok(status) => {
                tracing::debug!(api = %body.name, phase, status, "control callback done");
                status
            }
            Err(err) => {
                tracing::warn!(api = %body.name, phase, error = %err, "control callback failed");
                ERROR_STATUS
            }
        }
    }

    fn on_verb(&self, request: RequestId, verb: &Arc<Registration>, args: Vec<NativeData>) {
        let Some(mut scope) = Scope::upgrade(&self.glue) else {
            return;
        };
        let api = self.api.as_api();
        let Some(api_id) = api.api().or_else(|| scope.native().request_api(request)) else {
            tracing::error!(api = %api.name, verb = verb.name(), "verb called on undeclared api");
            return;
        };

        let binding = resolve_binding(verb);
        let userdata = binding.as_ref().ok().and_then(|b| b.userdata.clone());
        let handle = scope.registry().create(HandleBody::Request(RequestBody::new(
            request,
            api_id,
            Arc::clone(verb),
            userdata,
        )));

        let outcome = binding.and_then(|binding| {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(Value::Handle(handle.clone()));
            call_args.extend(from_native_args(&args)?);
            let ret = scope.invoke(&binding.callback, call_args)?;
            reply_payload(ret)
        });

        match outcome {
            Ok(None) => {}
            Ok(Some((status, data))) => {
                if handle.as_request().replied() {
                    tracing::debug!(verb = verb.name(), "already replied, implicit reply dropped");
                } else if let Err(err) = deliver_reply(&mut scope, &handle, status, data) {
                    tracing::warn!(verb = verb.name(), error = %err, "reply failed");
                }
            }
            Err(err) => {
                tracing::warn!(api = %api.name, verb = verb.name(), error = %err, "verb callback failed");
                reply_error(&mut scope, &handle, &api.name, &err);
            }
        }
    }

    fn on_event(&self, _api: ApiId, handler: &Arc<Registration>, event: &str, args: Vec<NativeData>) {
        let Some(mut scope) = Scope::upgrade(&self.glue) else {
            return;
        };
        let outcome = resolve_binding(handler).and_then(|binding| {
            let mut call_args = vec![
                Value::Handle(self.api.clone()),
                Value::from(event),
                binding.userdata.clone().unwrap_or_default(),
            ];
            call_args.extend(from_native_args(&args)?);
            scope.invoke(&binding.callback, call_args)
        });
        if let Err(err) = outcome {
            tracing::warn!(handler = handler.uid(), %event, error = %err, "event callback failed");
        }
    }

    fn on_info(&self, _api: ApiId, verbs: &[Arc<Registration>]) -> Data {
        let body = self.api.as_api();
        let info = body
            .config
            .get("info")
            .and_then(Value::as_str)
            .map(Data::from)
            .unwrap_or_default();
        let uid = body
            .config
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or(&body.name);

        let verbs = verbs
            .iter()
            .map(|reg| {
                Data::object([
                    ("uid", Data::from(reg.uid())),
                    ("verb", Data::from(reg.name())),
                    ("info", reg.info().map(Data::from).unwrap_or_default()),
                ])
            })
            .collect();

        Data::object([
            (
                "metadata",
                Data::object([
                    ("uid", Data::from(uid)),
                    ("info", info),
                    ("api", Data::from(body.name.as_str())),
                ]),
            ),
            (
                "groups",
                Data::Array(vec![Data::object([("verbs", Data::Array(verbs))])]),
            ),
        ])
    }
}

// ============================================================================
// Event handler adapter
// ============================================================================

/// Pattern handler registered through `evthandler`
pub(crate) struct HandlerAdapter {
    glue: Weak<GlueShared>,
    handle: Handle,
}

impl HandlerAdapter {
    pub(crate) fn new(glue: &Arc<GlueShared>, handle: Handle) -> Self {
        Self {
            glue: Arc::downgrade(glue),
            handle,
        }
    }
}

impl EventListener for HandlerAdapter {
    fn on_event(&self, _api: ApiId, event: &str, args: Vec<NativeData>) {
        let body = self.handle.as_event();
        let Some(mut scope) = Scope::upgrade(&self.glue) else {
            return;
        };
        let Some(callback) = body.callback.callable() else {
            tracing::debug!(uid = %body.uid, %event, "handler released, event dropped");
            return;
        };
        body.bump();

        let mut call_args = vec![
            Value::Handle(self.handle.clone()),
            Value::from(event),
            body.userdata.get_or_none(),
        ];
        match from_native_args(&args) {
            Ok(values) => call_args.extend(values),
            Err(err) => {
                tracing::warn!(uid = %body.uid, %event, error = %err, "event arguments dropped");
                return;
            }
        }
        if let Err(err) = scope.invoke(&callback, call_args) {
            tracing::warn!(uid = %body.uid, %event, error = %err, "event callback failed");
        }
    }
}

// ============================================================================
// Timer adapter
// ============================================================================

/// Tick sink of a script timer
pub(crate) struct TimerAdapter {
    glue: Weak<GlueShared>,
    handle: Handle,
}

impl TimerAdapter {
    pub(crate) fn new(glue: &Arc<GlueShared>, handle: Handle) -> Self {
        Self {
            glue: Arc::downgrade(glue),
            handle,
        }
    }
}

impl TimerListener for TimerAdapter {
    fn on_tick(&self, _timer: TimerId, remaining: u32) {
        let body = self.handle.as_timer();
        let Some(mut scope) = Scope::upgrade(&self.glue) else {
            return;
        };
        let Some(callback) = body.callback.callable() else {
            return;
        };

        let args = vec![
            Value::Handle(self.handle.clone()),
            body.userdata.get_or_none(),
            Value::from(remaining as i64),
        ];
        let status = match scope.invoke(&callback, args).and_then(|v| status_or_zero(&v)) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(uid = %body.uid, error = %err, "timer callback failed");
                ERROR_STATUS
            }
        };

        if remaining == 1 || status != 0 {
            tracing::debug!(uid = %body.uid, remaining, status, "timer released");
            let native = Arc::clone(scope.native());
            scope.registry().release(&self.handle, native.as_ref());
        }
    }
}

// ============================================================================
// One-shot closures
// ============================================================================

/// Job body for `jobpost` and `jobcall`: invokes `(origin, 0, userdata)`
/// then releases the call handle. Aborted jobs only release.
pub(crate) fn posted_job(glue: Weak<GlueShared>, call: Handle) -> JobFn {
    Box::new(move |signal| {
        let Some(mut scope) = Scope::upgrade(&glue) else {
            return;
        };
        let body = call.as_call();

        match (signal, body.callback.callable()) {
            (JobSignal::Run, Some(callback)) => {
                let args = vec![
                    Value::Handle(body.origin.clone()),
                    Value::Int(0),
                    body.userdata.get_or_none(),
                ];
                match scope.invoke(&callback, args).and_then(|v| status_or_zero(&v)) {
                    Ok(status) => body.set_status(status as i64),
                    Err(err) => {
                        tracing::warn!(error = %err, "job callback failed");
                        body.set_status(ERROR_STATUS as i64);
                    }
                }
            }
            (JobSignal::Aborted, _) => tracing::debug!(handle = call.id(), "job aborted"),
            (JobSignal::Run, None) => {}
        }

        let native = Arc::clone(scope.native());
        scope.registry().release(&call, native.as_ref());
    })
}

/// Body run once a `jobenter` lock is held: invokes
/// `(origin, job, userdata)`. A failing callback leaves the lock with
/// status -1 so the blocked caller resumes.
pub(crate) fn entered_job(glue: Weak<GlueShared>, job: Handle) -> EnterFn {
    Box::new(move |lock| {
        let Some(mut scope) = Scope::upgrade(&glue) else {
            return;
        };
        let body = job.as_job();
        if let Err(err) = body.enter(lock) {
            tracing::warn!(handle = job.id(), error = %err, "scheduler lock no longer pending");
            return;
        }
        let Some(callback) = body.callback.callable() else {
            return;
        };

        let args = vec![
            Value::Handle(body.origin.clone()),
            Value::Handle(job.clone()),
            body.userdata.get_or_none(),
        ];
        if let Err(err) = scope.invoke(&callback, args) {
            tracing::warn!(error = %err, "job enter callback failed, leaving lock");
            if let Ok(lock) = body.complete(ERROR_STATUS as i64) {
                let native = Arc::clone(scope.native());
                if let Err(err) = scope.allow_threads(|| native.sched_leave(lock)) {
                    tracing::error!(error = %err, "failed to leave scheduler lock");
                }
            }
        }
    })
}

/// Completion of `callasync`: invokes `(origin, status, userdata, ...replies)`
pub(crate) fn async_completion(
    glue: Weak<GlueShared>,
    call: Handle,
    api: String,
    verb: String,
) -> Completion {
    Box::new(move |reply: Reply| {
        let Some(mut scope) = Scope::upgrade(&glue) else {
            return;
        };
        if let Some(errno) = reply.errno() {
            tracing::warn!(%api, %verb, error = errno.text(), "asynchronous subcall refused");
        }

        let body = call.as_call();
        if let Some(callback) = body.callback.callable() {
            let mut args = vec![
                Value::Handle(body.origin.clone()),
                Value::from(reply.status as i64),
                body.userdata.get_or_none(),
            ];
            match from_native_args(&reply.data) {
                Ok(values) => args.extend(values),
                Err(err) => tracing::warn!(%api, %verb, error = %err, "reply payloads dropped"),
            }
            if let Err(err) = scope.invoke(&callback, args) {
                tracing::warn!(%api, %verb, error = %err, "subcall callback failed");
            }
        }

        let native = Arc::clone(scope.native());
        scope.registry().release(&call, native.as_ref());
    })
}

/// Main loop startup: invokes `(binder, userdata)`, missing callback is 0
pub(crate) fn startup_hook(
    glue: Weak<GlueShared>,
    binder: Handle,
    callback: Option<ScriptFn>,
    userdata: Value,
) -> StartupFn {
    Box::new(move || {
        let Some(callback) = callback else {
            return 0;
        };
        let Some(mut scope) = Scope::upgrade(&glue) else {
            return ERROR_STATUS;
        };
        match scope
            .invoke(&callback, vec![Value::Handle(binder), userdata])
            .and_then(|v| status_or_zero(&v))
        {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(error = %err, "startup callback failed");
                ERROR_STATUS
            }
        }
    })
}
