//! Handle registry
//!
//! A [`Handle`] stands for one bridged runtime object together with the
//! script references attached to it. Every kind shares one tagged body,
//! [`HandleBody`], and kind-specific fields are reached through checked
//! accessors. Asking a handle for the wrong kind is a programming error and
//! panics.
//!
//! Lifetimes follow a usage counter:
//!
//! - `addref` increments it and `release` decrements it
//! - the decrement that takes it below zero tears the handle down: the
//!   native resource is dropped and every script reference is released,
//!   exactly once
//! - `Binder`, `Api` and `Request` are owned by the runtime, so their usage
//!   is pinned and `release` never tears them down

use crate::error::{GlueError, GlueResult};
use crate::value::{ScriptFn, Value};
use afb_glue_sdk::{ApiId, EventId, LockId, NativeBinder, Registration, RequestId, TimerId};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Usage reported for runtime-owned kinds
pub const PINNED_USAGE: i64 = i64::MAX;

// ============================================================================
// Kinds
// ============================================================================

/// Handle kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Runtime top-level context
    Binder,
    /// API registration
    Api,
    /// In-flight request
    Request,
    /// Event emitter or pattern handler
    Event,
    /// Periodic or countdown timer
    Timer,
    /// Entered scheduler lock
    Job,
    /// One-shot posted or called job
    PostedCall,
    /// One-shot asynchronous subcall
    AsyncCall,
}

impl HandleKind {
    /// Every kind, in tag order
    pub const ALL: [HandleKind; 8] = [
        HandleKind::Binder,
        HandleKind::Api,
        HandleKind::Request,
        HandleKind::Event,
        HandleKind::Timer,
        HandleKind::Job,
        HandleKind::PostedCall,
        HandleKind::AsyncCall,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether the runtime owns the lifetime of this kind
    pub fn is_pinned(self) -> bool {
        matches!(self, HandleKind::Binder | HandleKind::Api | HandleKind::Request)
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Script reference slots
// ============================================================================

/// One script reference owned by a handle, released at most once
pub struct ScriptRef(Mutex<Option<Value>>);

impl ScriptRef {
    /// Store a reference
    pub fn new(value: Option<Value>) -> Self {
        Self(Mutex::new(value))
    }

    /// Empty slot
    pub fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// Clone of the stored value
    pub fn get(&self) -> Option<Value> {
        self.0.lock().clone()
    }

    /// Stored value, or `None` when empty
    pub fn get_or_none(&self) -> Value {
        self.get().unwrap_or(Value::None)
    }

    /// Stored callable, if the slot holds one
    pub fn callable(&self) -> Option<ScriptFn> {
        self.0.lock().as_ref().and_then(Value::as_callable).cloned()
    }

    /// Whether a value is stored
    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    fn release(&self) -> Option<Value> {
        self.0.lock().take()
    }
}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.lock() {
            Some(v) => write!(f, "ScriptRef({})", v.type_name()),
            None => write!(f, "ScriptRef(released)"),
        }
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// Binder fields
#[derive(Debug)]
pub struct BinderBody {
    /// Binder uid
    pub uid: String,
    /// Root API created by the runtime
    pub root_api: ApiId,
    /// Configuration as given by the script
    pub config: Value,
}

/// API fields
#[derive(Debug)]
pub struct ApiBody {
    api: OnceCell<ApiId>,
    /// API name
    pub name: String,
    /// Configuration as given by the script
    pub config: Value,
    /// Optional control callable
    pub control: Option<ScriptFn>,
}

impl ApiBody {
    /// Create an API body not yet bound to a runtime id
    pub fn new(name: impl Into<String>, config: Value, control: Option<ScriptFn>) -> Self {
        Self {
            api: OnceCell::new(),
            name: name.into(),
            config,
            control,
        }
    }

    /// Runtime id, once the runtime declared the API
    pub fn api(&self) -> Option<ApiId> {
        self.api.get().copied()
    }

    /// Bind the runtime id; later binds are ignored
    pub fn bind(&self, api: ApiId) {
        let _ = self.api.set(api);
    }
}

/// Request fields
#[derive(Debug)]
pub struct RequestBody {
    /// Runtime request
    pub request: RequestId,
    /// API serving the request
    pub api: ApiId,
    /// Verb registration being served
    pub verb: Arc<Registration>,
    /// User data attached to the verb
    pub userdata: Option<Value>,
    replied: AtomicBool,
}

impl RequestBody {
    /// Create a request body
    pub fn new(
        request: RequestId,
        api: ApiId,
        verb: Arc<Registration>,
        userdata: Option<Value>,
    ) -> Self {
        Self {
            request,
            api,
            verb,
            userdata,
            replied: AtomicBool::new(false),
        }
    }

    /// Claim the single reply; false when already replied
    pub fn claim_reply(&self) -> bool {
        !self.replied.swap(true, Ordering::AcqRel)
    }

    /// Whether a reply was sent
    pub fn replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }
}

/// What an event handle stands for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// Event created by the script and pushed to subscribers
    Emitter {
        /// Runtime event
        event: EventId,
        /// Full event name
        name: String,
    },
    /// Pattern handler receiving events
    Handler {
        /// Glob pattern
        pattern: String,
    },
}

/// Event fields
#[derive(Debug)]
pub struct EventBody {
    /// Owning API
    pub api: ApiId,
    /// Event or handler uid
    pub uid: String,
    /// Emitter or handler
    pub source: EventSource,
    /// Configuration as given by the script
    pub config: ScriptRef,
    /// Handler callable
    pub callback: ScriptRef,
    /// Handler user data
    pub userdata: ScriptRef,
    count: AtomicU64,
}

impl EventBody {
    /// Create an event body
    pub fn new(api: ApiId, uid: impl Into<String>, source: EventSource, config: Value) -> Self {
        Self {
            api,
            uid: uid.into(),
            source,
            config: ScriptRef::new(Some(config)),
            callback: ScriptRef::empty(),
            userdata: ScriptRef::empty(),
            count: AtomicU64::new(0),
        }
    }

    /// Attach handler callable and user data
    pub fn with_callback(self, callback: ScriptFn, userdata: Value) -> Self {
        Self {
            callback: ScriptRef::new(Some(Value::Callable(callback))),
            userdata: ScriptRef::new(Some(userdata)),
            ..self
        }
    }

    /// Count one push or delivery, returns the new total
    pub fn bump(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pushes or deliveries so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Timer fields
#[derive(Debug)]
pub struct TimerBody {
    /// Owning API
    pub api: ApiId,
    /// Timer uid
    pub uid: String,
    /// Period in milliseconds
    pub period_ms: u64,
    /// Tick count, zero for unbounded
    pub count: u32,
    timer: OnceCell<TimerId>,
    /// Configuration as given by the script
    pub config: ScriptRef,
    /// Tick callable
    pub callback: ScriptRef,
    /// Tick user data
    pub userdata: ScriptRef,
}

impl TimerBody {
    /// Create a timer body not yet armed
    pub fn new(
        api: ApiId,
        uid: impl Into<String>,
        period_ms: u64,
        count: u32,
        config: Value,
        callback: ScriptFn,
        userdata: Value,
    ) -> Self {
        Self {
            api,
            uid: uid.into(),
            period_ms,
            count,
            timer: OnceCell::new(),
            config: ScriptRef::new(Some(config)),
            callback: ScriptRef::new(Some(Value::Callable(callback))),
            userdata: ScriptRef::new(Some(userdata)),
        }
    }

    /// Runtime timer, once armed
    pub fn timer(&self) -> Option<TimerId> {
        self.timer.get().copied()
    }

    /// Bind the runtime timer
    pub fn bind(&self, timer: TimerId) {
        let _ = self.timer.set(timer);
    }
}

/// Scheduler lock states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for the scheduler to enter
    Idle,
    /// Lock held, caller blocked until leave
    Entered,
    /// Leave status set by the completing side
    Completed(i64),
    /// Lock handed back, references released
    Released,
}

/// Job fields
#[derive(Debug)]
pub struct JobBody {
    /// Handle the job was entered from
    pub origin: Handle,
    state: Mutex<JobState>,
    lock: OnceCell<LockId>,
    /// Enter callable
    pub callback: ScriptRef,
    /// Enter user data
    pub userdata: ScriptRef,
}

impl JobBody {
    /// Create an idle job
    pub fn new(origin: Handle, callback: ScriptFn, userdata: Value) -> Self {
        Self {
            origin,
            state: Mutex::new(JobState::Idle),
            lock: OnceCell::new(),
            callback: ScriptRef::new(Some(Value::Callable(callback))),
            userdata: ScriptRef::new(Some(userdata)),
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Scheduler lock, once entered
    pub fn lock(&self) -> Option<LockId> {
        self.lock.get().copied()
    }

    /// `Idle -> Entered`
    pub fn enter(&self, lock: LockId) -> GlueResult<()> {
        let mut state = self.state.lock();
        match *state {
            JobState::Idle => {
                let _ = self.lock.set(lock);
                *state = JobState::Entered;
                Ok(())
            }
            other => Err(GlueError::protocol(format!("job cannot enter from {:?}", other))),
        }
    }

    /// `Entered -> Completed`, returns the lock to hand back
    pub fn complete(&self, status: i64) -> GlueResult<LockId> {
        let mut state = self.state.lock();
        match (*state, self.lock()) {
            (JobState::Entered, Some(lock)) => {
                *state = JobState::Completed(status);
                Ok(lock)
            }
            (other, _) => Err(GlueError::protocol(format!("job cannot leave from {:?}", other))),
        }
    }

    /// Status set by leave, if any
    pub fn status(&self) -> Option<i64> {
        match self.state() {
            JobState::Completed(status) => Some(status),
            _ => None,
        }
    }
}

/// Posted-call and async-call fields
#[derive(Debug)]
pub struct CallBody {
    /// Handle the call was issued from
    pub origin: Handle,
    /// Completion callable
    pub callback: ScriptRef,
    /// Completion user data
    pub userdata: ScriptRef,
    status: Mutex<Option<i64>>,
}

impl CallBody {
    /// Create a one-shot call body
    pub fn new(origin: Handle, callback: ScriptFn, userdata: Value) -> Self {
        Self {
            origin,
            callback: ScriptRef::new(Some(Value::Callable(callback))),
            userdata: ScriptRef::new(Some(userdata)),
            status: Mutex::new(None),
        }
    }

    /// Record the callable's status
    pub fn set_status(&self, status: i64) {
        *self.status.lock() = Some(status);
    }

    /// Status recorded by the callable
    pub fn status(&self) -> Option<i64> {
        *self.status.lock()
    }
}

/// Kind-tagged handle body
#[derive(Debug)]
pub enum HandleBody {
    /// Binder
    Binder(BinderBody),
    /// API
    Api(ApiBody),
    /// Request
    Request(RequestBody),
    /// Event
    Event(EventBody),
    /// Timer
    Timer(TimerBody),
    /// Job
    Job(JobBody),
    /// Posted call
    PostedCall(CallBody),
    /// Async call
    AsyncCall(CallBody),
}

impl HandleBody {
    /// Kind tag of this body
    pub fn kind(&self) -> HandleKind {
        match self {
            HandleBody::Binder(_) => HandleKind::Binder,
            HandleBody::Api(_) => HandleKind::Api,
            HandleBody::Request(_) => HandleKind::Request,
            HandleBody::Event(_) => HandleKind::Event,
            HandleBody::Timer(_) => HandleKind::Timer,
            HandleBody::Job(_) => HandleKind::Job,
            HandleBody::PostedCall(_) => HandleKind::PostedCall,
            HandleBody::AsyncCall(_) => HandleKind::AsyncCall,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Default)]
struct RegistryStats {
    live: [AtomicUsize; 8],
    torn_down: [AtomicUsize; 8],
}

struct HandleInner {
    id: u64,
    usage: Mutex<i64>,
    released: AtomicBool,
    body: HandleBody,
    stats: Arc<RegistryStats>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.stats.live[self.body.kind().index()].fetch_sub(1, Ordering::Relaxed);
    }
}

/// Reference-counted bridged object
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

macro_rules! body_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        #[doc = concat!("Body of a `", stringify!($variant), "` handle; panics on any other kind")]
        #[track_caller]
        pub fn $name(&self) -> &$ty {
            match &self.0.body {
                HandleBody::$variant(body) => body,
                other => panic!(
                    "handle kind mismatch: expected {}, found {}",
                    HandleKind::$variant,
                    other.kind()
                ),
            }
        }
    };
}

impl Handle {
    /// Unique handle id
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Kind tag
    pub fn kind(&self) -> HandleKind {
        self.0.body.kind()
    }

    /// Tagged body
    pub fn body(&self) -> &HandleBody {
        &self.0.body
    }

    /// Current usage, [`PINNED_USAGE`] for runtime-owned kinds
    pub fn usage(&self) -> i64 {
        if self.kind().is_pinned() {
            PINNED_USAGE
        } else {
            *self.0.usage.lock()
        }
    }

    /// Whether teardown already ran
    pub fn is_released(&self) -> bool {
        self.0.released.load(Ordering::Acquire)
    }

    body_accessor!(as_binder, Binder, BinderBody);
    body_accessor!(as_api, Api, ApiBody);
    body_accessor!(as_request, Request, RequestBody);
    body_accessor!(as_event, Event, EventBody);
    body_accessor!(as_timer, Timer, TimerBody);
    body_accessor!(as_job, Job, JobBody);

    /// Body of a `PostedCall` or `AsyncCall` handle; panics on any other kind
    #[track_caller]
    pub fn as_call(&self) -> &CallBody {
        match &self.0.body {
            HandleBody::PostedCall(body) | HandleBody::AsyncCall(body) => body,
            other => panic!(
                "handle kind mismatch: expected PostedCall or AsyncCall, found {}",
                other.kind()
            ),
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handle {}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} handle #{}>", self.kind(), self.id())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Outcome of [`HandleRegistry::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Runtime-owned kind, nothing done
    Pinned,
    /// Usage decremented, handle still alive
    Retained(i64),
    /// Teardown ran
    TornDown,
    /// Teardown already ran earlier
    AlreadyReleased,
}

/// Allocates handles and runs their teardown
pub struct HandleRegistry {
    next_id: AtomicU64,
    stats: Arc<RegistryStats>,
}

impl HandleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            stats: Arc::new(RegistryStats::default()),
        }
    }

    /// Allocate a handle with usage zero
    pub fn create(&self, body: HandleBody) -> Handle {
        let kind = body.kind();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stats.live[kind.index()].fetch_add(1, Ordering::Relaxed);
        tracing::trace!(handle = id, %kind, "handle created");
        Handle(Arc::new(HandleInner {
            id,
            usage: Mutex::new(0),
            released: AtomicBool::new(false),
            body,
            stats: Arc::clone(&self.stats),
        }))
    }

    /// Take a usage reference, mirrored on the runtime for timers
    pub fn addref(&self, handle: &Handle, native: &dyn NativeBinder) -> GlueResult<i64> {
        if handle.kind().is_pinned() {
            return Ok(PINNED_USAGE);
        }
        let mut usage = handle.0.usage.lock();
        if handle.is_released() {
            return Err(GlueError::protocol(format!("{} already released", handle)));
        }
        *usage += 1;
        if let (HandleBody::Timer(timer), Some(id)) = (&handle.0.body, handle.as_timer_id()) {
            tracing::trace!(uid = %timer.uid, usage = *usage, "timer addref");
            native.timer_addref(id);
        }
        Ok(*usage)
    }

    /// Drop a usage reference; the one crossing below zero tears down
    pub fn release(&self, handle: &Handle, native: &dyn NativeBinder) -> Release {
        if handle.kind().is_pinned() {
            return Release::Pinned;
        }

        {
            let mut usage = handle.0.usage.lock();
            if handle.is_released() {
                return Release::AlreadyReleased;
            }
            *usage -= 1;
            if *usage >= 0 {
                if let Some(id) = handle.as_timer_id() {
                    native.timer_unref(id);
                }
                return Release::Retained(*usage);
            }
            handle.0.released.store(true, Ordering::Release);
        }

        self.teardown(handle, native);
        Release::TornDown
    }

    /// Mark a handle released without touching the runtime, for handles
    /// whose native side was never created
    pub fn discard(&self, handle: &Handle) -> Release {
        if handle.kind().is_pinned() {
            return Release::Pinned;
        }
        let _usage = handle.0.usage.lock();
        if handle.0.released.swap(true, Ordering::AcqRel) {
            return Release::AlreadyReleased;
        }
        match &handle.0.body {
            HandleBody::Timer(timer) => {
                timer.callback.release();
                timer.userdata.release();
                timer.config.release();
            }
            HandleBody::Event(event) => {
                event.callback.release();
                event.userdata.release();
                event.config.release();
            }
            HandleBody::Job(job) => {
                *job.state.lock() = JobState::Released;
                job.callback.release();
                job.userdata.release();
            }
            HandleBody::PostedCall(call) | HandleBody::AsyncCall(call) => {
                call.callback.release();
                call.userdata.release();
            }
            HandleBody::Binder(_) | HandleBody::Api(_) | HandleBody::Request(_) => {}
        }
        tracing::trace!(handle = handle.id(), kind = %handle.kind(), "handle discarded");
        Release::TornDown
    }

    fn teardown(&self, handle: &Handle, native: &dyn NativeBinder) {
        let kind = handle.kind();
        match &handle.0.body {
            HandleBody::Timer(timer) => {
                if let Some(id) = timer.timer() {
                    native.timer_unref(id);
                }
                timer.callback.release();
                timer.userdata.release();
                timer.config.release();
            }
            HandleBody::Event(event) => {
                match &event.source {
                    EventSource::Emitter { event: id, .. } => native.unref_event(*id),
                    EventSource::Handler { pattern } => {
                        if let Err(err) = native.remove_event_handler(event.api, pattern) {
                            tracing::debug!(%pattern, error = %err, "event handler already gone");
                        }
                    }
                }
                event.callback.release();
                event.userdata.release();
                event.config.release();
            }
            HandleBody::Job(job) => {
                *job.state.lock() = JobState::Released;
                job.callback.release();
                job.userdata.release();
            }
            HandleBody::PostedCall(call) | HandleBody::AsyncCall(call) => {
                call.callback.release();
                call.userdata.release();
            }
            HandleBody::Binder(_) | HandleBody::Api(_) | HandleBody::Request(_) => {
                unreachable!("runtime-owned handles are never torn down")
            }
        }
        self.stats.torn_down[kind.index()].fetch_add(1, Ordering::Relaxed);
        tracing::trace!(handle = handle.id(), %kind, "handle torn down");
    }

    /// Resolve the API owning a handle, whatever its kind
    pub fn native_api(&self, handle: &Handle, native: &dyn NativeBinder) -> Option<ApiId> {
        match &handle.0.body {
            HandleBody::Binder(binder) => Some(binder.root_api),
            HandleBody::Api(api) => api.api(),
            HandleBody::Request(req) => native.request_api(req.request).or(Some(req.api)),
            HandleBody::Event(event) => Some(event.api),
            HandleBody::Timer(timer) => Some(timer.api),
            HandleBody::Job(job) => self.native_api(&job.origin, native),
            HandleBody::PostedCall(call) | HandleBody::AsyncCall(call) => {
                self.native_api(&call.origin, native)
            }
        }
    }

    /// Handles of `kind` currently allocated
    pub fn live(&self, kind: HandleKind) -> usize {
        self.stats.live[kind.index()].load(Ordering::Relaxed)
    }

    /// Teardowns run for `kind`
    pub fn torn_down(&self, kind: HandleKind) -> usize {
        self.stats.torn_down[kind.index()].load(Ordering::Relaxed)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Handle {
    fn as_timer_id(&self) -> Option<TimerId> {
        match &self.0.body {
            HandleBody::Timer(timer) => timer.timer(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GlueResult;
    use crate::testing::CountingBinder;
    use afb_glue_sdk::{Data, TimerListener, TimerSpec};

    fn noop(name: &str) -> ScriptFn {
        ScriptFn::new(name, |_, _| -> GlueResult<Value> { Ok(Value::None) })
    }

    fn timer_handle(registry: &HandleRegistry, native: &CountingBinder, cb: &ScriptFn) -> Handle {
        let body = TimerBody::new(
            ApiId::from_raw(2),
            "tick",
            10,
            0,
            Value::None,
            cb.clone(),
            Value::from("ud"),
        );
        let handle = registry.create(HandleBody::Timer(body));
        let spec = TimerSpec {
            uid: "tick".into(),
            period_ms: 10,
            count: 0,
        };
        let id = native
            .create_timer(ApiId::from_raw(2), &spec, Arc::new(NoTick))
            .unwrap();
        handle.as_timer().bind(id);
        handle
    }

    struct NoTick;
    impl TimerListener for NoTick {
        fn on_tick(&self, _: TimerId, _: u32) {}
    }

    #[test]
    fn test_addref_unref_pair_keeps_timer() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let cb = noop("tick");
        let handle = timer_handle(&registry, &native, &cb);

        assert_eq!(registry.addref(&handle, &native).unwrap(), 1);
        assert_eq!(*native.timer_refs.lock(), 2);
        assert_eq!(registry.release(&handle, &native), Release::Retained(0));
        assert_eq!(*native.timer_refs.lock(), 1);
        assert_eq!(handle.usage(), 0);
        assert!(!handle.is_released());
        assert!(handle.as_timer().callback.is_set());
    }

    #[test]
    fn test_release_below_zero_tears_down_once() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let cb = noop("tick");
        let handle = timer_handle(&registry, &native, &cb);
        let before = cb.ref_count();

        assert_eq!(registry.release(&handle, &native), Release::TornDown);
        assert_eq!(*native.timer_refs.lock(), 0);
        assert_eq!(cb.ref_count(), before - 1);
        assert!(handle.is_released());
        assert!(!handle.as_timer().userdata.is_set());

        assert_eq!(registry.release(&handle, &native), Release::AlreadyReleased);
        assert_eq!(*native.timer_refs.lock(), 0);
        assert_eq!(registry.torn_down(HandleKind::Timer), 1);
        assert!(registry.addref(&handle, &native).is_err());
    }

    #[test]
    fn test_pinned_kinds_never_released() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let api = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));

        assert_eq!(registry.release(&api, &native), Release::Pinned);
        assert_eq!(registry.release(&api, &native), Release::Pinned);
        assert_eq!(api.usage(), PINNED_USAGE);
        assert!(!api.is_released());
    }

    #[test]
    fn test_emitter_teardown_unrefs_event() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let source = EventSource::Emitter {
            event: EventId::from_raw(9),
            name: "demo/tick".into(),
        };
        let handle = registry.create(HandleBody::Event(EventBody::new(
            ApiId::from_raw(2),
            "tick",
            source,
            Value::None,
        )));

        assert_eq!(registry.release(&handle, &native), Release::TornDown);
        assert_eq!(*native.events_dropped.lock(), 1);
    }

    #[test]
    fn test_native_api_resolution() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let binder = registry.create(HandleBody::Binder(BinderBody {
            uid: "binder".into(),
            root_api: ApiId::from_raw(1),
            config: Value::None,
        }));
        let api = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));
        assert_eq!(registry.native_api(&api, &native), None);
        api.as_api().bind(ApiId::from_raw(2));

        let call = registry.create(HandleBody::PostedCall(CallBody::new(
            api.clone(),
            noop("later"),
            Value::None,
        )));

        assert_eq!(registry.native_api(&binder, &native), Some(ApiId::from_raw(1)));
        assert_eq!(registry.native_api(&api, &native), Some(ApiId::from_raw(2)));
        assert_eq!(registry.native_api(&call, &native), Some(ApiId::from_raw(2)));
    }

    #[test]
    fn test_live_counts_follow_drop() {
        let registry = HandleRegistry::new();
        let handle = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));
        assert_eq!(registry.live(HandleKind::Api), 1);
        drop(handle);
        assert_eq!(registry.live(HandleKind::Api), 0);
    }

    #[test]
    fn test_job_state_machine() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let origin = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));
        let job = registry.create(HandleBody::Job(JobBody::new(origin, noop("enter"), Value::None)));
        let body = job.as_job();

        assert!(body.complete(0).is_err());
        body.enter(LockId::from_raw(4)).unwrap();
        assert_eq!(body.state(), JobState::Entered);
        assert!(body.enter(LockId::from_raw(5)).is_err());
        assert_eq!(body.complete(7).unwrap(), LockId::from_raw(4));
        assert_eq!(body.status(), Some(7));
        assert!(body.complete(8).is_err());

        registry.release(&job, &native);
        assert_eq!(body.state(), JobState::Released);
    }

    #[test]
    fn test_enter_after_timeout_release() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let origin = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));
        let job = registry.create(HandleBody::Job(JobBody::new(origin, noop("enter"), Value::None)));

        registry.release(&job, &native);
        let err = job.as_job().enter(LockId::from_raw(9)).unwrap_err();
        assert!(err.to_string().contains("Released"), "unexpected {}", err);
        assert_eq!(job.as_job().lock(), None);
    }

    #[test]
    fn test_discard_skips_runtime() {
        let registry = HandleRegistry::new();
        let native = CountingBinder::default();
        let cb = noop("tick");
        let before = cb.ref_count();
        let handle = registry.create(HandleBody::Timer(TimerBody::new(
            ApiId::from_raw(2),
            "tick",
            10,
            0,
            Value::None,
            cb.clone(),
            Value::None,
        )));
        assert_eq!(cb.ref_count(), before + 1);

        assert_eq!(registry.discard(&handle), Release::TornDown);
        assert_eq!(cb.ref_count(), before);
        assert_eq!(registry.release(&handle, &native), Release::AlreadyReleased);
        assert_eq!(*native.timer_refs.lock(), 0);
    }

    #[test]
    #[should_panic(expected = "handle kind mismatch")]
    fn test_kind_mismatch_panics() {
        let registry = HandleRegistry::new();
        let api = registry.create(HandleBody::Api(ApiBody::new("demo", Value::None, None)));
        let _ = api.as_timer();
    }

    #[test]
    fn test_request_replies_once() {
        let reg = Arc::new(Registration::new("ping", "ping", Data::Null));
        let body = RequestBody::new(RequestId::from_raw(1), ApiId::from_raw(2), reg, None);
        assert!(body.claim_reply());
        assert!(!body.claim_reply());
        assert!(body.replied());
    }
}
