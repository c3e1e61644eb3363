//! Binder runtime contract
//!
//! [`NativeBinder`] is what the glue calls into. [`ApiHandler`],
//! [`EventListener`] and [`TimerListener`] are what the runtime calls back.
//! Callbacks may fire on any runtime thread, so every callback object is
//! `Send + Sync`.

use crate::data::Data;
use crate::error::{NativeError, NativeResult};
use crate::native::{NativeData, Reply};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw identifier
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw identifier value
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

native_id!(
    /// Registered API
    ApiId
);
native_id!(
    /// In-flight request
    RequestId
);
native_id!(
    /// Event emitter
    EventId
);
native_id!(
    /// Periodic or countdown timer
    TimerId
);
native_id!(
    /// Posted (delayed) job, always positive
    JobId
);
native_id!(
    /// Scheduler lock held by a blocked `sched_enter`
    LockId
);

// ============================================================================
// Callback payload types
// ============================================================================

/// API lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Root API entry
    RootEntry,
    /// API being declared, verbs may still be added
    PreInit,
    /// API initialisation
    Init,
    /// Every API of the class is ready
    ClassReady,
    /// An event arrived with no matching handler
    OrphanEvent {
        /// Full event name
        name: String,
    },
    /// Runtime is exiting
    Exiting {
        /// Exit code
        code: i32,
    },
}

impl ControlEvent {
    /// Phase tag handed to scripting control callbacks
    pub fn phase(&self) -> &'static str {
        match self {
            ControlEvent::RootEntry => "root",
            ControlEvent::PreInit => "config",
            ControlEvent::Init => "ready",
            ControlEvent::ClassReady => "class",
            ControlEvent::OrphanEvent { .. } => "orphan",
            ControlEvent::Exiting { .. } => "exit",
        }
    }
}

/// Why a posted job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSignal {
    /// Delay elapsed normally
    Run,
    /// Job was aborted before firing; only resources should be released
    Aborted,
}

/// Timer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSpec {
    /// Timer uid, for diagnostics
    pub uid: String,
    /// Tick period in milliseconds, must be positive
    pub period_ms: u64,
    /// Number of ticks, zero for unbounded
    pub count: u32,
}

/// Context a subcall is issued from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    /// Issued by an API on its own behalf
    Api(ApiId),
    /// Issued while serving a request; shares its session
    Request(RequestId),
}

/// Completion of an asynchronous subcall
pub type Completion = Box<dyn FnOnce(Reply) + Send>;
/// One-shot scheduled job
pub type JobFn = Box<dyn FnOnce(JobSignal) + Send>;
/// Body run once a scheduler lock is entered
pub type EnterFn = Box<dyn FnOnce(LockId) + Send>;
/// Main loop startup hook, a non-zero status ends the loop
pub type StartupFn = Box<dyn FnOnce() -> i32 + Send>;

// ============================================================================
// Registration side-table
// ============================================================================

/// A verb or event-pattern registration.
///
/// Keeps the configuration the registration was declared with, including its
/// callable leaf, plus a side-table slot the dispatching layer fills on first
/// use so repeat invocations skip callable resolution.
pub struct Registration {
    uid: String,
    name: String,
    info: Option<String>,
    config: Data,
    side_table: OnceCell<Arc<dyn Any + Send + Sync>>,
}

impl Registration {
    /// Create a registration
    pub fn new(uid: impl Into<String>, name: impl Into<String>, config: Data) -> Self {
        let info = config.get_str("info").map(str::to_string);
        Self {
            uid: uid.into(),
            name: name.into(),
            info,
            config,
            side_table: OnceCell::new(),
        }
    }

    /// Create from a config object naming itself under `key`
    /// (`"verb"` for verbs, `"pattern"` for event handlers).
    /// The uid defaults to the name.
    pub fn from_config(config: Data, key: &str) -> NativeResult<Self> {
        let name = config
            .get_str(key)
            .ok_or_else(|| NativeError::InvalidConfig(format!("missing '{}' string", key)))?
            .to_string();
        let uid = config.get_str("uid").unwrap_or(&name).to_string();
        Ok(Self::new(uid, name, config))
    }

    /// Registration uid
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Verb name or event pattern
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    /// Configuration as declared
    pub fn config(&self) -> &Data {
        &self.config
    }

    /// Side-table slot owned by the dispatching layer
    pub fn side_table(&self) -> &OnceCell<Arc<dyn Any + Send + Sync>> {
        &self.side_table
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("cached", &self.side_table.get().is_some())
            .finish()
    }
}

// ============================================================================
// Dispatch contract (implemented by the glue)
// ============================================================================

/// Entry points of a glue-backed API
pub trait ApiHandler: Send + Sync {
    /// Lifecycle notification, returns a status (negative aborts pre-init)
    fn on_control(&self, api: ApiId, event: &ControlEvent) -> i32;

    /// Verb invocation; the handler must eventually reply through
    /// [`NativeBinder::reply`]
    fn on_verb(&self, request: RequestId, verb: &Arc<Registration>, args: Vec<NativeData>);

    /// Event matching a pattern declared in the API configuration
    fn on_event(&self, api: ApiId, handler: &Arc<Registration>, event: &str, args: Vec<NativeData>);

    /// Description served by the implicit `info` verb
    fn on_info(&self, api: ApiId, verbs: &[Arc<Registration>]) -> Data;
}

/// Pattern handler registered after API creation
pub trait EventListener: Send + Sync {
    /// Event matching the registered pattern
    fn on_event(&self, api: ApiId, event: &str, args: Vec<NativeData>);
}

/// Timer tick sink
pub trait TimerListener: Send + Sync {
    /// Tick; `remaining` counts this tick, zero means unbounded
    fn on_tick(&self, timer: TimerId, remaining: u32);
}

// ============================================================================
// Call-out contract (implemented by the runtime)
// ============================================================================

/// Binder runtime operations
pub trait NativeBinder: Send + Sync {
    // ------------------------------------------------------------------------
    // Binder lifecycle
    // ------------------------------------------------------------------------

    /// Configure the runtime, returns the root API
    fn configure(&self, config: &Data) -> NativeResult<ApiId>;

    /// Run the main loop until exit; returns the exit status
    fn start(&self, startup: Option<StartupFn>) -> i32;

    /// Request main loop exit
    fn exit(&self, code: i32);

    /// Load a binding described by `config`
    fn load_binding(&self, config: &Data) -> NativeResult<()>;

    // ------------------------------------------------------------------------
    // APIs and verbs
    // ------------------------------------------------------------------------

    /// Create a local API; pre-init control runs before this returns
    fn create_api(&self, config: &Data, handler: Arc<dyn ApiHandler>) -> NativeResult<ApiId>;

    /// Import a remote API described by its `uri`
    fn import_api(&self, config: &Data) -> NativeResult<ApiId>;

    /// Add a verb to an API
    fn add_verb(&self, api: ApiId, config: &Data) -> NativeResult<Arc<Registration>>;

    /// Resolve an API by name
    fn find_api(&self, name: &str) -> Option<ApiId>;

    /// Name of an API
    fn api_name(&self, api: ApiId) -> Option<String>;

    // ------------------------------------------------------------------------
    // Requests and sessions
    // ------------------------------------------------------------------------

    /// API serving a request
    fn request_api(&self, request: RequestId) -> Option<ApiId>;

    /// Reply to a request
    fn reply(&self, request: RequestId, status: i32, data: Vec<NativeData>) -> NativeResult<()>;

    /// Subscribe the request's caller to an event
    fn subscribe(&self, request: RequestId, event: EventId) -> NativeResult<()>;

    /// Unsubscribe the request's caller from an event
    fn unsubscribe(&self, request: RequestId, event: EventId) -> NativeResult<()>;

    /// Set the assurance level of the request's session
    fn set_loa(&self, request: RequestId, loa: u32) -> NativeResult<()>;

    /// Client session description
    fn client_info(&self, request: RequestId) -> NativeResult<Data>;

    // ------------------------------------------------------------------------
    // Subcalls
    // ------------------------------------------------------------------------

    /// Call a verb and wait for its reply
    fn call_sync(
        &self,
        origin: CallOrigin,
        api: &str,
        verb: &str,
        args: Vec<NativeData>,
    ) -> NativeResult<Reply>;

    /// Call a verb, `done` fires once with the reply
    fn call_async(
        &self,
        origin: CallOrigin,
        api: &str,
        verb: &str,
        args: Vec<NativeData>,
        done: Completion,
    ) -> NativeResult<()>;

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Create an event named `<api>/<label>`
    fn new_event(&self, api: ApiId, label: &str) -> NativeResult<EventId>;

    /// Push to subscribers, returns the number of deliveries
    fn push_event(&self, event: EventId, args: Vec<NativeData>) -> NativeResult<usize>;

    /// Drop the event
    fn unref_event(&self, event: EventId);

    /// Register a pattern handler on an API
    fn add_event_handler(
        &self,
        api: ApiId,
        uid: &str,
        pattern: &str,
        listener: Arc<dyn EventListener>,
    ) -> NativeResult<()>;

    /// Remove a pattern handler
    fn remove_event_handler(&self, api: ApiId, pattern: &str) -> NativeResult<()>;

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Create and arm a timer holding one reference
    fn create_timer(
        &self,
        api: ApiId,
        spec: &TimerSpec,
        listener: Arc<dyn TimerListener>,
    ) -> NativeResult<TimerId>;

    /// Take a timer reference
    fn timer_addref(&self, timer: TimerId);

    /// Drop a timer reference, the last one disposes the timer
    fn timer_unref(&self, timer: TimerId);

    // ------------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------------

    /// Run `job` after `delay_ms`
    fn post_job(&self, delay_ms: u64, job: JobFn) -> NativeResult<JobId>;

    /// Cancel a pending job; it still runs once with [`JobSignal::Aborted`]
    fn abort_job(&self, job: JobId) -> NativeResult<()>;

    /// Run `job` on the scheduler and wait for it (zero timeout waits forever)
    fn call_job(&self, timeout_ms: u64, job: JobFn) -> NativeResult<()>;

    /// Enter a scheduler lock: run `enter` then block until
    /// [`NativeBinder::sched_leave`] or timeout (zero waits forever)
    fn sched_enter(&self, timeout_ms: u64, enter: EnterFn) -> NativeResult<()>;

    /// Release an entered lock
    fn sched_leave(&self, lock: LockId) -> NativeResult<()>;
}
