//! In-process binder runtime
//!
//! [`LocalBinder`] keeps every API, request, event, timer, job and
//! scheduler lock in process-local tables and runs callbacks on its own
//! worker pool. Synchronous subcalls run the target verb inline on the
//! calling thread; everything else is dispatched to workers.

use crate::api::{ApiEntry, HandlerTarget, PatternHandler};
use crate::config::{ApiConfig, BinderConfig};
use crate::scheduler::{Scheduler, Task};
use crate::session::{request_label, ReplySink, RequestEntry, Session};
use crate::timer::TimerEntry;
use afb_glue_sdk::{
    ApiHandler, ApiId, BinderErrno, CallOrigin, Completion, ControlEvent, Data, EnterFn, EventId,
    EventListener, JobFn, JobId, JobSignal, LockId, NativeBinder, NativeData, NativeError,
    NativeResult, Registration, Reply, RequestId, StartupFn, TimerId, TimerListener, TimerSpec,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Verb every local API answers unless it declares its own
const INFO_VERB: &str = "info";

struct EventEntry {
    name: String,
    /// Caller APIs subscribed through a request
    subscribers: FxHashSet<ApiId>,
}

struct Configured {
    config: BinderConfig,
    root: ApiId,
    scheduler: Arc<Scheduler>,
}

#[derive(Default)]
struct MainLoop {
    running: bool,
    exit: Option<i32>,
}

enum Target {
    Verb(Arc<Registration>),
    Info,
}

/// A subcall target that accepted the call
struct Resolved {
    api: Arc<ApiEntry>,
    handler: Arc<dyn ApiHandler>,
    target: Target,
    session: Arc<Session>,
}

struct Inner {
    configured: RwLock<Option<Configured>>,
    apis: RwLock<FxHashMap<ApiId, Arc<ApiEntry>>>,
    names: RwLock<FxHashMap<String, ApiId>>,
    requests: Mutex<FxHashMap<RequestId, Arc<RequestEntry>>>,
    sessions: Mutex<FxHashMap<ApiId, Arc<Session>>>,
    events: Mutex<FxHashMap<EventId, EventEntry>>,
    timers: Mutex<FxHashMap<TimerId, Arc<TimerEntry>>>,
    jobs: Mutex<FxHashMap<JobId, JobFn>>,
    locks: Mutex<FxHashMap<LockId, Sender<()>>>,
    bindings: Mutex<FxHashMap<String, Arc<dyn ApiHandler>>>,
    main: Mutex<MainLoop>,
    main_cv: Condvar,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn scheduler(&self) -> NativeResult<Arc<Scheduler>> {
        self.configured
            .read()
            .as_ref()
            .map(|c| Arc::clone(&c.scheduler))
            .ok_or_else(|| NativeError::Failed("binder not configured".into()))
    }

    fn call_timeout_ms(&self) -> u64 {
        self.configured
            .read()
            .as_ref()
            .map_or(crate::config::DEFAULT_CALL_TIMEOUT_MS, |c| c.config.call_timeout_ms)
    }

    // ------------------------------------------------------------------------
    // APIs
    // ------------------------------------------------------------------------

    fn api(&self, id: ApiId) -> NativeResult<Arc<ApiEntry>> {
        self.apis
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| NativeError::not_found("api", id))
    }

    fn register_api(&self, entry: ApiEntry) -> NativeResult<Arc<ApiEntry>> {
        let mut names = self.names.write();
        if names.contains_key(&entry.name) {
            return Err(NativeError::already_exists("api", &entry.name));
        }
        let entry = Arc::new(entry);
        names.insert(entry.name.clone(), entry.id);
        self.apis.write().insert(entry.id, Arc::clone(&entry));
        tracing::debug!(api = %entry.name, id = %entry.id, "api registered");
        Ok(entry)
    }

    fn unregister_api(&self, id: ApiId) {
        let mut names = self.names.write();
        if let Some(entry) = self.apis.write().remove(&id) {
            names.remove(&entry.name);
        }
    }

    /// Local APIs in declaration order
    fn local_apis(&self) -> Vec<(Arc<ApiEntry>, Arc<dyn ApiHandler>)> {
        let mut apis: Vec<_> = self
            .apis
            .read()
            .values()
            .filter_map(|e| e.handler.clone().map(|h| (Arc::clone(e), h)))
            .collect();
        apis.sort_by_key(|(e, _)| e.id);
        apis
    }

    fn broadcast(&self, event: &ControlEvent) {
        for (api, handler) in self.local_apis() {
            let status = handler.on_control(api.id, event);
            if status < 0 {
                tracing::warn!(api = %api.name, phase = event.phase(), status, "control callback failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Subcalls
    // ------------------------------------------------------------------------

    fn session_for(&self, origin: CallOrigin) -> NativeResult<Arc<Session>> {
        match origin {
            CallOrigin::Request(request) => self
                .requests
                .lock()
                .get(&request)
                .map(|r| Arc::clone(&r.session))
                .ok_or_else(|| NativeError::not_found("request", request)),
            CallOrigin::Api(api) => {
                let name = self.api(api)?.name.clone();
                let mut sessions = self.sessions.lock();
                let session = sessions
                    .entry(api)
                    .or_insert_with(|| Arc::new(Session::new(api, name)));
                Ok(Arc::clone(session))
            }
        }
    }

    fn resolve(&self, origin: CallOrigin, api: &str, verb: &str) -> Result<Resolved, BinderErrno> {
        let id = self.names.read().get(api).copied().ok_or(BinderErrno::UnknownApi)?;
        let entry = self.api(id).map_err(|_| BinderErrno::UnknownApi)?;
        if entry.uri.is_some() {
            return Err(BinderErrno::NotAvailable);
        }
        let handler = entry.handler.clone().ok_or(BinderErrno::UnknownVerb)?;
        let target = match entry.verb(verb) {
            Some(reg) => Target::Verb(reg),
            None if verb == INFO_VERB => Target::Info,
            None => return Err(BinderErrno::UnknownVerb),
        };
        let session = self.session_for(origin).map_err(|_| BinderErrno::InvalidRequest)?;

        if let Target::Verb(reg) = &target {
            let required = reg.config().get("loa").and_then(Data::as_u64).unwrap_or(0);
            if required > session.loa() as u64 {
                return Err(BinderErrno::Unauthorized);
            }
        }
        Ok(Resolved {
            api: entry,
            handler,
            target,
            session,
        })
    }

    /// Run a resolved call; returns the request id when a verb was invoked
    fn invoke(&self, call: Resolved, args: Vec<NativeData>, sink: ReplySink) -> Option<RequestId> {
        match call.target {
            Target::Info => {
                let info = call.handler.on_info(call.api.id, &call.api.verbs());
                self.deliver(sink, Reply::new(0, vec![NativeData::Tree(info)]));
                None
            }
            Target::Verb(verb) => {
                let id = RequestId::from_raw(self.next_id());
                let entry = RequestEntry::new(call.api.id, Arc::clone(&verb), call.session, sink);
                tracing::trace!(request = %request_label(id, &entry), api = %call.api.name, "verb call");
                self.requests.lock().insert(id, Arc::new(entry));
                call.handler.on_verb(id, &verb, args);
                Some(id)
            }
        }
    }

    fn deliver(&self, sink: ReplySink, reply: Reply) {
        match sink {
            ReplySink::Sync(tx) => {
                if tx.send(reply).is_err() {
                    tracing::debug!("synchronous caller gone, reply dropped");
                }
            }
            ReplySink::Async(done) => self.complete(done, reply),
        }
    }

    fn complete(&self, done: Completion, reply: Reply) {
        let spawned = self
            .scheduler()
            .and_then(|s| s.spawn(Box::new(move || done(reply))));
        if let Err(err) = spawned {
            tracing::error!(error = %err, "completion dropped");
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn arm_timer(self: &Arc<Self>, scheduler: &Scheduler, entry: &TimerEntry) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let id = entry.id;
        let key = scheduler.schedule(
            entry.period,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.tick(id);
                }
            }),
        );
        entry.set_pending(Some(key));
    }

    fn tick(self: &Arc<Self>, id: TimerId) {
        let Some(entry) = self.timers.lock().get(&id).cloned() else {
            return;
        };
        entry.set_pending(None);
        entry.listener.on_tick(id, entry.remaining());

        if !entry.consume() {
            tracing::debug!(uid = %entry.uid, "timer count exhausted");
            return;
        }
        if !self.timers.lock().contains_key(&id) {
            return;
        }
        if let Ok(scheduler) = self.scheduler() {
            self.arm_timer(&scheduler, &entry);
        }
    }
}

fn wait(rx: &Receiver<()>, timeout_ms: u64) -> NativeResult<()> {
    let dropped = || NativeError::Failed("scheduler task dropped before completion".into());
    if timeout_ms == 0 {
        return rx.recv().map_err(|_| dropped());
    }
    match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(()) => Ok(()),
        Err(RecvTimeoutError::Timeout) => Err(NativeError::Timeout(timeout_ms)),
        Err(RecvTimeoutError::Disconnected) => Err(dropped()),
    }
}

// ============================================================================
// LocalBinder
// ============================================================================

/// In-process binder runtime
pub struct LocalBinder {
    inner: Arc<Inner>,
}

impl LocalBinder {
    /// Create an unconfigured runtime
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                configured: RwLock::new(None),
                apis: RwLock::new(FxHashMap::default()),
                names: RwLock::new(FxHashMap::default()),
                requests: Mutex::new(FxHashMap::default()),
                sessions: Mutex::new(FxHashMap::default()),
                events: Mutex::new(FxHashMap::default()),
                timers: Mutex::new(FxHashMap::default()),
                jobs: Mutex::new(FxHashMap::default()),
                locks: Mutex::new(FxHashMap::default()),
                bindings: Mutex::new(FxHashMap::default()),
                main: Mutex::new(MainLoop::default()),
                main_cv: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Make a binding loadable by `path` through [`NativeBinder::load_binding`]
    pub fn register_binding(&self, path: impl Into<String>, handler: Arc<dyn ApiHandler>) {
        self.inner.bindings.lock().insert(path.into(), handler);
    }

    /// Whether [`NativeBinder::configure`] succeeded
    pub fn is_configured(&self) -> bool {
        self.inner.configured.read().is_some()
    }

    /// Root API, once configured
    pub fn root_api(&self) -> Option<ApiId> {
        self.inner.configured.read().as_ref().map(|c| c.root)
    }

    /// Number of live timers
    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    /// Number of posted jobs not yet fired or aborted
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Number of requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.lock().len()
    }

    /// Number of live events
    pub fn event_count(&self) -> usize {
        self.inner.events.lock().len()
    }

    /// Number of delayed tasks (job delays and timer ticks) not yet due
    pub fn scheduled_tasks(&self) -> usize {
        self.inner.scheduler().map_or(0, |s| s.pending())
    }
}

impl Default for LocalBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalBinder {
    fn drop(&mut self) {
        self.inner.jobs.lock().clear();
        self.inner.locks.lock().clear();
        if let Some(configured) = self.inner.configured.write().take() {
            configured.scheduler.shutdown();
        }
    }
}

impl NativeBinder for LocalBinder {
    fn configure(&self, config: &Data) -> NativeResult<ApiId> {
        let config = BinderConfig::from_data(config)?;
        let mut slot = self.inner.configured.write();
        if slot.is_some() {
            return Err(NativeError::already_exists("binder", &config.uid));
        }

        let root = ApiId::from_raw(self.inner.next_id());
        self.inner.register_api(ApiEntry::new(root, config.uid.clone(), None))?;
        let scheduler = match Scheduler::start(config.workers) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                self.inner.unregister_api(root);
                return Err(err);
            }
        };

        tracing::info!(uid = %config.uid, workers = config.workers, "binder configured");
        *slot = Some(Configured {
            config,
            root,
            scheduler,
        });
        Ok(root)
    }

    fn start(&self, startup: Option<StartupFn>) -> i32 {
        let scheduler = match self.inner.scheduler() {
            Ok(scheduler) => scheduler,
            Err(err) => {
                tracing::error!(error = %err, "cannot start main loop");
                return BinderErrno::BadState.status();
            }
        };
        {
            let mut main = self.inner.main.lock();
            main.running = true;
            main.exit = None;
        }

        self.inner.broadcast(&ControlEvent::Init);
        self.inner.broadcast(&ControlEvent::ClassReady);

        if let Some(startup) = startup {
            let weak = Arc::downgrade(&self.inner);
            let spawned = scheduler.spawn(Box::new(move || {
                let status = startup();
                if status != 0 {
                    tracing::info!(status, "startup ended the main loop");
                    if let Some(inner) = weak.upgrade() {
                        let mut main = inner.main.lock();
                        main.exit.get_or_insert(status);
                        inner.main_cv.notify_all();
                    }
                }
            }));
            if let Err(err) = spawned {
                tracing::error!(error = %err, "startup not run");
                self.exit(BinderErrno::InternalError.status());
            }
        }

        let code = {
            let mut main = self.inner.main.lock();
            let code = loop {
                if let Some(code) = main.exit.take() {
                    break code;
                }
                self.inner.main_cv.wait(&mut main);
            };
            main.running = false;
            code
        };

        self.inner.broadcast(&ControlEvent::Exiting { code });
        code
    }

    fn exit(&self, code: i32) {
        let mut main = self.inner.main.lock();
        main.exit = Some(code);
        self.inner.main_cv.notify_all();
    }

    fn load_binding(&self, config: &Data) -> NativeResult<()> {
        let path = config
            .get_str("path")
            .ok_or_else(|| NativeError::InvalidConfig("binding requires a 'path'".into()))?;
        let handler = self
            .inner
            .bindings
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| NativeError::not_found("binding", path))?;
        let name = match config.get_str("uid") {
            Some(uid) => uid.to_string(),
            None => {
                let file = path.rsplit('/').next().unwrap_or(path);
                file.strip_suffix(".so").unwrap_or(file).to_string()
            }
        };

        let id = ApiId::from_raw(self.inner.next_id());
        self.inner
            .register_api(ApiEntry::new(id, name.clone(), Some(Arc::clone(&handler))))?;
        let status = handler.on_control(id, &ControlEvent::RootEntry);
        if status < 0 {
            self.inner.unregister_api(id);
            return Err(NativeError::Failed(format!(
                "binding '{}' root entry failed with status {}",
                name, status
            )));
        }
        tracing::info!(%path, api = %name, "binding loaded");
        Ok(())
    }

    fn create_api(&self, config: &Data, handler: Arc<dyn ApiHandler>) -> NativeResult<ApiId> {
        self.inner.scheduler()?;
        let api_config = ApiConfig::from_data(config)?;
        let name = api_config.name()?;

        let id = ApiId::from_raw(self.inner.next_id());
        let entry = ApiEntry::new(id, name.clone(), Some(Arc::clone(&handler)))
            .with_class(api_config.class.clone());
        entry.declare(config)?;
        let entry = self.inner.register_api(entry)?;

        let status = handler.on_control(id, &ControlEvent::PreInit);
        if status < 0 {
            self.inner.unregister_api(id);
            return Err(NativeError::Failed(format!(
                "api '{}' pre-init failed with status {}",
                name, status
            )));
        }

        if self.inner.main.lock().running {
            handler.on_control(id, &ControlEvent::Init);
            handler.on_control(id, &ControlEvent::ClassReady);
        }
        tracing::debug!(api = %name, class = ?entry.class, "api created");
        Ok(id)
    }

    fn import_api(&self, config: &Data) -> NativeResult<ApiId> {
        let api_config = ApiConfig::from_data(config)?;
        let uri = api_config
            .uri
            .clone()
            .ok_or_else(|| NativeError::InvalidConfig("import requires a 'uri'".into()))?;
        let name = api_config.name()?;
        let id = ApiId::from_raw(self.inner.next_id());
        self.inner.register_api(ApiEntry::imported(id, name, uri))?;
        Ok(id)
    }

    fn add_verb(&self, api: ApiId, config: &Data) -> NativeResult<Arc<Registration>> {
        let entry = self.inner.api(api)?;
        if entry.uri.is_some() {
            return Err(NativeError::Errno(BinderErrno::NotAvailable));
        }
        entry.add_verb(Registration::from_config(config.clone(), "verb")?)
    }

    fn find_api(&self, name: &str) -> Option<ApiId> {
        self.inner.names.read().get(name).copied()
    }

    fn api_name(&self, api: ApiId) -> Option<String> {
        self.inner.apis.read().get(&api).map(|e| e.name.clone())
    }

    fn request_api(&self, request: RequestId) -> Option<ApiId> {
        self.inner.requests.lock().get(&request).map(|r| r.api)
    }

    fn reply(&self, request: RequestId, status: i32, data: Vec<NativeData>) -> NativeResult<()> {
        let entry = self
            .inner
            .requests
            .lock()
            .remove(&request)
            .ok_or_else(|| NativeError::not_found("request", request))?;
        let sink = entry
            .take_sink()
            .ok_or(NativeError::Errno(BinderErrno::BadState))?;
        tracing::trace!(request = %request_label(request, &entry), status, "reply");
        self.inner.deliver(sink, Reply::new(status, data));
        Ok(())
    }

    fn subscribe(&self, request: RequestId, event: EventId) -> NativeResult<()> {
        let caller = self.inner.session_for(CallOrigin::Request(request))?.caller;
        let mut events = self.inner.events.lock();
        let entry = events
            .get_mut(&event)
            .ok_or_else(|| NativeError::not_found("event", event))?;
        entry.subscribers.insert(caller);
        tracing::debug!(event = %entry.name, %caller, "subscribed");
        Ok(())
    }

    fn unsubscribe(&self, request: RequestId, event: EventId) -> NativeResult<()> {
        let caller = self.inner.session_for(CallOrigin::Request(request))?.caller;
        let mut events = self.inner.events.lock();
        let entry = events
            .get_mut(&event)
            .ok_or_else(|| NativeError::not_found("event", event))?;
        entry.subscribers.remove(&caller);
        Ok(())
    }

    fn set_loa(&self, request: RequestId, loa: u32) -> NativeResult<()> {
        self.inner
            .session_for(CallOrigin::Request(request))?
            .set_loa(loa);
        Ok(())
    }

    fn client_info(&self, request: RequestId) -> NativeResult<Data> {
        Ok(self
            .inner
            .session_for(CallOrigin::Request(request))?
            .describe())
    }

    fn call_sync(
        &self,
        origin: CallOrigin,
        api: &str,
        verb: &str,
        args: Vec<NativeData>,
    ) -> NativeResult<Reply> {
        let resolved = match self.inner.resolve(origin, api, verb) {
            Ok(resolved) => resolved,
            Err(errno) => {
                tracing::debug!(%api, %verb, error = errno.text(), "subcall refused");
                return Ok(Reply::refused(errno));
            }
        };

        let (tx, rx) = channel::bounded(1);
        let request = self.inner.invoke(resolved, args, ReplySink::Sync(tx));
        let timeout = self.inner.call_timeout_ms();
        let outcome = if timeout == 0 {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(Duration::from_millis(timeout))
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(request) = request {
                    self.inner.requests.lock().remove(&request);
                }
                Err(NativeError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Ok(Reply::refused(BinderErrno::NoReply)),
        }
    }

    fn call_async(
        &self,
        origin: CallOrigin,
        api: &str,
        verb: &str,
        args: Vec<NativeData>,
        done: Completion,
    ) -> NativeResult<()> {
        let scheduler = self.inner.scheduler()?;
        let task: Task = match self.inner.resolve(origin, api, verb) {
            Ok(resolved) => {
                let inner = Arc::clone(&self.inner);
                Box::new(move || {
                    inner.invoke(resolved, args, ReplySink::Async(done));
                })
            }
            Err(errno) => Box::new(move || done(Reply::refused(errno))),
        };
        scheduler.spawn(task)
    }

    fn new_event(&self, api: ApiId, label: &str) -> NativeResult<EventId> {
        if label.is_empty() {
            return Err(NativeError::InvalidConfig("event label is empty".into()));
        }
        let name = format!("{}/{}", self.inner.api(api)?.name, label);
        let id = EventId::from_raw(self.inner.next_id());
        self.inner.events.lock().insert(
            id,
            EventEntry {
                name,
                subscribers: FxHashSet::default(),
            },
        );
        Ok(id)
    }

    fn push_event(&self, event: EventId, args: Vec<NativeData>) -> NativeResult<usize> {
        let (name, subscribers) = {
            let events = self.inner.events.lock();
            let entry = events
                .get(&event)
                .ok_or_else(|| NativeError::not_found("event", event))?;
            let mut subscribers: Vec<ApiId> = entry.subscribers.iter().copied().collect();
            subscribers.sort();
            (entry.name.clone(), subscribers)
        };
        let scheduler = self.inner.scheduler()?;

        let mut delivered = 0;
        for api in subscribers {
            let Ok(entry) = self.inner.api(api) else {
                continue;
            };
            let matched = entry.matching(&name);
            if matched.is_empty() {
                if let Some(handler) = entry.handler.clone() {
                    let orphan = ControlEvent::OrphanEvent { name: name.clone() };
                    scheduler.spawn(Box::new(move || {
                        handler.on_control(api, &orphan);
                    }))?;
                }
                continue;
            }

            for handler in matched {
                tracing::trace!(handler = %handler.uid, event = %name, "event delivery");
                let args = args.clone();
                let name = name.clone();
                let task: Task = match handler.target {
                    HandlerTarget::Listener(listener) => {
                        Box::new(move || listener.on_event(api, &name, args))
                    }
                    HandlerTarget::Declared(reg) => match entry.handler.clone() {
                        Some(handler) => Box::new(move || handler.on_event(api, &reg, &name, args)),
                        None => continue,
                    },
                };
                scheduler.spawn(task)?;
                delivered += 1;
            }
        }
        tracing::trace!(event = %name, delivered, "event pushed");
        Ok(delivered)
    }

    fn unref_event(&self, event: EventId) {
        if let Some(entry) = self.inner.events.lock().remove(&event) {
            tracing::debug!(event = %entry.name, "event dropped");
        }
    }

    fn add_event_handler(
        &self,
        api: ApiId,
        uid: &str,
        pattern: &str,
        listener: Arc<dyn EventListener>,
    ) -> NativeResult<()> {
        let entry = self.inner.api(api)?;
        entry.add_handler(PatternHandler::new(uid, pattern, HandlerTarget::Listener(listener))?)
    }

    fn remove_event_handler(&self, api: ApiId, pattern: &str) -> NativeResult<()> {
        self.inner.api(api)?.remove_handler(pattern)
    }

    fn create_timer(
        &self,
        api: ApiId,
        spec: &TimerSpec,
        listener: Arc<dyn TimerListener>,
    ) -> NativeResult<TimerId> {
        self.inner.api(api)?;
        if spec.period_ms == 0 {
            return Err(NativeError::InvalidConfig("timer period must be positive".into()));
        }
        let scheduler = self.inner.scheduler()?;

        let id = TimerId::from_raw(self.inner.next_id());
        let entry = Arc::new(TimerEntry::new(id, spec, listener));
        self.inner.timers.lock().insert(id, Arc::clone(&entry));
        self.inner.arm_timer(&scheduler, &entry);
        tracing::debug!(uid = %spec.uid, period_ms = spec.period_ms, count = spec.count, "timer created");
        Ok(id)
    }

    fn timer_addref(&self, timer: TimerId) {
        match self.inner.timers.lock().get(&timer) {
            Some(entry) => {
                entry.addref();
            }
            None => tracing::warn!(%timer, "addref on unknown timer"),
        }
    }

    fn timer_unref(&self, timer: TimerId) {
        let Some(entry) = self.inner.timers.lock().get(&timer).cloned() else {
            tracing::warn!(%timer, "unref on unknown timer");
            return;
        };
        if let Some(pending) = entry.unref() {
            self.inner.timers.lock().remove(&timer);
            if let (Some(key), Ok(scheduler)) = (pending, self.inner.scheduler()) {
                scheduler.cancel(key);
            }
            tracing::debug!(uid = %entry.uid, "timer disposed");
        }
    }

    fn post_job(&self, delay_ms: u64, job: JobFn) -> NativeResult<JobId> {
        let scheduler = self.inner.scheduler()?;
        let id = JobId::from_raw(self.inner.next_id());
        self.inner.jobs.lock().insert(id, job);

        let weak = Arc::downgrade(&self.inner);
        scheduler.schedule(
            Duration::from_millis(delay_ms),
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let job = inner.jobs.lock().remove(&id);
                if let Some(job) = job {
                    job(JobSignal::Run);
                }
            }),
        );
        Ok(id)
    }

    fn abort_job(&self, job: JobId) -> NativeResult<()> {
        let pending = self.inner.jobs.lock().remove(&job);
        match pending {
            Some(run) => {
                run(JobSignal::Aborted);
                Ok(())
            }
            None => Err(NativeError::not_found("job", job.as_u64())),
        }
    }

    fn call_job(&self, timeout_ms: u64, job: JobFn) -> NativeResult<()> {
        let scheduler = self.inner.scheduler()?;
        let (tx, rx) = channel::bounded(1);
        scheduler.spawn(Box::new(move || {
            job(JobSignal::Run);
            let _ = tx.send(());
        }))?;
        wait(&rx, timeout_ms)
    }

    fn sched_enter(&self, timeout_ms: u64, enter: EnterFn) -> NativeResult<()> {
        let scheduler = self.inner.scheduler()?;
        let lock = LockId::from_raw(self.inner.next_id());
        let (tx, rx) = channel::bounded(1);
        self.inner.locks.lock().insert(lock, tx);

        if let Err(err) = scheduler.spawn(Box::new(move || enter(lock))) {
            self.inner.locks.lock().remove(&lock);
            return Err(err);
        }
        let outcome = wait(&rx, timeout_ms);
        if outcome.is_err() {
            self.inner.locks.lock().remove(&lock);
        }
        outcome
    }

    fn sched_leave(&self, lock: LockId) -> NativeResult<()> {
        let tx = self
            .inner
            .locks
            .lock()
            .remove(&lock)
            .ok_or_else(|| NativeError::not_found("lock", lock.as_u64()))?;
        let _ = tx.send(());
        Ok(())
    }
}
