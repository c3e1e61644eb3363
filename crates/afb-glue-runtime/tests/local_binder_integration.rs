//! Integration tests for the in-process binder runtime

use afb_glue_runtime::LocalBinder;
use afb_glue_sdk::{
    ApiHandler, ApiId, BinderErrno, CallOrigin, ControlEvent, Data, EventId, EventListener,
    JobSignal, NativeBinder, NativeData, NativeError, Registration, RequestId, TimerId,
    TimerListener, TimerSpec,
};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

/// API handler recording control phases and answering a few fixed verbs
struct Recorder {
    binder: Weak<LocalBinder>,
    controls: Mutex<Vec<String>>,
    event: Mutex<Option<EventId>>,
    pre_init: i32,
}

impl Recorder {
    fn new(binder: &Arc<LocalBinder>) -> Arc<Self> {
        Self::with_status(binder, 0)
    }

    fn with_status(binder: &Arc<LocalBinder>, pre_init: i32) -> Arc<Self> {
        Arc::new(Self {
            binder: Arc::downgrade(binder),
            controls: Mutex::new(Vec::new()),
            event: Mutex::new(None),
            pre_init,
        })
    }

    fn phases(&self) -> Vec<String> {
        self.controls.lock().clone()
    }
}

impl ApiHandler for Recorder {
    fn on_control(&self, _api: ApiId, event: &ControlEvent) -> i32 {
        let tag = match event {
            ControlEvent::OrphanEvent { name } => format!("orphan:{}", name),
            other => other.phase().to_string(),
        };
        self.controls.lock().push(tag);
        match event {
            ControlEvent::PreInit => self.pre_init,
            _ => 0,
        }
    }

    fn on_verb(&self, request: RequestId, verb: &Arc<Registration>, args: Vec<NativeData>) {
        let Some(binder) = self.binder.upgrade() else {
            return;
        };
        let result = match verb.name() {
            "ping" | "secret" => binder.reply(request, 0, vec![NativeData::Stringz("pong".into())]),
            "echo" => binder.reply(request, 0, args),
            "subscribe" => {
                let event = self.event.lock().expect("event not created");
                binder
                    .subscribe(request, event)
                    .and_then(|_| binder.reply(request, 0, Vec::new()))
            }
            "whoami" => {
                let info = binder.client_info(request).unwrap();
                binder.reply(request, 0, vec![NativeData::Tree(info)])
            }
            "elevate" => binder
                .set_loa(request, 2)
                .and_then(|_| binder.reply(request, 0, Vec::new())),
            _ => Ok(()),
        };
        result.unwrap();
    }

    fn on_event(&self, _api: ApiId, _handler: &Arc<Registration>, _event: &str, _args: Vec<NativeData>) {}

    fn on_info(&self, _api: ApiId, verbs: &[Arc<Registration>]) -> Data {
        Data::object([(
            "verbs",
            Data::Array(verbs.iter().map(|v| Data::from(v.name())).collect()),
        )])
    }
}

struct Forward(Sender<(String, Vec<NativeData>)>);

impl EventListener for Forward {
    fn on_event(&self, _api: ApiId, event: &str, args: Vec<NativeData>) {
        let _ = self.0.send((event.to_string(), args));
    }
}

struct Ticks(Sender<(TimerId, u32)>);

impl TimerListener for Ticks {
    fn on_tick(&self, timer: TimerId, remaining: u32) {
        let _ = self.0.send((timer, remaining));
    }
}

fn configured(extra: serde_json::Value) -> Arc<LocalBinder> {
    let binder = Arc::new(LocalBinder::new());
    let mut config = json!({"uid": "test-binder", "workers": 2});
    if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    binder.configure(&Data::from(config)).unwrap();
    binder
}

fn demo_api(binder: &Arc<LocalBinder>) -> (ApiId, Arc<Recorder>) {
    let recorder = Recorder::new(binder);
    let config = Data::from(json!({
        "uid": "demo",
        "verbs": [
            {"verb": "ping"},
            {"verb": "echo"},
            {"verb": "silent"},
            {"verb": "subscribe"},
            {"verb": "whoami"},
            {"verb": "elevate"},
            {"verb": "secret", "loa": 1}
        ]
    }));
    let id = binder.create_api(&config, recorder.clone()).unwrap();
    (id, recorder)
}

fn client_api(binder: &Arc<LocalBinder>) -> (ApiId, Arc<Recorder>) {
    let recorder = Recorder::new(binder);
    let id = binder
        .create_api(&Data::from(json!({"uid": "client"})), recorder.clone())
        .unwrap();
    (id, recorder)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_configure_once() {
    let binder = configured(json!({}));
    assert!(binder.is_configured());
    let root = binder.root_api().unwrap();
    assert_eq!(binder.api_name(root).as_deref(), Some("test-binder"));
    assert_eq!(binder.find_api("test-binder"), Some(root));

    let again = binder.configure(&Data::from(json!({"uid": "other"})));
    assert!(matches!(again, Err(NativeError::AlreadyExists { what: "binder", .. })));
}

#[test]
fn test_create_api_requires_configure() {
    let binder = Arc::new(LocalBinder::new());
    let recorder = Recorder::new(&binder);
    let result = binder.create_api(&Data::from(json!({"uid": "demo"})), recorder);
    assert!(matches!(result, Err(NativeError::Failed(_))));
}

#[test]
fn test_create_api_runs_pre_init() {
    let binder = configured(json!({}));
    let (id, recorder) = demo_api(&binder);
    assert_eq!(recorder.phases(), vec!["config"]);
    assert_eq!(binder.find_api("demo"), Some(id));

    let duplicate = binder.create_api(&Data::from(json!({"uid": "demo"})), Recorder::new(&binder));
    assert!(matches!(duplicate, Err(NativeError::AlreadyExists { what: "api", .. })));
}

#[test]
fn test_failed_pre_init_removes_api() {
    let binder = configured(json!({}));
    let recorder = Recorder::with_status(&binder, -1);
    let result = binder.create_api(&Data::from(json!({"uid": "broken"})), recorder);
    assert!(matches!(result, Err(NativeError::Failed(_))));
    assert_eq!(binder.find_api("broken"), None);
}

#[test]
fn test_start_until_exit() {
    let binder = configured(json!({}));
    let (_, recorder) = demo_api(&binder);

    let remote = Arc::clone(&binder);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.exit(3);
    });
    assert_eq!(binder.start(None), 3);
    stopper.join().unwrap();
    assert_eq!(recorder.phases(), vec!["config", "ready", "class", "exit"]);
}

#[test]
fn test_startup_status_ends_loop() {
    let binder = configured(json!({}));
    assert_eq!(binder.start(Some(Box::new(|| 7))), 7);
}

#[test]
fn test_start_unconfigured() {
    let binder = LocalBinder::new();
    assert_eq!(binder.start(None), BinderErrno::BadState.status());
}

#[test]
fn test_load_binding() {
    let binder = configured(json!({}));
    let recorder = Recorder::new(&binder);
    binder.register_binding("lib/hello.so", recorder.clone());

    binder
        .load_binding(&Data::from(json!({"path": "lib/hello.so"})))
        .unwrap();
    assert!(binder.find_api("hello").is_some());
    assert_eq!(recorder.phases(), vec!["root"]);

    let missing = binder.load_binding(&Data::from(json!({"path": "lib/none.so"})));
    assert!(matches!(missing, Err(NativeError::NotFound { what: "binding", .. })));
}

// ============================================================================
// Subcalls
// ============================================================================

#[test]
fn test_call_sync_reply() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);

    let reply = binder
        .call_sync(CallOrigin::Api(api), "demo", "ping", Vec::new())
        .unwrap();
    assert_eq!(reply.status, 0);
    assert_eq!(reply.data, vec![NativeData::Stringz("pong".into())]);

    let echoed = binder
        .call_sync(CallOrigin::Api(api), "demo", "echo", vec![NativeData::I32(4)])
        .unwrap();
    assert_eq!(echoed.data, vec![NativeData::I32(4)]);
    assert_eq!(binder.pending_requests(), 0);
}

#[test]
fn test_call_sync_refusals() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let origin = CallOrigin::Api(api);

    let reply = binder.call_sync(origin, "nowhere", "ping", Vec::new()).unwrap();
    assert_eq!(reply.errno(), Some(BinderErrno::UnknownApi));

    let reply = binder.call_sync(origin, "demo", "nothing", Vec::new()).unwrap();
    assert_eq!(reply.errno(), Some(BinderErrno::UnknownVerb));

    let reply = binder.call_sync(origin, "demo", "secret", Vec::new()).unwrap();
    assert_eq!(reply.errno(), Some(BinderErrno::Unauthorized));
}

#[test]
fn test_loa_is_per_session() {
    let binder = configured(json!({}));
    let (_, _) = demo_api(&binder);
    let (client, _) = client_api(&binder);
    let origin = CallOrigin::Api(client);

    binder.call_sync(origin, "demo", "elevate", Vec::new()).unwrap();
    let reply = binder.call_sync(origin, "demo", "secret", Vec::new()).unwrap();
    assert_eq!(reply.errno(), None);

    let info = binder.call_sync(origin, "demo", "whoami", Vec::new()).unwrap();
    match &info.data[0] {
        NativeData::Tree(data) => {
            assert_eq!(data.get_str("caller"), Some("client"));
            assert_eq!(data.get("loa").and_then(Data::as_i64), Some(2));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_implicit_info_verb() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let reply = binder
        .call_sync(CallOrigin::Api(api), "demo", "info", Vec::new())
        .unwrap();
    assert_eq!(reply.status, 0);
    match &reply.data[0] {
        NativeData::Tree(data) => {
            let verbs = data.get("verbs").and_then(Data::as_array).unwrap();
            assert_eq!(verbs[0], Data::from("ping"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_call_sync_timeout() {
    let binder = configured(json!({"call_timeout_ms": 50}));
    let (api, _) = demo_api(&binder);
    let result = binder.call_sync(CallOrigin::Api(api), "demo", "silent", Vec::new());
    assert!(matches!(result, Err(NativeError::Timeout(50))));
    assert_eq!(binder.pending_requests(), 0);
}

#[test]
fn test_call_async_completion() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let (tx, rx) = channel::bounded(2);

    let done = tx.clone();
    binder
        .call_async(
            CallOrigin::Api(api),
            "demo",
            "ping",
            Vec::new(),
            Box::new(move |reply| done.send(reply).unwrap()),
        )
        .unwrap();
    let reply = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(reply.status, 0);

    binder
        .call_async(
            CallOrigin::Api(api),
            "missing",
            "ping",
            Vec::new(),
            Box::new(move |reply| tx.send(reply).unwrap()),
        )
        .unwrap();
    let refused = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(refused.errno(), Some(BinderErrno::UnknownApi));
}

#[test]
fn test_reply_unknown_request() {
    let binder = configured(json!({}));
    let result = binder.reply(RequestId::from_raw(999), 0, Vec::new());
    assert!(matches!(result, Err(NativeError::NotFound { what: "request", .. })));
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_event_push_to_subscriber() {
    let binder = configured(json!({}));
    let (demo, recorder) = demo_api(&binder);
    let (client, client_recorder) = client_api(&binder);

    let event = binder.new_event(demo, "tick").unwrap();
    *recorder.event.lock() = Some(event);

    // No subscriber yet
    assert_eq!(binder.push_event(event, Vec::new()).unwrap(), 0);

    binder
        .call_sync(CallOrigin::Api(client), "demo", "subscribe", Vec::new())
        .unwrap();
    let (tx, rx) = channel::unbounded();
    binder
        .add_event_handler(client, "ticks", "demo/*", Arc::new(Forward(tx)))
        .unwrap();

    let delivered = binder.push_event(event, vec![NativeData::I64(1)]).unwrap();
    assert_eq!(delivered, 1);
    let (name, args) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(name, "demo/tick");
    assert_eq!(args, vec![NativeData::I64(1)]);

    binder.remove_event_handler(client, "demo/*").unwrap();
    assert_eq!(binder.push_event(event, Vec::new()).unwrap(), 0);
    thread::sleep(Duration::from_millis(50));
    assert!(client_recorder
        .phases()
        .contains(&"orphan:demo/tick".to_string()));

    binder.unref_event(event);
    assert_eq!(binder.event_count(), 0);
    assert!(binder.push_event(event, Vec::new()).is_err());
}

#[test]
fn test_duplicate_event_handler() {
    let binder = configured(json!({}));
    let (client, _) = client_api(&binder);
    let (tx, _rx) = channel::unbounded();
    let listener = Arc::new(Forward(tx));
    binder
        .add_event_handler(client, "a", "x/*", listener.clone())
        .unwrap();
    assert!(binder.add_event_handler(client, "b", "x/*", listener).is_err());
    assert!(binder.remove_event_handler(client, "y/*").is_err());
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_counted_timer() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let (tx, rx) = channel::unbounded();
    let spec = TimerSpec {
        uid: "count".into(),
        period_ms: 10,
        count: 3,
    };
    let timer = binder.create_timer(api, &spec, Arc::new(Ticks(tx))).unwrap();

    let seen: Vec<u32> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap().1).collect();
    assert_eq!(seen, vec![3, 2, 1]);
    assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());

    assert_eq!(binder.timer_count(), 1);
    binder.timer_unref(timer);
    assert_eq!(binder.timer_count(), 0);
}

#[test]
fn test_timer_refs() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let (tx, rx) = channel::unbounded();
    let spec = TimerSpec {
        uid: "forever".into(),
        period_ms: 10,
        count: 0,
    };
    let timer = binder.create_timer(api, &spec, Arc::new(Ticks(tx))).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().1, 0);

    binder.timer_addref(timer);
    binder.timer_unref(timer);
    assert_eq!(binder.timer_count(), 1);
    binder.timer_unref(timer);
    assert_eq!(binder.timer_count(), 0);

    thread::sleep(Duration::from_millis(30));
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
}

#[test]
fn test_timer_rejects_zero_period() {
    let binder = configured(json!({}));
    let (api, _) = demo_api(&binder);
    let (tx, _rx) = channel::unbounded();
    let spec = TimerSpec {
        uid: "bad".into(),
        period_ms: 0,
        count: 1,
    };
    let result = binder.create_timer(api, &spec, Arc::new(Ticks(tx)));
    assert!(matches!(result, Err(NativeError::InvalidConfig(_))));
}

// ============================================================================
// Jobs and scheduler locks
// ============================================================================

#[test]
fn test_post_job_fires() {
    let binder = configured(json!({}));
    let (tx, rx) = channel::bounded(1);
    let id = binder
        .post_job(20, Box::new(move |signal| tx.send(signal).unwrap()))
        .unwrap();
    assert!(id.as_u64() > 0);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), JobSignal::Run);
    assert_eq!(binder.pending_jobs(), 0);
}

#[test]
fn test_abort_job() {
    let binder = configured(json!({}));
    let (tx, rx) = channel::unbounded();
    let id = binder
        .post_job(100, Box::new(move |signal| tx.send(signal).unwrap()))
        .unwrap();
    binder.abort_job(id).unwrap();
    assert_eq!(rx.try_recv().unwrap(), JobSignal::Aborted);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    let again = binder.abort_job(id);
    assert!(matches!(again, Err(NativeError::NotFound { what: "job", .. })));
}

#[test]
fn test_call_job_waits() {
    let binder = configured(json!({}));
    let (tx, rx) = channel::bounded(1);
    binder
        .call_job(1000, Box::new(move |signal| tx.send(signal).unwrap()))
        .unwrap();
    assert_eq!(rx.try_recv().unwrap(), JobSignal::Run);

    let slow = binder.call_job(
        20,
        Box::new(|_| thread::sleep(Duration::from_millis(200))),
    );
    assert!(matches!(slow, Err(NativeError::Timeout(20))));
}

#[test]
fn test_sched_enter_leave() {
    let binder = configured(json!({}));
    let remote = Arc::downgrade(&binder);
    binder
        .sched_enter(
            1000,
            Box::new(move |lock| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    if let Some(binder) = remote.upgrade() {
                        binder.sched_leave(lock).unwrap();
                    }
                });
            }),
        )
        .unwrap();

    let timed_out = binder.sched_enter(30, Box::new(|_| {}));
    assert!(matches!(timed_out, Err(NativeError::Timeout(30))));
}
