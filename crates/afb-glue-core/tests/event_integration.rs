//! Integration tests for events and pattern handlers through the glue

mod common;

use afb_glue_core::{GlueError, Handle, HandleKind, Scope, Value};
use common::{callable, configure, handle, recv, setup, silent};
use crossbeam::channel::{self, Receiver};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

/// `demo` API with `subscribe` and `unsubscribe` verbs bound to its `tick`
/// event, plus a `client` API with a handler on `demo/*`
struct Fixture {
    binder: Handle,
    event: Handle,
    client: Value,
    events: Receiver<Vec<Value>>,
}

fn fixture(scope: &mut Scope) -> Fixture {
    let binder = configure(scope);
    let slot: Arc<OnceCell<Value>> = Arc::new(OnceCell::new());
    let event_slot = Arc::clone(&slot);
    let leave_slot = Arc::clone(&slot);

    let demo = scope
        .call(
            "apicreate",
            vec![Value::dict([
                ("uid", Value::from("demo")),
                (
                    "verbs",
                    Value::List(vec![
                        Value::dict([
                            ("verb", Value::from("subscribe")),
                            (
                                "callback",
                                callable("on_subscribe", move |scope, args| {
                                    let event = event_slot
                                        .get()
                                        .cloned()
                                        .ok_or_else(|| GlueError::raise("no event"))?;
                                    scope.call("evtsubscribe", vec![args[0].clone(), event])?;
                                    Ok(Value::from(0))
                                }),
                            ),
                        ]),
                        Value::dict([
                            ("verb", Value::from("unsubscribe")),
                            (
                                "callback",
                                callable("on_unsubscribe", move |scope, args| {
                                    let event = leave_slot
                                        .get()
                                        .cloned()
                                        .ok_or_else(|| GlueError::raise("no event"))?;
                                    scope.call("evtunsubscribe", vec![args[0].clone(), event])?;
                                    Ok(Value::from(0))
                                }),
                            ),
                        ]),
                    ]),
                ),
            ])],
        )
        .unwrap();
    let event = scope.call("evtnew", vec![demo, Value::from("tick")]).unwrap();
    slot.set(event.clone()).unwrap();

    let client = scope
        .call("apicreate", vec![Value::dict([("uid", Value::from("client"))])])
        .unwrap();
    let (tx, rx) = channel::unbounded();
    let config = Value::dict([
        ("uid", Value::from("ticks")),
        ("pattern", Value::from("demo/*")),
        (
            "callback",
            callable("on_tick", move |_, args| {
                tx.send(args[1..].to_vec()).unwrap();
                Ok(Value::None)
            }),
        ),
    ]);
    scope
        .call("evthandler", vec![client.clone(), config, Value::from("ud")])
        .unwrap();

    scope
        .call(
            "callsync",
            vec![client.clone(), Value::from("demo"), Value::from("subscribe")],
        )
        .unwrap();

    Fixture {
        binder,
        event: handle(event),
        client,
        events: rx,
    }
}

#[test]
fn test_push_reaches_handler() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);

    let delivered = scope
        .call("evtpush", vec![Value::Handle(fx.event.clone()), Value::from(7)])
        .unwrap();
    assert_eq!(delivered, Value::from(1));
    assert_eq!(
        recv(&mut scope, &fx.events),
        vec![Value::from("demo/tick"), Value::from("ud"), Value::from(7)]
    );
    assert_eq!(fx.event.as_event().count(), 1);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);

    let push = |scope: &mut Scope| {
        scope
            .call("evtpush", vec![Value::Handle(fx.event.clone()), Value::from("hi")])
            .unwrap()
    };
    assert_eq!(push(&mut scope), Value::from(1));
    assert_eq!(
        recv(&mut scope, &fx.events),
        vec![Value::from("demo/tick"), Value::from("ud"), Value::from("hi")]
    );

    let reply = scope
        .call(
            "callsync",
            vec![fx.client.clone(), Value::from("demo"), Value::from("unsubscribe")],
        )
        .unwrap();
    assert_eq!(reply, Value::List(vec![Value::from(0)]));

    assert_eq!(push(&mut scope), Value::from(0));
    assert!(silent(&mut scope, &fx.events, Duration::from_millis(50)));
}

#[test]
fn test_push_after_event_deleted() {
    let (glue, runtime) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);
    assert_eq!(runtime.event_count(), 1);

    scope
        .call("evtdelete", vec![Value::Handle(fx.event.clone())])
        .unwrap();
    assert!(fx.event.is_released());
    assert_eq!(scope.registry().torn_down(HandleKind::Event), 1);
    assert_eq!(runtime.event_count(), 0);

    let err = scope
        .call("evtpush", vec![Value::Handle(fx.event.clone()), Value::from(1)])
        .unwrap_err();
    assert!(matches!(err, GlueError::Protocol(_)), "unexpected {:?}", err);
    assert!(err.to_string().contains("stale"));
    assert!(silent(&mut scope, &fx.events, Duration::from_millis(50)));

    let err = scope
        .call("evtdelete", vec![Value::Handle(fx.event)])
        .unwrap_err();
    assert!(matches!(err, GlueError::Protocol(_)));
}

#[test]
fn test_unmatched_event_reaches_control() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);

    let (tx, rx) = channel::unbounded();
    let config = Value::dict([
        ("uid", Value::from("watcher")),
        (
            "control",
            callable("on_control", move |_, args| {
                let _ = tx.send(args[1].clone());
                Ok(Value::None)
            }),
        ),
    ]);
    let watcher = scope.call("apicreate", vec![config]).unwrap();
    assert_eq!(recv(&mut scope, &rx), Value::from("config"));

    scope
        .call("callsync", vec![watcher, Value::from("demo"), Value::from("subscribe")])
        .unwrap();
    let delivered = scope
        .call("evtpush", vec![Value::Handle(fx.event.clone())])
        .unwrap();
    assert_eq!(delivered, Value::from(1));
    assert_eq!(recv(&mut scope, &rx), Value::from("orphan"));
    assert_eq!(recv(&mut scope, &fx.events)[0], Value::from("demo/tick"));
}

#[test]
fn test_delete_handler_by_pattern() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);

    scope
        .call("evtdelete", vec![fx.client.clone(), Value::from("demo/*")])
        .unwrap();
    let delivered = scope
        .call("evtpush", vec![Value::Handle(fx.event.clone())])
        .unwrap();
    assert_eq!(delivered, Value::from(0));
    assert!(silent(&mut scope, &fx.events, Duration::from_millis(50)));

    let err = scope
        .call("evtdelete", vec![fx.client, Value::from("demo/*")])
        .unwrap_err();
    assert!(matches!(err, GlueError::Native(_)));
}

#[test]
fn test_delete_handler_by_handle() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let binder = configure(&mut scope);
    let (tx, _rx) = channel::unbounded::<()>();
    let config = Value::dict([
        ("pattern", Value::from("other/*")),
        (
            "callback",
            callable("on_other", move |_, _| {
                let _ = tx.send(());
                Ok(Value::None)
            }),
        ),
    ]);
    let handler = scope
        .call("evthandler", vec![Value::Handle(binder), config])
        .unwrap();
    assert_eq!(scope.registry().live(HandleKind::Event), 1);

    scope.call("evtdelete", vec![handler.clone()]).unwrap();
    assert_eq!(scope.registry().torn_down(HandleKind::Event), 1);
    let err = scope.call("evtdelete", vec![handler]).unwrap_err();
    assert!(matches!(err, GlueError::Protocol(_)));
}

#[test]
fn test_handler_api_lookup() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let binder = configure(&mut scope);
    let config = Value::dict([
        ("pattern", Value::from("x/*")),
        ("api", Value::from("nowhere")),
        ("callback", callable("noop", |_, _| Ok(Value::None))),
    ]);
    let err = scope
        .call("evthandler", vec![Value::Handle(binder), config])
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_emitter_checks() {
    let (glue, _) = setup();
    let mut scope = glue.enter();
    let fx = fixture(&mut scope);

    let err = scope
        .call("evtnew", vec![Value::Handle(fx.binder.clone()), Value::from(3)])
        .unwrap_err();
    assert!(matches!(err, GlueError::Syntax(_)));

    let named = scope
        .call(
            "evtnew",
            vec![
                Value::Handle(fx.binder),
                Value::dict([("uid", Value::from("alarm")), ("name", Value::from("ring"))]),
            ],
        )
        .unwrap();
    assert_eq!(handle(named).as_event().uid, "alarm");

    let err = scope
        .call("evtpush", vec![fx.client])
        .unwrap_err();
    assert!(matches!(err, GlueError::Syntax(_)));
}
