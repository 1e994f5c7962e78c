//! Integration tests for remote-object invocation between two nodes.
//!
//! Nodes are joined through in-memory duplex streams, so the full stack
//! (negotiation, handshake, framing, correlation, stubs, proxies) runs
//! in-process without sockets.

mod common;

use common::{eventually, join, node, Calculator, Listener, Relay};
use ferron_kernel::{Context, NetronEvent, Value};
use ferron_types::error::FerronError;
use ferron_types::value::WireValue;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Definitions and identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_definition_stability() {
    let server = node("server");
    let calc: Arc<dyn Context> = Calculator::new();
    let def_id = server.attach_context(calc, Some("calc")).unwrap();

    let stub = server.stubs().get_stub(def_id).unwrap();
    assert_eq!(stub.definition().id, def_id);
    assert_eq!(stub.definition().id, stub.definition().id);
    assert_eq!(server.context_definition("calc").unwrap().id, def_id);

    // Disclosing the same object twice to one peer reuses its definition.
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();
    let first = iface.call("make_item", vec!["x".into()]).await.unwrap();
    let second = iface.call("make_item", vec!["x".into()]).await.unwrap();
    let (first, second) = (first.as_interface().unwrap(), second.as_interface().unwrap());
    assert_eq!(first.def_id(), second.def_id());
    assert!(first.ptr_eq(&second));
}

#[tokio::test]
async fn test_interface_identity() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;

    let a = to_server.query_interface("calc").unwrap();
    let b = to_server.query_interface("calc").unwrap();
    assert!(a.ptr_eq(&b));

    let def = to_server.context_definition("calc").unwrap();
    let c = client.interfaces().create(def.clone(), &to_server);
    let d = client.interfaces().create(def, &to_server);
    assert!(c.ptr_eq(&d));
    assert!(a.ptr_eq(&c));

    // After release the next lookup builds a fresh proxy.
    to_server.release_interface(&a).unwrap();
    let e = to_server.query_interface("calc").unwrap();
    assert!(!e.ptr_eq(&a));
    assert_eq!(e.def_id(), a.def_id());
}

#[tokio::test]
async fn test_reference_round_trip_resolves_original_instance() {
    let server = node("server");
    let calc = Calculator::new();
    server.attach_context(calc.clone(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;

    let iface = to_server.query_interface("calc").unwrap();
    let item = iface.call("make_item", vec!["x".into()]).await.unwrap();
    let item_iface = item.as_interface().unwrap();
    assert_eq!(item_iface.peer_id(), "server");

    // Passing the proxy back to its owner must yield the very same object.
    let owns = iface.call("owns", vec![item]).await.unwrap();
    assert_eq!(owns, Value::Bool(true));

    let held = calc.held().unwrap();
    let stub = server.stubs().get_stub(item_iface.def_id()).unwrap();
    assert!(Value::Context(held).same_object(&stub.instance_value()));
}

#[tokio::test]
async fn test_ordered_definitions_parented_to_producer() {
    let server = node("server");
    let def_id = server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (to_client, to_server) = join(&server, &client).await;

    // Stub side: the wire value is an ordered definitions sequence.
    let stub = server.stubs().get_stub(def_id).unwrap();
    let wire = stub
        .get("items", WireValue::List(vec![]), &to_client)
        .await
        .unwrap();
    match wire {
        WireValue::Definitions(defs) => {
            assert_eq!(defs.len(), 3);
            for def in &defs {
                match def {
                    WireValue::Definition(d) => {
                        assert_eq!(d.parent_id, def_id);
                        assert_eq!(d.name, "Item");
                        assert_eq!(d.peer_id.as_deref(), Some("client"));
                    }
                    other => panic!("Expected definition, got {other:?}"),
                }
            }
        }
        other => panic!("Expected definitions, got {other:?}"),
    }

    // Client side: order is preserved through unmarshaling.
    let iface = to_server.query_interface("calc").unwrap();
    let items = iface.call("items", vec![]).await.unwrap();
    let Value::Contexts(items) = items else {
        panic!("Expected contexts");
    };
    let mut names = Vec::new();
    for item in &items {
        let proxy = item.as_interface().unwrap();
        assert_eq!(proxy.definition().parent_id, def_id);
        names.push(proxy.call("name", vec![]).await.unwrap());
    }
    assert_eq!(names, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
}

// ---------------------------------------------------------------------------
// Stub dispatch rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_readonly_property_enforced() {
    let server = node("server");
    let def_id = server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (to_client, to_server) = join(&server, &client).await;

    let stub = server.stubs().get_stub(def_id).unwrap();
    let err = stub
        .set("value", WireValue::List(vec![WireValue::Int(1)]), &to_client)
        .await
        .unwrap_err();
    assert!(matches!(err, FerronError::InvalidAccess(ref m) if m == "value"));
    let value = stub.get("value", WireValue::Null, &to_client).await.unwrap();
    assert_eq!(value, WireValue::Int(42));

    // The proxy refuses before sending anything.
    let iface = to_server.query_interface("calc").unwrap();
    assert!(matches!(
        iface.set("value", Value::Int(1)).await,
        Err(FerronError::InvalidAccess(_))
    ));
    assert_eq!(iface.get("value", Value::Null).await.unwrap(), Value::Int(42));
}

#[tokio::test]
async fn test_unknown_member_has_no_side_effects() {
    let server = node("server");
    let calc = Calculator::new();
    let def_id = server.attach_context(calc.clone(), Some("calc")).unwrap();
    let client = node("client");
    let (to_client, to_server) = join(&server, &client).await;

    let stub = server.stubs().get_stub(def_id).unwrap();
    let err = stub
        .get("doesNotExist", WireValue::List(vec![]), &to_client)
        .await
        .unwrap_err();
    assert!(matches!(err, FerronError::NotExists(ref m) if m == "doesNotExist"));
    assert!(matches!(
        stub.set("doesNotExist", WireValue::Null, &to_client).await,
        Err(FerronError::NotExists(_))
    ));
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);

    let iface = to_server.query_interface("calc").unwrap();
    assert!(matches!(
        iface.call("doesNotExist", vec![]).await,
        Err(FerronError::NotExists(_))
    ));
    assert!(matches!(
        to_server.get(def_id, "doesNotExist", Value::Null).await,
        Err(FerronError::NotExists(_))
    ));
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_properties_and_default_fallback() {
    let server = node("server");
    let calc = Calculator::new();
    server.attach_context(calc.clone(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    assert_eq!(
        iface.get("note", Value::from("fallback")).await.unwrap(),
        Value::from("fallback")
    );
    iface.set("label", Value::from("renamed")).await.unwrap();
    assert_eq!(*calc.label.lock().unwrap(), "renamed");
    let label = iface.property("label").unwrap();
    assert!(!label.is_readonly());
    assert_eq!(label.get(Value::Null).await.unwrap(), Value::from("renamed"));
}

#[tokio::test]
async fn test_method_results_and_errors() {
    let server = node("server");
    let calc = Calculator::new();
    server.attach_context(calc.clone(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    let sum = iface
        .call("add", vec![Value::Int(2), Value::Float(0.5)])
        .await
        .unwrap();
    assert_eq!(sum, Value::Float(2.5));

    let add = iface.method("add").unwrap();
    assert_eq!(add.signature(), "<number> add(<number> a, <number> b)");
    add.call_void(vec![Value::Int(1), Value::Int(1)]).await.unwrap();
    assert_eq!(calc.calls.load(Ordering::SeqCst), 2);

    match iface.call("fail", vec![]).await {
        Err(FerronError::Context(message)) => assert_eq!(message, "calculator exploded"),
        other => panic!("Expected context error, got {other:?}"),
    }
    assert!(matches!(
        iface.call("add", vec![Value::from("x")]).await,
        Err(FerronError::InvalidArgument(_))
    ));
    assert!(matches!(
        iface.method("label"),
        Err(FerronError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_non_finite_result_fails_only_that_call() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    match iface.call("divide", vec![Value::Int(1), Value::Int(0)]).await {
        Err(FerronError::Serialization(message)) => assert!(message.contains("inf")),
        other => panic!("Expected serialization error, got {other:?}"),
    }
    assert!(!to_server.is_closed());
    assert_eq!(
        iface
            .call("divide", vec![Value::Int(4), Value::Int(2)])
            .await
            .unwrap(),
        Value::Float(2.0)
    );

    // Arguments are checked the same way before they leave.
    assert!(matches!(
        iface.call("add", vec![Value::Float(f64::NAN), Value::Int(1)]).await,
        Err(FerronError::Serialization(_))
    ));
    assert_eq!(to_server.active_requests(), 0);
    assert!(to_server.ping().await.is_ok());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pipelined_calls_on_one_connection() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    let calls = (0..16).map(|i| {
        let iface = iface.clone();
        async move { iface.call("add", vec![Value::Int(i), Value::Int(i)]).await }
    });
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), Value::Float((2 * i) as f64));
    }
    assert_eq!(to_server.active_requests(), 0);
}

#[tokio::test]
async fn test_server_calls_back_into_client_context() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (to_client, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    let listener = Arc::new(Listener::default());
    let as_context: Arc<dyn Context> = listener.clone();
    iface
        .call("subscribe", vec![Value::Context(as_context)])
        .await
        .unwrap();

    // The listener definition was disclosed by the client, parented under
    // the call it travelled with.
    let delivered = iface.call("emit", vec!["hello".into()]).await.unwrap();
    assert_eq!(delivered, Value::Int(1));
    assert_eq!(*listener.received.lock().unwrap(), vec!["hello".to_string()]);
    assert_eq!(client.stubs().len(), 1);
    assert_eq!(to_client.id(), "client");
}

#[tokio::test]
async fn test_ping_reports_uptime() {
    let server = node("server");
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    assert!(to_server.ping().await.unwrap() < 60);
}

// ---------------------------------------------------------------------------
// Context catalogue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_attach_detach_visible_to_peer() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let mut events = client.subscribe();

    assert!(to_server.has_context("calc"));
    assert_eq!(to_server.context_names(), vec!["calc".to_string()]);
    assert!(!to_server.has_context("late"));

    let waiter = {
        let peer = Arc::clone(&to_server);
        tokio::spawn(async move { peer.wait_for_context("late").await })
    };
    server
        .attach_context(Arc::new(Relay::default()), Some("late"))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let relay = to_server.query_interface("late").unwrap();
    assert_eq!(relay.definition().name, "Relay");

    assert!(matches!(
        server.attach_context(Arc::new(Relay::default()), Some("late")),
        Err(FerronError::Exists(_))
    ));

    server.detach_context("late", true).unwrap();
    assert!(eventually(|| !to_server.has_context("late")).await);
    assert!(matches!(
        server.detach_context("late", true),
        Err(FerronError::NotExists(_))
    ));
    assert!(matches!(
        to_server.query_interface("late"),
        Err(FerronError::NotExists(_))
    ));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, NetronEvent::RemoteContextAttached { name, .. } if name == "late")));
    assert!(seen
        .iter()
        .any(|e| matches!(e, NetronEvent::RemoteContextDetached { name, .. } if name == "late")));
}

#[tokio::test]
async fn test_attach_uses_reflection_name_by_default() {
    let server = node("server");
    server.attach_context(Calculator::new(), None).unwrap();
    assert!(server.has_context("Calculator"));
    assert!(server.has_contexts());
    server.detach_all_contexts(true);
    assert!(!server.has_contexts());
    assert!(server.stubs().is_empty());
}

// ---------------------------------------------------------------------------
// Release and teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_release_context_invalidates_definition() {
    let server = node("server");
    let calc = Calculator::new();
    server.attach_context(calc.clone(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    let item = iface.call("make_item", vec!["x".into()]).await.unwrap();
    let item = item.as_interface().unwrap();
    assert_eq!(item.call("name", vec![]).await.unwrap(), Value::from("x"));

    server.release_context(&calc.held().unwrap(), true);
    match item.call("name", vec![]).await {
        Err(FerronError::UnknownDefinition(id)) => assert_eq!(id, item.def_id()),
        other => panic!("Expected unknown definition, got {other:?}"),
    }
}

#[tokio::test]
async fn test_detach_releases_originated_stubs() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (_, to_server) = join(&server, &client).await;
    let iface = to_server.query_interface("calc").unwrap();

    iface.call("items", vec![]).await.unwrap();
    assert_eq!(server.stubs().len(), 4);
    server.detach_context("calc", true).unwrap();
    assert!(server.stubs().is_empty());
}

#[tokio::test]
async fn test_disconnect_fails_pending_and_future_calls() {
    let server = node("server");
    server.attach_context(Calculator::new(), Some("calc")).unwrap();
    let client = node("client");
    let (to_client, to_server) = join(&server, &client).await;
    let mut server_events = server.subscribe();
    let iface = to_server.query_interface("calc").unwrap();
    iface.call("items", vec![]).await.unwrap();
    assert_eq!(server.stubs().len(), 4);

    let pending = {
        let iface = iface.clone();
        tokio::spawn(async move { iface.call("hang", vec![]).await })
    };
    assert!(eventually(|| to_server.active_requests() == 1).await);

    // The server drops the connection while the call is outstanding.
    server.disconnect_peer(to_client.id()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(FerronError::PeerGone(_))));

    assert!(eventually(|| client.peer_count() == 0).await);
    assert!(matches!(
        iface.call("add", vec![Value::Int(1), Value::Int(2)]).await,
        Err(FerronError::PeerGone(_))
    ));
    assert!(matches!(
        to_server.query_interface("calc"),
        Err(FerronError::PeerGone(_))
    ));
    assert!(to_server.wait_for_context("never").await.is_err());

    // Stubs disclosed to the departed peer are gone; the attached one stays.
    assert_eq!(server.stubs().len(), 1);
    assert_eq!(server.peer_count(), 0);
    let event = server_events.recv().await.unwrap();
    assert!(matches!(event, NetronEvent::PeerDisconnected { peer_id } if peer_id == "client"));
}

// ---------------------------------------------------------------------------
// Proxy re-export through a middle node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_interface_forwarded_to_third_peer() {
    let owner = node("owner");
    owner.attach_context(Calculator::new(), Some("calc")).unwrap();
    let relay_node = node("relay");
    relay_node
        .attach_context(Arc::new(Relay::default()), Some("relay"))
        .unwrap();
    let middle = node("middle");

    let (_, middle_to_owner) = join(&owner, &middle).await;
    let (relay_to_middle, middle_to_relay) = join(&relay_node, &middle).await;

    let calc = middle_to_owner.query_interface("calc").unwrap();
    let relay = middle_to_relay.query_interface("relay").unwrap();
    relay.call("keep", vec![Value::Interface(calc.clone())]).await.unwrap();

    // The relay node got a fresh definition disclosed by the middle node.
    assert_eq!(relay_to_middle.id(), "middle");
    let sum = relay
        .call("add_via", vec![Value::Int(20), Value::Int(22)])
        .await
        .unwrap();
    assert_eq!(sum, Value::Float(42.0));

    // The middle node holds exactly one stub: the re-exported proxy.
    assert_eq!(middle.stubs().len(), 1);

    // Releasing the proxy, however it is boxed, drops that stub.
    middle.release_context(&(Arc::new(calc.clone()) as Arc<dyn Context>), true);
    assert!(middle.stubs().is_empty());
    assert!(matches!(
        relay
            .call("add_via", vec![Value::Int(1), Value::Int(1)])
            .await,
        Err(FerronError::UnknownDefinition(_))
    ));
}

#[tokio::test]
async fn test_relay_reports_gone_upstream_peer() {
    let owner = node("owner");
    owner.attach_context(Calculator::new(), Some("calc")).unwrap();
    let relay_node = node("relay");
    let relay_ctx = Arc::new(Relay::default());
    relay_node
        .attach_context(relay_ctx.clone(), Some("relay"))
        .unwrap();
    let client = node("client");

    let (_, relay_to_owner) = join(&owner, &relay_node).await;
    let calc = relay_to_owner.query_interface("calc").unwrap();
    relay_ctx
        .call("keep", vec![Value::Interface(calc)])
        .await
        .unwrap();

    let (_, client_to_relay) = join(&relay_node, &client).await;
    let relay = client_to_relay.query_interface("relay").unwrap();
    assert_eq!(
        relay
            .call("add_via", vec![Value::Int(2), Value::Int(3)])
            .await
            .unwrap(),
        Value::Float(5.0)
    );

    owner.disconnect_peer("relay").unwrap();
    assert!(eventually(|| relay_node.peer("owner").is_none()).await);

    match relay
        .call("add_via", vec![Value::Int(2), Value::Int(3)])
        .await
    {
        Err(FerronError::PeerGone(id)) => assert_eq!(id, "owner"),
        other => panic!("Expected PeerGone from the relay, got {other:?}"),
    }
    assert!(!client_to_relay.is_closed());
}
