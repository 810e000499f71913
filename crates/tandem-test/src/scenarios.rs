//! End-to-end scenarios
//!
//! Every scenario runs one server and one or two clients on a shared
//! logical clock, so ids and times below are exact.

use proptest::prelude::*;
use serde_json::json;
use tandem_core::{Action, AddOptions, MetaOverride, TandemError};
use tandem_sync::{LinkState, UndoRule};
use tracing_subscriber::EnvFilter;

use crate::{ClientConfig, ServerConfig, TestClient, TestServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn action(value: serde_json::Value) -> Action {
    Action::from_value(value).unwrap()
}

fn processed(id: &str) -> Action {
    action(json!({ "type": "processed", "id": id }))
}

fn name(user: &str, name: &str) -> Action {
    action(json!({ "type": "name", "userId": user, "name": name }))
}

// ============================================================================
// IDENTITY & RETENTION
// ============================================================================

#[test]
fn test_sets_node_id() {
    init_tracing();
    let client = TestClient::new("10");
    assert_eq!(client.node_id().as_str(), "10:2:2");
    assert_eq!(client.server().node_id().as_str(), "server:1:1");
    assert_eq!(client.state(), LinkState::Disconnected);
}

#[test]
fn test_collects_sent_actions() {
    init_tracing();
    let client1 = TestClient::new("10");
    let client2 = TestClient::with_server("20", client1.server());
    client1.connect().unwrap();
    client2.connect().unwrap();

    client1.sync(Action::new("A")).unwrap();
    let sent = client1
        .sent(|| {
            client1.log().add(Action::new("local"), AddOptions::new()).unwrap();
            client1.sync(Action::new("B")).unwrap();
            client2.sync(Action::new("C")).unwrap();
        })
        .unwrap();

    assert_eq!(sent, vec![Action::new("B")]);
}

#[test]
fn test_keeps_actions_by_request() {
    init_tracing();
    let client = TestClient::new("10");
    client.connect().unwrap();

    client.sync(Action::new("A")).unwrap();
    assert!(client.log().actions().is_empty());
    assert!(client.server().log().actions().is_empty());

    client.keep_actions();
    client.sync(Action::new("B")).unwrap();
    assert_eq!(
        client.log().actions(),
        vec![Action::new("B"), processed("3 10:2:2 0")]
    );
    assert!(client.server().log().actions().is_empty());

    client.server().keep_actions();
    client.sync(Action::new("C")).unwrap();
    assert_eq!(
        client.log().actions(),
        vec![
            Action::new("B"),
            processed("3 10:2:2 0"),
            Action::new("C"),
            processed("5 10:2:2 0"),
        ]
    );
    assert_eq!(
        client.server().log().actions(),
        vec![Action::new("C"), processed("5 10:2:2 0")]
    );
}

// ============================================================================
// CONNECTION LIFECYCLE
// ============================================================================

#[test]
fn test_connects_sends_and_processes() {
    init_tracing();
    let client = TestClient::new("10");
    let server = client.server().clone();
    client.keep_actions();
    server.keep_actions();

    client.log().add(Action::new("local"), AddOptions::new()).unwrap();
    client.log().add(Action::new("offline1"), AddOptions::sync()).unwrap();
    assert_eq!(
        client.log().actions(),
        vec![Action::new("local"), Action::new("offline1")]
    );
    assert!(server.log().actions().is_empty());

    client.connect().unwrap();
    assert_eq!(
        server.log().actions(),
        vec![Action::new("offline1"), processed("2 10:2:2 0")]
    );
    assert_eq!(
        client.log().actions(),
        vec![
            Action::new("local"),
            Action::new("offline1"),
            processed("2 10:2:2 0"),
        ]
    );
    assert_eq!(client.log().entries()[2].1.nodes, None);

    client.disconnect();
    server
        .log()
        .add(
            Action::new("offline2"),
            AddOptions::new().with_nodes(vec![client.node_id().clone()]),
        )
        .unwrap();
    assert_eq!(
        server.log().actions(),
        vec![
            Action::new("offline1"),
            processed("2 10:2:2 0"),
            Action::new("offline2"),
        ]
    );
    assert_eq!(client.log().len(), 3);

    client.connect().unwrap();
    assert_eq!(
        client.log().actions(),
        vec![
            Action::new("local"),
            Action::new("offline1"),
            processed("2 10:2:2 0"),
            Action::new("offline2"),
        ]
    );
}

#[test]
fn test_connect_twice_fails() {
    let client = TestClient::new("10");
    client.connect().unwrap();
    assert!(matches!(
        client.connect(),
        Err(TandemError::AlreadyConnected(_))
    ));
    assert_eq!(client.server().connected(), vec![client.node_id().clone()]);
}

#[test]
fn test_sync_requires_connection() {
    let client = TestClient::new("10");
    let err = client.sync(Action::new("A")).unwrap_err();
    assert_eq!(err, TandemError::NotConnected(client.node_id().clone()));
    assert!(client.log().is_empty());
}

#[test]
fn test_dropped_client_leaves_server() {
    let server = TestServer::new();
    let client = TestClient::with_server("10", &server);
    client.connect().unwrap();
    client.sync(Action::subscribe("users/1")).unwrap();
    assert_eq!(server.subscribers("users/1"), vec![client.node_id().clone()]);

    drop(client);
    assert!(server.connected().is_empty());
    assert!(server.subscribers("users/1").is_empty());
}

// ============================================================================
// CHANNELS
// ============================================================================

#[test]
fn test_supports_channels() {
    init_tracing();
    let client = TestClient::new("10");
    let server = client.server().clone();
    client.keep_actions();

    server.on_channel("users/1", action(json!({ "type": "name", "userId": "1" })));
    server.on_channel("users/1", name("1", "A"));
    server.on_channel("users/2", vec![name("2", "B1"), name("2", "B2")]);
    server.on_channel("users/3", vec![(name("3", "C"), MetaOverride::time(1))]);

    client.connect().unwrap();
    client.sync(Action::subscribe("users/1")).unwrap();
    client.sync(Action::subscribe("users/2")).unwrap();
    client.sync(Action::subscribe("users/3")).unwrap();

    assert!(client.subscribed("users/1"));
    assert_eq!(
        client.log().actions(),
        vec![
            Action::subscribe("users/1"),
            name("3", "C"),
            name("1", "A"),
            processed("1 10:2:2 0"),
            Action::subscribe("users/2"),
            name("2", "B1"),
            name("2", "B2"),
            processed("4 10:2:2 0"),
            Action::subscribe("users/3"),
            processed("8 10:2:2 0"),
        ]
    );

    client.sync(Action::unsubscribe("users/1")).unwrap();
    assert!(!client.subscribed("users/1"));
    assert!(client.subscribed("users/2"));

    client.disconnect();
    assert!(!client.subscribed("users/2"));
    assert!(server.subscribers("users/2").is_empty());
}

#[test]
fn test_channel_actions_arrive_before_processed() {
    let client = TestClient::new("10");
    client.keep_actions();
    client.server().on_channel("users/2", vec![name("2", "B1"), name("2", "B2")]);
    client.connect().unwrap();

    client.sync(Action::subscribe("users/2")).unwrap();
    let by_added: Vec<_> = client
        .log()
        .entries_by_added()
        .into_iter()
        .map(|(action, _)| action)
        .collect();
    assert_eq!(
        by_added,
        vec![
            Action::subscribe("users/2"),
            name("2", "B1"),
            name("2", "B2"),
            processed("1 10:2:2 0"),
        ]
    );
}

#[test]
fn test_channel_factory_sees_subscriber() {
    let client = TestClient::new("10");
    client.keep_actions();
    client.server().on_channel(
        "me",
        tandem_sync::ChannelContent::factory(|node| {
            vec![(
                Action::new("whoami").with("node", node.to_string()),
                MetaOverride::default(),
            )]
        }),
    );
    client.connect().unwrap();
    client.sync(Action::subscribe("me")).unwrap();

    assert!(client
        .log()
        .actions()
        .contains(&Action::new("whoami").with("node", "10:2:2")));
}

// ============================================================================
// UNDO
// ============================================================================

#[test]
fn test_supports_undo() {
    init_tracing();
    let client = TestClient::new("10");
    let server = client.server().clone();
    client.connect().unwrap();

    server.undo_next(UndoRule::any());
    let error1 = client.sync(Action::new("test")).unwrap_err();
    assert_eq!(error1.to_string(), "Server undid action because of error");

    client.sync(Action::new("test")).unwrap();

    server.undo_next("test");
    server.undo_next(UndoRule::of_type("test").with_field("key", 1));

    let error2 = client.sync(Action::new("test")).unwrap_err();
    assert_eq!(error2.to_string(), "Server undid action because of test");

    let error3 = client.sync(Action::new("test")).unwrap_err();
    assert_eq!(error3.to_string(), "Server undid action because of test");
    let undo = error3.as_undo().unwrap();
    assert_eq!(undo.action.get("key"), Some(&json!(1)));
    assert_eq!(undo.original(), Some(Action::new("test")));
}

#[test]
fn test_supports_undo_for_specific_action() {
    let client = TestClient::new("10");
    client.connect().unwrap();

    client.server().undo_action(Action::new("B"));
    client.sync(Action::new("A")).unwrap();
    let error = client.sync(Action::new("B")).unwrap_err();
    assert_eq!(error.to_string(), "Server undid action because of error");
    assert!(client.sync(Action::new("B")).is_err());
}

#[test]
fn test_undone_subscribe_does_not_subscribe() {
    let client = TestClient::new("10");
    let server = client.server().clone();
    server.on_channel("users/1", name("1", "A"));
    client.keep_actions();
    client.connect().unwrap();

    server.undo_next("subscribe");
    assert!(client.sync(Action::subscribe("users/1")).is_err());
    assert!(!client.subscribed("users/1"));
    assert!(server.subscribers("users/1").is_empty());
    assert!(!client.log().actions().contains(&name("1", "A")));
}

#[test]
fn test_undo_carries_extra_payload() {
    let client = TestClient::new("10");
    client.connect().unwrap();

    let mut extra = serde_json::Map::new();
    extra.insert("retry".to_string(), json!(false));
    extra.insert("reason".to_string(), json!("overridden"));
    client
        .server()
        .undo_next(UndoRule::of_type("test").with_extra(extra));

    let error = client.sync(Action::new("test")).unwrap_err();
    assert_eq!(error.to_string(), "Server undid action because of test");
    let undo = error.as_undo().unwrap();
    assert_eq!(undo.action.get("retry"), Some(&json!(false)));
    assert_eq!(undo.action.get_str("reason"), Some("test"));
}

#[test]
fn test_undone_action_is_not_resent() {
    let client1 = TestClient::new("10");
    let client2 = TestClient::with_server("20", client1.server());
    let server = client1.server().clone();
    client1.keep_actions();
    client2.keep_actions();
    client1.connect().unwrap();
    client2.connect().unwrap();

    server.resend("name", |action| {
        format!("users/{}", action.get_str("userId").unwrap_or_default())
    });
    client2.sync(Action::subscribe("users/1")).unwrap();

    server.undo_next(UndoRule::any());
    assert!(client1.sync(name("1", "X")).is_err());

    assert_eq!(
        client2.log().actions(),
        vec![Action::subscribe("users/1"), processed("1 20:3:3 0")]
    );
}

// ============================================================================
// MULTIPLE CLIENTS
// ============================================================================

#[test]
fn test_supports_multiple_clients_with_same_server() {
    init_tracing();
    let client1 = TestClient::new("10");
    let client2 = TestClient::with_server("20", client1.server());
    let server = client1.server().clone();
    client1.keep_actions();
    client2.keep_actions();

    client1.connect().unwrap();
    client2.connect().unwrap();

    server.on_channel("users/1", name("1", "A"));
    server.resend("name", |action| {
        format!("users/{}", action.get_str("userId").unwrap_or_default())
    });

    client1.sync(Action::new("default")).unwrap();
    assert_eq!(client2.log().actions(), vec![Action::new("default")]);

    client2.sync(Action::subscribe("users/1")).unwrap();
    assert_eq!(
        client1.log().actions(),
        vec![Action::new("default"), processed("1 10:2:2 0")]
    );
    assert_eq!(
        client2.log().actions(),
        vec![
            Action::new("default"),
            Action::subscribe("users/1"),
            name("1", "A"),
            processed("3 20:3:3 0"),
        ]
    );

    client1.sync(name("1", "B")).unwrap();
    assert_eq!(
        client1.log().actions(),
        vec![
            Action::new("default"),
            processed("1 10:2:2 0"),
            name("1", "B"),
            processed("6 10:2:2 0"),
        ]
    );
    assert_eq!(
        client2.log().actions(),
        vec![
            Action::new("default"),
            Action::subscribe("users/1"),
            name("1", "A"),
            processed("3 20:3:3 0"),
            name("1", "B"),
        ]
    );
    assert_eq!(client2.log().entries()[4].1.channels, None);

    client2.sync(Action::unsubscribe("users/1")).unwrap();
    client1.sync(name("1", "C")).unwrap();

    server.undo_next(UndoRule::any());
    assert!(client1.sync(name("1", "D")).is_err());

    assert_eq!(
        client1.log().actions(),
        vec![
            Action::new("default"),
            processed("1 10:2:2 0"),
            name("1", "B"),
            processed("6 10:2:2 0"),
            name("1", "C"),
            processed("10 10:2:2 0"),
            name("1", "D"),
            action(json!({
                "type": "undo",
                "id": "12 10:2:2 0",
                "reason": "error",
                "action": { "type": "name", "userId": "1", "name": "D" }
            })),
        ]
    );
    assert_eq!(
        client2.log().actions(),
        vec![
            Action::new("default"),
            Action::subscribe("users/1"),
            name("1", "A"),
            processed("3 20:3:3 0"),
            name("1", "B"),
            Action::unsubscribe("users/1"),
            processed("8 20:3:3 0"),
        ]
    );
}

#[test]
fn test_server_broadcast_reaches_every_client() {
    let server = TestServer::new();
    let client1 = TestClient::with_server("10", &server);
    let client2 = TestClient::with_server("20", &server);
    client1.keep_actions();
    client2.keep_actions();
    client1.connect().unwrap();
    client2.connect().unwrap();

    server.log().add(Action::new("news"), AddOptions::new()).unwrap();
    server
        .log()
        .add(
            Action::new("private"),
            AddOptions::new().with_nodes(vec![client2.node_id().clone()]),
        )
        .unwrap();

    assert_eq!(client1.log().actions(), vec![Action::new("news")]);
    assert_eq!(
        client2.log().actions(),
        vec![Action::new("news"), Action::new("private")]
    );
}

#[test]
fn test_resend_by_predicate() {
    let server = TestServer::new();
    let client1 = TestClient::with_server("10", &server);
    let client2 = TestClient::with_server("20", &server);
    let client3 = TestClient::with_server("30", &server);
    client2.keep_actions();
    client3.keep_actions();
    client1.connect().unwrap();
    client2.connect().unwrap();
    client3.connect().unwrap();

    server.resend_when(|action| action.get("admin").is_some(), |_| "admins".to_string());
    client2.sync(Action::subscribe("admins")).unwrap();

    let promote = Action::new("promote").with("admin", true);
    client1.sync(promote.clone()).unwrap();
    client1.sync(Action::new("greet")).unwrap();

    assert_eq!(
        client2.log().actions(),
        vec![
            Action::subscribe("admins"),
            processed("1 20:3:3 0"),
            promote,
            Action::new("greet"),
        ]
    );
    assert_eq!(client3.log().actions(), vec![Action::new("greet")]);
}

#[test]
fn test_supports_subprotocols() {
    init_tracing();
    let client1 = TestClient::new("10");
    let client2 = TestClient::with_config(
        "20",
        ClientConfig::default()
            .with_server(client1.server().clone())
            .with_subprotocol("1.0.1"),
    );
    client1.keep_actions();
    client2.keep_actions();
    client1.connect().unwrap();
    client2.connect().unwrap();

    client1.sync(Action::new("client1")).unwrap();
    client2.sync(Action::new("client2")).unwrap();

    assert_eq!(
        client1.log().actions(),
        vec![
            Action::new("client1"),
            processed("1 10:2:2 0"),
            Action::new("client2"),
        ]
    );
    assert_eq!(
        client1.log().entries()[2].1.subprotocol.as_deref(),
        Some("1.0.1")
    );

    assert_eq!(
        client2.log().actions(),
        vec![
            Action::new("client1"),
            Action::new("client2"),
            processed("3 20:3:3 0"),
        ]
    );
    assert_eq!(
        client2.log().entries()[0].1.subprotocol.as_deref(),
        Some("0.0.0")
    );
}

#[test]
fn test_server_subprotocol_reaches_clients() {
    let server = TestServer::with_config(ServerConfig::default().with_subprotocol("2.0.0"));
    let client = TestClient::with_server("10", &server);
    server.keep_actions();
    client.keep_actions();
    client.connect().unwrap();
    assert_eq!(client.server().subprotocol(), "2.0.0");

    client.sync(Action::new("A")).unwrap();

    let entries = client.log().entries();
    assert_eq!(entries[1].0, processed("1 10:2:2 0"));
    assert_eq!(entries[1].1.subprotocol.as_deref(), Some("2.0.0"));
    assert_eq!(
        server.log().entries()[0].1.subprotocol.as_deref(),
        Some("0.0.0")
    );
}

// ============================================================================
// FREEZE
// ============================================================================

#[test]
fn test_freezes_processing() {
    init_tracing();
    let client = TestClient::new("10");
    client.keep_actions();
    client.connect().unwrap();

    client.server().freeze_processing(|| {
        client.log().add(Action::new("test"), AddOptions::sync()).unwrap();
        assert_eq!(client.log().actions(), vec![Action::new("test")]);
    });

    assert_eq!(
        client.log().actions(),
        vec![Action::new("test"), processed("1 10:2:2 0")]
    );
}

#[test]
fn test_sync_inside_freeze_fails() {
    let client = TestClient::new("10");
    client.connect().unwrap();

    let result = client
        .server()
        .freeze_processing(|| client.sync(Action::new("A")));
    assert_eq!(result, Err(TandemError::Frozen));
    assert!(!client.server().is_frozen());
}

#[test]
fn test_nested_freeze_resumes_on_outermost() {
    let client = TestClient::new("10");
    let server = client.server().clone();
    client.keep_actions();
    client.connect().unwrap();

    server.freeze_processing(|| {
        server.freeze_processing(|| {
            client.log().add(Action::new("A"), AddOptions::sync()).unwrap();
        });
        assert!(server.is_frozen());
        assert_eq!(client.log().actions(), vec![Action::new("A")]);
    });

    assert_eq!(
        client.log().actions(),
        vec![Action::new("A"), processed("1 10:2:2 0")]
    );
}

#[test]
fn test_disconnect_discards_frozen_queue() {
    let client = TestClient::new("10");
    let server = client.server().clone();
    client.keep_actions();
    server.keep_actions();
    client.connect().unwrap();

    server.freeze_processing(|| {
        client.log().add(Action::new("X"), AddOptions::sync()).unwrap();
        client.disconnect();
    });
    assert!(server.log().actions().is_empty());
    assert_eq!(client.stats().discarded, 1);

    client.connect().unwrap();
    assert_eq!(
        server.log().actions(),
        vec![Action::new("X"), processed("1 10:2:2 0")]
    );
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_interleaved_clients_deliver_in_id_order(authors in prop::collection::vec(any::<bool>(), 1..24)) {
        let server = TestServer::new();
        server.keep_actions();
        let client1 = TestClient::with_server("10", &server);
        let client2 = TestClient::with_server("20", &server);
        client1.keep_actions();
        client2.keep_actions();
        client1.connect().unwrap();
        client2.connect().unwrap();

        server.freeze_processing(|| {
            for (i, first) in authors.iter().enumerate() {
                let client = if *first { &client1 } else { &client2 };
                client
                    .log()
                    .add(Action::new("step").with("i", i), AddOptions::sync())
                    .unwrap();
            }
        });

        let applied: Vec<_> = server
            .log()
            .entries_by_added()
            .into_iter()
            .filter(|(action, _)| !action.is_control())
            .map(|(_, meta)| meta.id)
            .collect();
        let mut sorted = applied.clone();
        sorted.sort();
        prop_assert_eq!(applied.len(), authors.len());
        prop_assert_eq!(applied, sorted);

        let steps = |client: &TestClient| {
            client
                .log()
                .actions()
                .into_iter()
                .filter(|action| action.is_type("step"))
                .count()
        };
        prop_assert_eq!(steps(&client1), authors.len());
        prop_assert_eq!(steps(&client2), authors.len());
    }
}
