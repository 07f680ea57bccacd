mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::*;
use sc_api::ApiRequest;
use sc_client::{ChatClient, ListenerScope};
use sc_core::error::{ChatError, ChatResult};
use sc_models::{EventType, User};
use serde_json::{json, Value};

fn channel_route(request: &ApiRequest, recovered: &Value) -> ChatResult<Value> {
    match request.path.as_str() {
        "/channels/messaging/a/query" => Ok(snapshot("messaging:a", vec![message("m1", "bob", 1)])),
        "/channels/messaging/b/query" => Ok(snapshot("messaging:b", vec![message("n1", "bob", 2)])),
        "/channels/messaging/c/query" => Ok(snapshot("messaging:c", vec![])),
        "/channels" => Ok(recovered.clone()),
        path if path.ends_with("/stop-watching") => Ok(json!({})),
        other => panic!("unexpected request to {other}"),
    }
}

fn message_ids(state: &sc_client::ChannelState) -> Vec<String> {
    state.messages().iter().map(|m| m.id.clone()).collect()
}

async fn wait_for_event(rx: &mut tokio::sync::broadcast::Receiver<sc_models::Event>, kind: EventType) {
    while rx.recv().await.unwrap().kind != kind {}
}

#[tokio::test]
async fn test_recovery_refreshes_watched_channels_before_announcing() {
    let (transport, mut servers) = FakeTransport::new(vec![
        Step::Accept(ok_frame("c-1")),
        Step::Accept(ok_frame("c-2")),
    ]);
    let recovered = json!({
        "channels": [
            snapshot("messaging:a", vec![message("m1", "bob", 1), message("m3", "bob", 5)]),
            snapshot("messaging:b", vec![message("n1", "bob", 2), message("n2", "carol", 6)]),
        ]
    });
    let requester = FakeRequester::new(move |r| channel_route(r, &recovered));
    let client = client(transport.clone(), requester.clone());

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let k = kinds.clone();
    client.on(ListenerScope::All, move |e| {
        if e.kind.as_str().starts_with("connection.") {
            k.lock().unwrap().push(e.kind.to_string());
        }
    });

    client
        .set_user(User::new("alice"), ChatClient::dev_token("alice"))
        .await
        .unwrap();
    let first = servers.recv().await.unwrap();
    let a = client.channel("messaging", "a", None).unwrap();
    let b = client.channel("messaging", "b", None).unwrap();
    a.watch().await.unwrap();
    b.watch().await.unwrap();

    // Live traffic before the outage: a new message and a local edit that
    // is newer than what recovery will return.
    let mut rx = client.subscribe();
    first.push(json!({
        "type": "message.new",
        "cid": "messaging:a",
        "message": message("m2", "bob", 3),
    }));
    let mut edited = message("m1", "bob", 1);
    edited["text"] = json!("edited");
    edited["updated_at"] = json!(ts(10));
    first.push(json!({ "type": "message.updated", "cid": "messaging:a", "message": edited }));
    wait_for_event(&mut rx, EventType::MessageUpdated).await;

    first.drop_connection();
    wait_for_event(&mut rx, EventType::ConnectionRecovered).await;

    // Caches were committed before connection.recovered went out.
    let state_a = a.state().await;
    assert_eq!(message_ids(&state_a), vec!["m1", "m2", "m3"]);
    assert_eq!(state_a.message("m1").unwrap().text, "edited");
    assert_eq!(message_ids(&b.state().await), vec!["n1", "n2"]);
    assert!(client.get_user("carol").is_some());

    let recovery = requester.requests_to("/channels");
    assert_eq!(recovery.len(), 1);
    let body = recovery[0].body.clone().unwrap();
    assert_eq!(
        body["filter_conditions"]["cid"]["$in"],
        json!(["messaging:a", "messaging:b"])
    );
    assert_eq!(body["sort"], json!([{ "field": "last_message_at", "direction": -1 }]));
    assert_eq!(body["state"], true);
    assert_eq!(body["watch"], true);
    assert_eq!(body["last_message_ids"]["messaging:a"], "m2");
    assert_eq!(body["last_message_ids"]["messaging:b"], "n1");
    let auth = recovery[0].auth.clone().unwrap();
    assert_eq!(auth.connection_id.as_deref(), Some("c-2"));

    wait_for(|| client.connection_id().as_deref() == Some("c-2")).await;
    wait_for(|| kinds.lock().unwrap().len() == 3).await;
    assert_eq!(
        *kinds.lock().unwrap(),
        vec!["connection.ok", "connection.recovered", "connection.ok"]
    );
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn test_recovery_queries_in_chunks_newest_first() {
    let (transport, mut servers) = FakeTransport::new(vec![
        Step::Accept(ok_frame("c-1")),
        Step::Accept(ok_frame("c-2")),
    ]);
    let requester = FakeRequester::new(|r| channel_route(r, &json!({ "channels": [] })));
    let mut config = test_config();
    config.state.recovery_channel_limit = 1;
    let client = ChatClient::with_collaborators(config, requester.clone(), transport).unwrap();

    client
        .set_user(User::new("alice"), ChatClient::dev_token("alice"))
        .await
        .unwrap();
    let first = servers.recv().await.unwrap();
    for id in ["a", "b", "c"] {
        client.channel("messaging", id, None).unwrap().watch().await.unwrap();
    }
    client
        .channel("messaging", "c", None)
        .unwrap()
        .stop_watching()
        .await
        .unwrap();

    let mut rx = client.subscribe();
    first.drop_connection();
    wait_for_event(&mut rx, EventType::ConnectionRecovered).await;

    let cids: Vec<Value> = requester
        .requests_to("/channels")
        .iter()
        .map(|r| r.body.as_ref().unwrap()["filter_conditions"]["cid"]["$in"].clone())
        .collect();
    assert_eq!(
        cids,
        vec![json!(["messaging:b"]), json!(["messaging:a"])]
    );
}

#[tokio::test]
async fn test_failed_recovery_is_retried_on_a_new_socket() {
    let (transport, mut servers) = FakeTransport::new(vec![
        Step::Accept(ok_frame("c-1")),
        Step::Accept(ok_frame("c-2")),
        Step::Accept(ok_frame("c-3")),
    ]);
    let failures = Arc::new(AtomicUsize::new(1));
    let f = failures.clone();
    let requester = FakeRequester::new(move |r| {
        if r.path == "/channels" && f.load(Ordering::SeqCst) > 0 {
            f.fetch_sub(1, Ordering::SeqCst);
            return Err(ChatError::Http("recovery query failed".into()));
        }
        channel_route(r, &json!({ "channels": [] }))
    });
    let client = client(transport.clone(), requester.clone());
    client
        .set_user(User::new("alice"), ChatClient::dev_token("alice"))
        .await
        .unwrap();
    let first = servers.recv().await.unwrap();
    client.channel("messaging", "a", None).unwrap().watch().await.unwrap();

    let mut rx = client.subscribe();
    first.drop_connection();
    wait_for_event(&mut rx, EventType::ConnectionRecovered).await;

    let attempts: Vec<_> = requester
        .requests_to("/channels")
        .into_iter()
        .map(|r| r.auth.unwrap().connection_id.unwrap())
        .collect();
    assert_eq!(attempts, vec!["c-2", "c-3"]);
    wait_for(|| client.connection_id().as_deref() == Some("c-3")).await;
    assert_eq!(transport.opens(), 3);
}

#[tokio::test]
async fn test_recovery_drops_members_and_shares_that_ended_offline() {
    let (transport, mut servers) = FakeTransport::new(vec![
        Step::Accept(ok_frame("c-1")),
        Step::Accept(ok_frame("c-2")),
    ]);
    let requester = FakeRequester::new(|r| match r.path.as_str() {
        "/channels/messaging/a/query" => {
            let mut snap = snapshot("messaging:a", vec![message("m1", "bob", 1)]);
            snap["members"] = json!([
                { "user_id": "alice", "user": { "id": "alice" } },
                { "user_id": "bob", "user": { "id": "bob" } },
            ]);
            snap["active_live_locations"] = json!([{
                "user_id": "bob",
                "channel_cid": "messaging:a",
                "latitude": 52.5,
                "longitude": 13.4,
                "created_at": ts(1),
                "end_at": ts(200_000_000),
            }]);
            Ok(snap)
        }
        // bob left and stopped sharing while the socket was down.
        "/channels" => Ok(json!({
            "channels": [snapshot("messaging:a", vec![message("m1", "bob", 1)])]
        })),
        other => panic!("unexpected request to {other}"),
    });
    let client = client(transport, requester);
    client
        .set_user(User::new("alice"), ChatClient::dev_token("alice"))
        .await
        .unwrap();
    let first = servers.recv().await.unwrap();
    let a = client.channel("messaging", "a", None).unwrap();
    a.watch().await.unwrap();
    {
        let state = a.state().await;
        assert!(state.members().contains_key("bob"));
        assert!(state.live_location("bob").is_some());
    }

    let mut rx = client.subscribe();
    first.drop_connection();
    wait_for_event(&mut rx, EventType::ConnectionRecovered).await;

    let state = a.state().await;
    let mut members: Vec<_> = state.members().keys().cloned().collect();
    members.sort();
    assert_eq!(members, vec!["alice"]);
    assert!(state.live_locations().is_empty());
    assert_eq!(message_ids(&state), vec!["m1"]);
}
