mod common;

use chrono::{Duration, Utc};
use common::*;
use sc_client::{Channel, ChatClient, MessagePayload};
use sc_core::error::ChatError;
use sc_models::{EventType, User};
use serde_json::{json, Value};

/// Far enough ahead that the clean ticker never expires it.
fn far_future() -> String {
    ts(1_000_000_000)
}

fn location_event(kind: &str, user: &str, latitude: f64, secs: i64) -> Value {
    json!({
        "type": kind,
        "cid": "messaging:a",
        "created_at": ts(secs),
        "live_location": {
            "user_id": user,
            "channel_cid": "messaging:a",
            "latitude": latitude,
            "longitude": 4.9,
            "end_at": far_future(),
        },
    })
}

fn route(request: &sc_api::ApiRequest) -> sc_core::error::ChatResult<Value> {
    match request.path.as_str() {
        "/channels/messaging/a/message" => {
            let shared = request.body.as_ref().unwrap()["message"]["shared_location"].clone();
            Ok(json!({
                "message": {
                    "id": "loc-1",
                    "text": "",
                    "user": { "id": "alice" },
                    "created_at": ts(0),
                    "shared_location": shared,
                }
            }))
        }
        "/users/live_locations" => {
            let body = request.body.clone().unwrap();
            Ok(json!({
                "user_id": "alice",
                "message_id": body["message_id"],
                "latitude": body.get("latitude").cloned().unwrap_or(json!(0.0)),
                "longitude": body.get("longitude").cloned().unwrap_or(json!(0.0)),
                "end_at": body.get("end_at").cloned().unwrap_or(json!(far_future())),
            }))
        }
        _ => default_route(request),
    }
}

async fn watched_channel() -> (ChatClient, Channel, ServerEnd, std::sync::Arc<FakeRequester>) {
    let (transport, mut servers) = FakeTransport::new(vec![Step::Accept(ok_frame("c-1"))]);
    let requester = FakeRequester::new(route);
    let client = client(transport, requester.clone());
    client
        .set_user(User::new("alice"), ChatClient::dev_token("alice"))
        .await
        .unwrap();
    let server = servers.recv().await.unwrap();
    let channel = client.channel("messaging", "a", None).unwrap();
    channel.watch().await.unwrap();
    (client, channel, server, requester)
}

/// Push a marker event and wait until it has been dispatched, so every
/// frame pushed before it has been applied.
async fn settle(client: &ChatClient, server: &ServerEnd) {
    let mut rx = client.subscribe();
    server.push(json!({ "type": "custom.marker" }));
    while rx.recv().await.unwrap().kind != EventType::Unknown("custom.marker".into()) {}
}

#[tokio::test]
async fn test_stopped_location_is_not_resurrected() {
    let (client, channel, server, _) = watched_channel().await;

    server.push(location_event("live_location.started", "bob", 52.1, 10));
    server.push(location_event("live_location.updated", "bob", 52.2, 11));
    settle(&client, &server).await;
    assert_eq!(channel.state().await.live_location("bob").unwrap().latitude, 52.2);

    server.push(location_event("live_location.stopped", "bob", 52.2, 12));
    server.push(location_event("live_location.updated", "bob", 52.3, 13));
    server.push(location_event("live_location.started", "bob", 52.1, 10));
    settle(&client, &server).await;
    assert!(channel.state().await.live_location("bob").is_none());

    server.push(location_event("live_location.started", "bob", 48.8, 20));
    settle(&client, &server).await;
    assert_eq!(channel.state().await.live_location("bob").unwrap().latitude, 48.8);
}

#[tokio::test]
async fn test_out_of_range_latitude_is_rejected_locally() {
    let (_client, channel, _server, requester) = watched_channel().await;
    let sent_before = requester.requests().len();
    let before = channel.state().await;

    let err = channel
        .start_live_location(91.0, 4.9, Utc::now() + Duration::hours(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(err.status(), Some(400));

    let payload = MessagePayload {
        shared_location: Some(json!({ "latitude": 91.0, "longitude": 4.9 })),
        ..Default::default()
    };
    let err = channel.send_message(payload).await.unwrap_err();
    assert_eq!(err.status(), Some(400));

    assert_eq!(requester.requests().len(), sent_before);
    assert_eq!(channel.state().await, before);
}

#[tokio::test]
async fn test_own_share_lifecycle() {
    let (client, channel, server, requester) = watched_channel().await;

    let message = channel
        .start_live_location(52.37, 4.89, Utc::now() + Duration::hours(1), Some("phone".into()))
        .await
        .unwrap();
    assert_eq!(message.id, "loc-1");
    let sent = requester.requests_to("/channels/messaging/a/message");
    let shared = &sent[0].body.as_ref().unwrap()["message"]["shared_location"];
    assert_eq!(shared["latitude"], 52.37);
    assert_eq!(shared["created_by_device_id"], "phone");

    let state = channel.state().await;
    let mine = state.live_location("alice").unwrap();
    assert_eq!(mine.message_id.as_deref(), Some("loc-1"));
    assert!(state.message("loc-1").is_some());

    let moved = channel.update_live_location("loc-1", 52.40, 4.90).await.unwrap();
    assert_eq!(moved.latitude, 52.40);
    assert_eq!(channel.state().await.live_location("alice").unwrap().latitude, 52.40);

    channel.stop_live_location("loc-1").await.unwrap();
    assert!(channel.state().await.live_location("alice").is_none());
    let stop = requester.requests_to("/users/live_locations").pop().unwrap();
    assert!(stop.body.unwrap().get("end_at").is_some());

    // An update already in flight from the server must not bring it back.
    server.push(location_event("live_location.updated", "alice", 52.41, 1_000));
    settle(&client, &server).await;
    assert!(channel.state().await.live_location("alice").is_none());
}

#[tokio::test]
async fn test_stop_without_coordinates_still_applies() {
    let (client, channel, server, _) = watched_channel().await;
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = seen.clone();
    client.on(EventType::LiveLocationStopped, move |e| {
        s.lock().unwrap().push(e.extra["live_location"]["user_id"].clone());
    });

    server.push(location_event("live_location.started", "bob", 52.1, 10));
    server.push(json!({
        "type": "live_location.stopped",
        "cid": "messaging:a",
        "created_at": ts(12),
        "live_location": { "user_id": "bob", "end_at": ts(12) },
    }));
    server.push(location_event("live_location.started", "bob", 52.1, 11));
    settle(&client, &server).await;

    assert_eq!(*seen.lock().unwrap(), vec![json!("bob")]);
    assert!(channel.state().await.live_location("bob").is_none());
}

#[tokio::test]
async fn test_stop_uses_server_time_for_later_starts() {
    let (client, channel, server, requester) = watched_channel().await;
    channel
        .start_live_location(52.37, 4.89, Utc::now() + Duration::hours(1), None)
        .await
        .unwrap();

    // The server clock is well behind the local one.
    requester.set_route(|request| match request.path.as_str() {
        "/users/live_locations" => Ok(json!({
            "user_id": "alice",
            "message_id": "loc-1",
            "updated_at": ts(5),
            "end_at": ts(5),
        })),
        _ => route(request),
    });
    channel.stop_live_location("loc-1").await.unwrap();
    assert!(channel.state().await.live_location("alice").is_none());

    server.push(location_event("live_location.started", "alice", 52.5, 4));
    settle(&client, &server).await;
    assert!(channel.state().await.live_location("alice").is_none());

    server.push(location_event("live_location.started", "alice", 52.5, 6));
    settle(&client, &server).await;
    assert_eq!(channel.state().await.live_location("alice").unwrap().latitude, 52.5);
}
