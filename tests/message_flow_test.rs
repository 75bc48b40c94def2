// Integration tests for the chat message workflow, driven through the router
// the way a websocket connection drives it

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use swiftchat_relay::auth::Identity;
use swiftchat_relay::config::ServerConfig;
use swiftchat_relay::core::{ConnectionSession, EventRouter, RelayServer};
use swiftchat_relay::mail::LogMailSender;
use swiftchat_relay::storage::{
    FriendshipStorage, MessageStorage, MemoryStorage, RoomStorage, RoomType, StoredUser,
    UserStorage,
};

struct TestRelay {
    storage: Arc<MemoryStorage>,
    router: Arc<EventRouter>,
    room_id: Uuid,
}

async fn relay() -> TestRelay {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .create_user(StoredUser::new("u1", "a@x.com", "alice"))
        .await
        .unwrap();
    storage
        .create_user(StoredUser::new("u2", "b@x.com", "bob"))
        .await
        .unwrap();
    let room = storage.create_room(RoomType::Private, "u1").await.unwrap();

    let server = RelayServer::new(
        ServerConfig::for_testing(),
        storage.clone(),
        Arc::new(LogMailSender),
    );

    TestRelay {
        storage,
        router: server.router(),
        room_id: room.id,
    }
}

fn connect(router: &EventRouter, user_id: &str, email: &str) -> (ConnectionSession, UnboundedReceiver<String>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = router.connect(Identity::new(user_id, email), tx);

    let connected: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(connected["event"], "connected");
    (session, rx)
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

async fn send(router: &EventRouter, session: &ConnectionSession, frame: Value) {
    router.handle_frame(session, &frame.to_string()).await;
}

async fn join(router: &EventRouter, session: &ConnectionSession, room_id: Uuid) {
    send(router, session, json!({ "event": "join-room", "data": { "room_id": room_id } })).await;
}

fn send_message(room_id: Uuid, body: &str, to: &str, ack: u64) -> Value {
    json!({
        "event": "send-message",
        "data": { "room_id": room_id, "message": body, "other_user_email": to },
        "ack": ack
    })
}

fn ack_status(frames: &[Value], ack: u64) -> Option<String> {
    frames
        .iter()
        .find(|frame| frame["event"] == "ack" && frame["data"]["ack"] == ack)
        .and_then(|frame| frame["data"]["status"].as_str())
        .map(str::to_string)
}

async fn message_count(relay: &TestRelay) -> u64 {
    relay
        .storage
        .get_room(relay.room_id)
        .await
        .unwrap()
        .unwrap()
        .message_count
}

#[tokio::test]
async fn test_message_reaches_room_and_notification_channel() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let (bob, mut bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &bob, relay.room_id).await;

    send(&relay.router, &alice, send_message(relay.room_id, "hi", "b@x.com", 1)).await;

    let alice_frames = drain(&mut alice_rx);
    assert_eq!(ack_status(&alice_frames, 1).as_deref(), Some("success"));

    let bob_frames = drain(&mut bob_rx);
    let room_events: Vec<_> = bob_frames
        .iter()
        .filter(|frame| frame["event"] == "new_message")
        .collect();
    assert_eq!(room_events.len(), 1);
    assert_eq!(room_events[0]["data"]["body"], "hi");
    assert_eq!(room_events[0]["data"]["room_id"], relay.room_id.to_string());

    let notifications: Vec<_> = bob_frames
        .iter()
        .filter(|frame| frame["event"] == "notification")
        .collect();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["data"]["action"], "new_message");
    assert_eq!(notifications[0]["data"]["data"]["message"], "hi");
    assert_eq!(notifications[0]["data"]["data"]["sender_id"], "u1");

    assert_eq!(message_count(&relay).await, 1);
}

#[tokio::test]
async fn test_blocked_sender_is_rejected_without_write() {
    let relay = relay().await;
    relay
        .storage
        .set_blocked("b@x.com", "a@x.com", true)
        .await
        .unwrap();
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let (bob, mut bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &bob, relay.room_id).await;

    send(&relay.router, &alice, send_message(relay.room_id, "hi", "B@X.com", 2)).await;

    assert_eq!(ack_status(&drain(&mut alice_rx), 2).as_deref(), Some("error"));
    assert!(drain(&mut bob_rx).is_empty());
    assert_eq!(message_count(&relay).await, 0);
}

#[tokio::test]
async fn test_invalid_bodies_fail_before_any_write() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let too_long = "x".repeat(ServerConfig::for_testing().max_message_length + 1);

    send(&relay.router, &alice, send_message(relay.room_id, "   ", "b@x.com", 3)).await;
    send(&relay.router, &alice, send_message(relay.room_id, &too_long, "b@x.com", 4)).await;

    let frames = drain(&mut alice_rx);
    assert_eq!(ack_status(&frames, 3).as_deref(), Some("error"));
    assert_eq!(ack_status(&frames, 4).as_deref(), Some("error"));
    assert_eq!(message_count(&relay).await, 0);
}

#[tokio::test]
async fn test_unknown_room_reports_error() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");

    send(&relay.router, &alice, send_message(Uuid::new_v4(), "hi", "b@x.com", 5)).await;

    assert_eq!(ack_status(&drain(&mut alice_rx), 5).as_deref(), Some("error"));
}

#[tokio::test]
async fn test_malformed_events_are_dropped_silently() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");

    relay.router.handle_frame(&alice, "not json").await;
    send(
        &relay.router,
        &alice,
        json!({ "event": "send-message", "data": { "room_id": relay.room_id }, "ack": 6 }),
    )
    .await;
    send(
        &relay.router,
        &alice,
        json!({
            "event": "send-message",
            "data": { "room_id": relay.room_id, "message": "no ack", "other_user_email": "b@x.com" }
        }),
    )
    .await;

    assert!(drain(&mut alice_rx).is_empty());
    assert_eq!(message_count(&relay).await, 0);
}

#[tokio::test]
async fn test_oversized_frame_is_dropped() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let padding = "x".repeat(relay.router.max_frame_size());

    send(&relay.router, &alice, send_message(relay.room_id, &padding, "b@x.com", 7)).await;

    assert!(drain(&mut alice_rx).is_empty());
    assert_eq!(message_count(&relay).await, 0);
}

#[tokio::test]
async fn test_edit_then_delete_keeps_edited_body() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let (bob, mut bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &bob, relay.room_id).await;

    send(&relay.router, &alice, send_message(relay.room_id, "first", "b@x.com", 1)).await;
    drain(&mut alice_rx);
    let message_id = drain(&mut bob_rx)
        .into_iter()
        .find(|frame| frame["event"] == "new_message")
        .and_then(|frame| frame["data"]["id"].as_str().map(str::to_string))
        .unwrap();

    send(
        &relay.router,
        &alice,
        json!({
            "event": "edit-message",
            "data": {
                "other_user_email": "b@x.com",
                "room_id": relay.room_id,
                "message_id": message_id,
                "edited_message": "second"
            }
        }),
    )
    .await;
    send(
        &relay.router,
        &alice,
        json!({
            "event": "delete-message",
            "data": { "other_user_email": "b@x.com", "room_id": relay.room_id, "message_id": message_id }
        }),
    )
    .await;

    let frames = drain(&mut bob_rx);
    let events: Vec<&str> = frames.iter().filter_map(|f| f["event"].as_str()).collect();
    assert_eq!(
        events,
        vec!["edit_message", "notification", "delete_message", "notification"]
    );
    assert_eq!(frames[0]["data"]["edited_message"], "second");
    assert_eq!(frames[1]["data"]["action"], "edit_message");
    assert_eq!(frames[2]["data"]["message_id"], message_id.as_str());
    assert_eq!(frames[3]["data"]["action"], "delete_message");
    assert_eq!(frames[3]["data"]["data"]["room_id"], relay.room_id.to_string());

    let id = Uuid::parse_str(&message_id).unwrap();
    let stored = relay.storage.get_message(id).await.unwrap().unwrap();
    assert!(stored.is_deleted());
    assert_eq!(stored.body, "second");

    let room = relay.storage.get_room(relay.room_id).await.unwrap().unwrap();
    assert_eq!(room.message_count, 1);
    assert_eq!(room.last_message, None);
}

#[tokio::test]
async fn test_editing_newest_message_refreshes_room_snapshot() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    join(&relay.router, &alice, relay.room_id).await;

    send(&relay.router, &alice, send_message(relay.room_id, "older", "b@x.com", 1)).await;
    send(&relay.router, &alice, send_message(relay.room_id, "newest", "b@x.com", 2)).await;
    let newest_id = drain(&mut alice_rx)
        .into_iter()
        .filter(|frame| frame["event"] == "new_message")
        .last()
        .and_then(|frame| frame["data"]["id"].as_str().map(str::to_string))
        .unwrap();

    send(
        &relay.router,
        &alice,
        json!({
            "event": "edit-message",
            "data": {
                "other_user_email": "b@x.com",
                "room_id": relay.room_id,
                "message_id": newest_id,
                "edited_message": "newest, fixed typo"
            }
        }),
    )
    .await;

    let room = relay.storage.get_room(relay.room_id).await.unwrap().unwrap();
    let last = room.last_message.unwrap();
    assert_eq!(last.message_id.to_string(), newest_id);
    assert_eq!(last.body, "newest, fixed typo");
    assert_eq!(room.message_count, 2);
    assert_eq!(room.version, 3);
}

#[tokio::test]
async fn test_only_the_author_may_delete() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let (bob, mut bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &alice, relay.room_id).await;

    send(&relay.router, &alice, send_message(relay.room_id, "mine", "b@x.com", 1)).await;
    let message_id = drain(&mut alice_rx)
        .into_iter()
        .find(|frame| frame["event"] == "new_message")
        .and_then(|frame| frame["data"]["id"].as_str().map(str::to_string))
        .unwrap();
    drain(&mut bob_rx);

    send(
        &relay.router,
        &bob,
        json!({
            "event": "delete-message",
            "data": { "other_user_email": "a@x.com", "room_id": relay.room_id, "message_id": message_id }
        }),
    )
    .await;

    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut bob_rx).is_empty());
    let id = Uuid::parse_str(&message_id).unwrap();
    assert!(!relay.storage.get_message(id).await.unwrap().unwrap().is_deleted());
}

#[tokio::test]
async fn test_disconnected_receiver_is_a_no_op() {
    let relay = relay().await;
    let (alice, mut alice_rx) = connect(&relay.router, "u1", "a@x.com");
    let (bob, bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &bob, relay.room_id).await;

    relay.router.disconnect(&bob);
    drop(bob_rx);
    assert!(!relay.router.registry().is_online("u2"));

    send(&relay.router, &alice, send_message(relay.room_id, "anyone?", "b@x.com", 8)).await;

    assert_eq!(ack_status(&drain(&mut alice_rx), 8).as_deref(), Some("success"));
    assert_eq!(message_count(&relay).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_room_delivery_follows_commit_order() {
    let relay = relay().await;
    let (bob, mut bob_rx) = connect(&relay.router, "u2", "b@x.com");
    join(&relay.router, &bob, relay.room_id).await;

    let mut tasks = Vec::new();
    for sender in 0..4 {
        let router = relay.router.clone();
        let room_id = relay.room_id;
        tasks.push(tokio::spawn(async move {
            let (tx, _rx) = mpsc::unbounded_channel();
            let session = router.connect(Identity::new("u1", "a@x.com"), tx);
            for n in 0..10u64 {
                let body = format!("{}-{}", sender, n);
                router
                    .handle_frame(&session, &send_message(room_id, &body, "b@x.com", n).to_string())
                    .await;
            }
            router.disconnect(&session);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let delivered: Vec<String> = drain(&mut bob_rx)
        .into_iter()
        .filter(|frame| frame["event"] == "new_message")
        .filter_map(|frame| frame["data"]["id"].as_str().map(str::to_string))
        .collect();
    let committed: Vec<String> = relay
        .storage
        .get_room_messages(relay.room_id, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|message| message.id.to_string())
        .collect();

    assert_eq!(committed.len(), 40);
    assert_eq!(delivered, committed);
    assert_eq!(message_count(&relay).await, 40);
}
