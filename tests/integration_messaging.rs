mod common;

use common::TestApp;
use serde_json::{Value, json};
use std::time::Duration;

async fn send_text(ws: &mut common::TestWs, room: &str, from: &str, to: &str, body: &str) -> String {
    // The room broadcast only reaches joined channels.
    ws.send_event(&json!({"event": "join_room", "data": {"roomId": room}})).await;
    ws.send_event(&json!({
        "event": "send_message",
        "data": {"roomId": room, "sender": from, "receiver": to, "message": body}
    }))
    .await;
    let received = ws.expect_event("receive_message").await;
    received["data"]["id"].as_str().expect("id").to_owned()
}

#[tokio::test]
async fn get_message_returns_the_stored_row() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;
    let id = send_text(&mut alice, "alice__bob", "alice", "bob", "hello").await;

    let message: Value = app
        .client
        .get(app.url(&format!("/messages/{id}")))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("body");
    assert_eq!(message["id"], id.as_str());
    assert_eq!(message["body"], "hello");
    assert_eq!(message["kind"], "text");
    assert_eq!(message["isForwarded"], false);
}

#[tokio::test]
async fn get_unknown_message_is_404() {
    let app = TestApp::spawn().await;
    let response = app
        .client
        .get(app.url(&format!("/messages/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .expect("get");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn forward_persists_copies_and_broadcasts_to_destinations() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;
    let first = send_text(&mut alice, "alice__bob", "alice", "bob", "one").await;
    let second = send_text(&mut alice, "alice__bob", "alice", "bob", "two").await;

    let mut carol = app.connect_ws(Some("carol")).await;
    carol.join_room("bob__carol", "carol").await;

    let response = app
        .client
        .post(app.url("/messages/forward"))
        .json(&json!({
            "messageIds": [first, second],
            "toRooms": [
                {"roomId": "bob__carol", "receiver": "carol"},
                {"roomId": "bob__dave", "receiver": "dave"}
            ],
            "sender": "bob"
        }))
        .send()
        .await
        .expect("forward");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["count"], 4);
    let copies = body["messages"].as_array().expect("array");
    assert!(copies.iter().all(|copy| copy["isForwarded"] == true));
    assert!(copies.iter().all(|copy| copy["forwardedFrom"] == "alice"));
    assert!(copies.iter().all(|copy| copy["isSeen"] == false));

    // Carol's live connection receives the copies landing in her room.
    let relayed = carol.expect_event("receive_message").await;
    assert_eq!(relayed["data"]["roomId"], "bob__carol");
    assert_eq!(relayed["data"]["sender"], "bob");
    carol.expect_event("receive_message").await;

    let history: Value = app
        .client
        .get(app.url("/chats/history/bob__dave"))
        .send()
        .await
        .expect("history")
        .json()
        .await
        .expect("body");
    assert_eq!(history.as_array().expect("array").len(), 2);
}

#[tokio::test]
async fn forward_with_unknown_sources_is_404() {
    let app = TestApp::spawn().await;
    let response = app
        .client
        .post(app.url("/messages/forward"))
        .json(&json!({
            "messageIds": [uuid::Uuid::new_v4()],
            "toRooms": [{"roomId": "bob__carol", "receiver": "carol"}],
            "sender": "bob"
        }))
        .send()
        .await
        .expect("forward");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn forward_with_empty_targets_is_400() {
    let app = TestApp::spawn().await;
    let response = app
        .client
        .post(app.url("/messages/forward"))
        .json(&json!({"messageIds": [uuid::Uuid::new_v4()], "toRooms": [], "sender": "bob"}))
        .send()
        .await
        .expect("forward");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn http_delete_for_everyone_is_sender_only() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;
    let id = send_text(&mut alice, "alice__bob", "alice", "bob", "oops").await;

    let response = app
        .client
        .delete(app.url(&format!("/messages/{id}")))
        .json(&json!({"username": "bob", "deleteFor": "everyone"}))
        .send()
        .await
        .expect("delete");
    assert_eq!(response.status(), 403);

    let response = app
        .client
        .delete(app.url(&format!("/messages/{id}")))
        .json(&json!({"username": "alice", "deleteFor": "everyone"}))
        .send()
        .await
        .expect("delete");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["deleteFor"], "everyone");

    // The socket side hears the broadcast too.
    let deleted = alice.expect_event("message_deleted").await;
    assert_eq!(deleted["data"]["messageId"], id.as_str());

    // The row survives, flagged; raw lookup still returns it.
    let message: Value = app
        .client
        .get(app.url(&format!("/messages/{id}")))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("body");
    assert_eq!(message["isDeleted"], true);
    assert_eq!(message["deletedFor"], "everyone");
}

#[tokio::test]
async fn http_delete_defaults_to_personal_scope() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;
    let id = send_text(&mut alice, "alice__bob", "alice", "bob", "hi").await;

    let response = app
        .client
        .delete(app.url(&format!("/messages/{id}")))
        .json(&json!({"username": "bob"}))
        .send()
        .await
        .expect("delete");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["deleteFor"], "me");

    let parsed: uuid::Uuid = id.parse().expect("uuid");
    assert_eq!(app.store.marker_count(parsed), 1);

    // Nobody else's view changed, so the sender hears nothing.
    alice.expect_silence("message_deleted", Duration::from_millis(300)).await;
}
