mod common;

use common::TestApp;
use parley_server::storage::ChatStore;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn join_broadcasts_user_online_and_disconnect_user_offline() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(None).await;

    bob.send_event(&json!({"event": "join", "data": {"username": "bob"}})).await;
    let online = alice.expect_event("user_online").await;
    assert_eq!(online["data"]["username"], "bob");

    bob.close().await;
    let offline = alice.expect_event("user_offline").await;
    assert_eq!(offline["data"]["username"], "bob");
    assert!(offline["data"]["lastSeen"].is_string());

    let user = app.store.user("bob").expect("bob persisted");
    assert!(!user.is_online);
    assert!(user.last_seen.is_some());
}

#[tokio::test]
async fn rejoin_takes_over_and_stale_disconnect_stays_silent() {
    let app = TestApp::spawn().await;
    let mut observer = app.connect_ws(Some("observer")).await;

    let first = app.connect_ws(Some("alice")).await;
    observer.expect_event("user_online").await;

    let _second = app.connect_ws(Some("alice")).await;
    observer.expect_event("user_online").await;

    // The displaced connection going away must not mark alice offline.
    first.close().await;
    observer.expect_silence("user_offline", Duration::from_millis(300)).await;
    assert!(app.store.user("alice").expect("alice persisted").is_online);
}

#[tokio::test]
async fn typing_reaches_room_peers_but_not_the_sender() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    let mut carol = app.connect_ws(Some("carol")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice.send_event(&json!({"event": "typing", "data": {"roomId": "alice__bob", "sender": "alice"}})).await;

    let typing = bob.expect_event("typing").await;
    assert_eq!(typing["data"]["sender"], "alice");
    alice.expect_silence("typing", Duration::from_millis(300)).await;
    carol.expect_silence("typing", Duration::from_millis(100)).await;

    alice
        .send_event(&json!({"event": "stop_typing", "data": {"roomId": "alice__bob", "sender": "alice"}}))
        .await;
    bob.expect_event("stop_typing").await;
}

#[tokio::test]
async fn disconnect_clears_typing_state_with_stop_typing_fanout() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice.send_event(&json!({"event": "typing", "data": {"roomId": "alice__bob", "sender": "alice"}})).await;
    bob.expect_event("typing").await;

    // Dropping mid-typing must not leave a stale indicator.
    alice.close().await;
    let stop = bob.expect_event("stop_typing").await;
    assert_eq!(stop["data"]["sender"], "alice");
}

#[tokio::test]
async fn send_message_broadcasts_row_to_room_and_summary_to_all() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    let mut outsider = app.connect_ws(Some("zoe")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": "hi", "replyToId": null}
        }))
        .await;

    let received = bob.expect_event("receive_message").await;
    assert_eq!(received["data"]["body"], "hi");
    assert_eq!(received["data"]["sender"], "alice");
    assert_eq!(received["data"]["isDelivered"], false);
    assert_eq!(received["data"]["isSeen"], false);

    // The summary goes to everyone, the full row only to room members.
    let summary = outsider.expect_event("room_updated").await;
    assert_eq!(summary["data"]["roomId"], "alice__bob");
    assert_eq!(summary["data"]["lastMessage"], "hi");
    outsider.expect_silence("receive_message", Duration::from_millis(200)).await;
}

#[tokio::test]
async fn send_file_derives_the_preview_from_the_kind() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    alice.send_event(&json!({"event": "join_room", "data": {"roomId": "alice__bob"}})).await;

    alice
        .send_event(&json!({
            "event": "send_file",
            "data": {
                "roomId": "alice__bob", "sender": "alice", "receiver": "bob",
                "messageType": "image", "fileUrl": "http://files/pic.png",
                "fileName": "pic.png", "fileSize": 2048
            }
        }))
        .await;

    let received = alice.expect_event("receive_message").await;
    assert_eq!(received["data"]["kind"], "image");
    assert_eq!(received["data"]["fileUrl"], "http://files/pic.png");

    let summary = alice.expect_event("room_updated").await;
    assert_eq!(summary["data"]["lastMessage"], "Photo");
}

#[tokio::test]
async fn seen_and_delivered_acks_broadcast_to_the_room() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": "hi"}
        }))
        .await;
    let received = bob.expect_event("receive_message").await;
    let message_id = received["data"]["id"].as_str().expect("id").to_owned();

    bob.send_event(&json!({
        "event": "message_delivered",
        "data": {"roomId": "alice__bob", "messageId": message_id}
    }))
    .await;
    let delivered = alice.expect_event("message_delivered").await;
    assert_eq!(delivered["data"]["messageId"], message_id.as_str());

    bob.send_event(&json!({
        "event": "message_seen",
        "data": {"roomId": "alice__bob", "viewer": "bob", "messageIds": null}
    }))
    .await;
    let seen = alice.expect_event("message_seen").await;
    assert_eq!(seen["data"]["messageIds"][0], message_id.as_str());

    // Re-acking delivery after the flip stays silent.
    bob.send_event(&json!({
        "event": "message_delivered",
        "data": {"roomId": "alice__bob", "messageId": message_id}
    }))
    .await;
    alice.expect_silence("message_delivered", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn seen_ack_with_blank_viewer_errors_and_flips_nothing() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": "hi"}
        }))
        .await;
    let received = bob.expect_event("receive_message").await;
    let message_id: uuid::Uuid = received["data"]["id"].as_str().expect("id").parse().expect("uuid");

    bob.send_event(&json!({
        "event": "message_seen",
        "data": {"roomId": "alice__bob", "viewer": "", "messageIds": null}
    }))
    .await;

    bob.expect_event("error").await;
    alice.expect_silence("message_seen", Duration::from_millis(300)).await;
    let row = app.store.message(message_id).await.expect("query").expect("exists");
    assert!(!row.is_seen);
}

#[tokio::test]
async fn delete_for_everyone_broadcasts_and_delete_for_me_echoes_privately() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": "oops"}
        }))
        .await;
    let received = bob.expect_event("receive_message").await;
    let message_id = received["data"]["id"].as_str().expect("id").to_owned();

    // Personal delete by bob: only bob hears about it.
    bob.send_event(&json!({
        "event": "delete_message",
        "data": {"messageId": message_id, "username": "bob", "deleteFor": "me", "roomId": "alice__bob"}
    }))
    .await;
    let deleted = bob.expect_event("message_deleted").await;
    assert_eq!(deleted["data"]["deleteFor"], "me");
    alice.expect_silence("message_deleted", Duration::from_millis(300)).await;

    // Sender deletes for everyone: the whole room hears.
    alice
        .send_event(&json!({
            "event": "delete_message",
            "data": {"messageId": message_id, "username": "alice", "deleteFor": "everyone", "roomId": "alice__bob"}
        }))
        .await;
    let deleted = bob.expect_event("message_deleted").await;
    assert_eq!(deleted["data"]["deleteFor"], "everyone");
}

#[tokio::test]
async fn non_sender_delete_for_everyone_yields_an_error_event() {
    let app = TestApp::spawn().await;

    let mut alice = app.connect_ws(Some("alice")).await;
    let mut bob = app.connect_ws(Some("bob")).await;
    alice.join_room("alice__bob", "alice").await;
    bob.join_room("alice__bob", "bob").await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": "mine"}
        }))
        .await;
    let received = bob.expect_event("receive_message").await;
    let message_id = received["data"]["id"].as_str().expect("id").to_owned();

    bob.send_event(&json!({
        "event": "delete_message",
        "data": {"messageId": message_id, "username": "bob", "deleteFor": "everyone", "roomId": "alice__bob"}
    }))
    .await;

    bob.expect_event("error").await;
    alice.expect_silence("message_deleted", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn invalid_send_yields_an_error_event_with_no_side_effects() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;

    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "alice__bob", "sender": "alice", "receiver": "bob", "message": ""}
        }))
        .await;

    alice.expect_event("error").await;
    assert!(app.store.room("alice__bob").await.expect("query").is_none());
}

#[tokio::test]
async fn undecodable_frames_are_ignored_and_the_session_survives() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect_ws(Some("alice")).await;

    alice.send_event(&json!({"event": "no_such_event", "data": {}})).await;

    // The session is still live afterwards.
    alice.send_event(&json!({"event": "join_room", "data": {"roomId": "r"}})).await;
    alice
        .send_event(&json!({
            "event": "send_message",
            "data": {"roomId": "r", "sender": "alice", "receiver": "bob", "message": "still here"}
        }))
        .await;
    alice.expect_event("receive_message").await;
}

#[tokio::test]
async fn group_relay_events_notify_members_and_the_room() {
    let app = TestApp::spawn().await;

    let mut creator = app.connect_ws(Some("carol")).await;
    let mut member = app.connect_ws(Some("dave")).await;
    let offline_peer = app.connect_ws(Some("erin")).await;
    offline_peer.close().await;

    creator
        .send_event(&json!({
            "event": "new_group_created",
            "data": {"groupId": "g1", "groupName": "trip", "members": ["dave", "erin"], "creator": "carol"}
        }))
        .await;

    let event = member.expect_event("new_group_created").await;
    assert_eq!(event["data"]["groupName"], "trip");
    assert_eq!(event["data"]["memberCount"], 2);

    creator
        .send_event(&json!({
            "event": "member_removed",
            "data": {"groupId": "g1", "removedUser": "dave", "groupName": "trip"}
        }))
        .await;
    let removed = member.expect_event("removed_from_group").await;
    assert_eq!(removed["data"]["groupId"], "g1");
}
