use crate::domain::message::{DeleteScope, Message, MessageKind};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Destination context for one forward target: the room and the receiver
/// within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    pub room_id: String,
    pub receiver: String,
}

/// Events a client sends over the gateway. Closed set, validated at the
/// boundary; frames that do not decode into one of these are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        username: String,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    SendMessage {
        room_id: String,
        sender: String,
        receiver: String,
        message: String,
        reply_to_id: Option<Uuid>,
    },
    SendFile {
        room_id: String,
        sender: String,
        receiver: String,
        message_type: MessageKind,
        file_url: String,
        file_name: Option<String>,
        file_size: Option<i64>,
    },
    Typing {
        room_id: String,
        sender: String,
    },
    StopTyping {
        room_id: String,
        sender: String,
    },
    MessageSeen {
        room_id: String,
        viewer: String,
        message_ids: Option<Vec<Uuid>>,
    },
    MessageDelivered {
        room_id: String,
        message_id: Uuid,
    },
    DeleteMessage {
        message_id: Uuid,
        username: String,
        delete_for: DeleteScope,
        room_id: String,
    },
    /// Relay of already-persisted rows to extra rooms. The companion HTTP
    /// forward endpoint is the path that persists.
    ForwardMessage {
        messages: Vec<Message>,
        to_rooms: Vec<ForwardTarget>,
    },
    NewGroupCreated {
        group_id: String,
        group_name: String,
        members: Vec<String>,
        creator: String,
    },
    MembersAdded {
        group_id: String,
        group_name: String,
        new_members: Vec<String>,
        added_by: String,
    },
    MemberRemoved {
        group_id: String,
        removed_user: String,
        group_name: String,
    },
    MemberLeft {
        group_id: String,
        username: String,
        group_name: String,
    },
    GroupNameUpdated {
        group_id: String,
        new_name: String,
        updated_by: String,
    },
}

/// Events the server fans out to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    UserOnline {
        username: String,
    },
    UserOffline {
        username: String,
        #[serde(with = "time::serde::rfc3339")]
        last_seen: OffsetDateTime,
    },
    ReceiveMessage(Message),
    /// Lightweight conversation-list refresh, broadcast to every connection
    /// so list UIs update without joining every room.
    RoomUpdated {
        room_id: String,
        last_message: String,
        sender: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    Typing {
        room_id: String,
        sender: String,
    },
    StopTyping {
        room_id: String,
        sender: String,
    },
    MessageSeen {
        message_ids: Vec<Uuid>,
    },
    MessageDelivered {
        message_id: Uuid,
    },
    MessageDeleted {
        message_id: Uuid,
        delete_for: DeleteScope,
    },
    NewGroupCreated {
        group_id: String,
        group_name: String,
        creator: String,
        member_count: usize,
    },
    AddedToGroup {
        group_id: String,
        group_name: String,
        added_by: String,
    },
    RemovedFromGroup {
        group_id: String,
        group_name: String,
    },
    GroupMemberRemoved {
        group_id: String,
        removed_user: String,
        group_name: String,
    },
    GroupMembersAdded {
        group_id: String,
        group_name: String,
        new_members: Vec<String>,
        added_by: String,
    },
    GroupMemberLeft {
        group_id: String,
        group_name: String,
        username: String,
    },
    GroupNameUpdated {
        group_id: String,
        new_name: String,
        updated_by: String,
    },
    Error {
        message: String,
    },
}
