use crate::domain::message::{DeleteScope, MessageKind};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
pub(crate) struct RoomRecord {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_icon: Option<String>,
    pub member_count: i32,
    pub created_by: Option<String>,
    pub last_message: String,
    pub last_message_at: OffsetDateTime,
    pub last_sender: String,
    pub unread_a: i32,
    pub unread_b: i32,
    pub pinned_a: bool,
    pub pinned_b: bool,
    pub archived_a: bool,
    pub archived_b: bool,
    pub muted_a: bool,
    pub muted_b: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<RoomRecord> for crate::domain::room::Room {
    fn from(record: RoomRecord) -> Self {
        Self {
            id: record.id,
            participant_a: record.participant_a,
            participant_b: record.participant_b,
            is_group: record.is_group,
            group_name: record.group_name,
            group_icon: record.group_icon,
            member_count: record.member_count,
            created_by: record.created_by,
            last_message: record.last_message,
            last_message_at: record.last_message_at,
            last_sender: record.last_sender,
            unread_a: record.unread_a,
            unread_b: record.unread_b,
            pinned_a: record.pinned_a,
            pinned_b: record.pinned_b,
            archived_a: record.archived_a,
            archived_b: record.archived_b,
            muted_a: record.muted_a,
            muted_b: record.muted_b,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct MessageRecord {
    pub id: Uuid,
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub kind: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<Uuid>,
    pub is_forwarded: bool,
    pub forwarded_from: Option<String>,
    pub is_delivered: bool,
    pub is_seen: bool,
    pub is_deleted: bool,
    pub deleted_for: Option<String>,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl From<MessageRecord> for crate::domain::message::Message {
    fn from(record: MessageRecord) -> Self {
        let deleted_for = record.deleted_for.as_deref().map(|scope| match scope {
            "everyone" => DeleteScope::Everyone,
            _ => DeleteScope::Me,
        });
        Self {
            id: record.id,
            room_id: record.room_id,
            sender: record.sender,
            receiver: record.receiver,
            body: record.body,
            kind: MessageKind::parse(&record.kind),
            file_url: record.file_url,
            file_name: record.file_name,
            file_size: record.file_size,
            reply_to: record.reply_to,
            is_forwarded: record.is_forwarded,
            forwarded_from: record.forwarded_from,
            is_delivered: record.is_delivered,
            is_seen: record.is_seen,
            is_deleted: record.is_deleted,
            deleted_for,
            deleted_at: record.deleted_at,
            created_at: record.created_at,
        }
    }
}
