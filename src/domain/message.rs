use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    /// Parses a stored kind column. Unknown values fall back to `File`, which
    /// matches how previews treat anything that is not text or an image.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::File,
        }
    }
}

/// Scope of a message deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    Me,
    Everyone,
}

impl DeleteScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Me => "me",
            Self::Everyone => "everyone",
        }
    }
}

/// A chat message. The content fields are immutable after creation; only the
/// delivery and deletion flags change. Deletion never erases the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<Uuid>,
    pub is_forwarded: bool,
    pub forwarded_from: Option<String>,
    pub is_delivered: bool,
    pub is_seen: bool,
    pub is_deleted: bool,
    pub deleted_for: Option<DeleteScope>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Builds a fresh text message, undelivered and unseen.
    #[must_use]
    pub fn text(
        room_id: String,
        sender: String,
        receiver: String,
        body: String,
        reply_to: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            sender,
            receiver,
            body,
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to,
            is_forwarded: false,
            forwarded_from: None,
            is_delivered: false,
            is_seen: false,
            is_deleted: false,
            deleted_for: None,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Builds a fresh file message. The body stays empty; clients render from
    /// the file reference.
    #[must_use]
    pub fn file(
        room_id: String,
        sender: String,
        receiver: String,
        kind: MessageKind,
        file_url: String,
        file_name: Option<String>,
        file_size: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            sender,
            receiver,
            body: String::new(),
            kind,
            file_url: Some(file_url),
            file_name,
            file_size,
            reply_to: None,
            is_forwarded: false,
            forwarded_from: None,
            is_delivered: false,
            is_seen: false,
            is_deleted: false,
            deleted_for: None,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Copies this message into `room_id` as a forward by `sender`, with
    /// delivery state reset and a fresh timestamp. The origin of the content
    /// is preserved in `forwarded_from`.
    #[must_use]
    pub fn forward_to(&self, room_id: String, sender: String, receiver: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            sender,
            receiver,
            body: self.body.clone(),
            kind: self.kind,
            file_url: self.file_url.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            reply_to: None,
            is_forwarded: true,
            forwarded_from: Some(self.sender.clone()),
            is_delivered: false,
            is_seen: false,
            is_deleted: false,
            deleted_for: None,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// The text shown in conversation-list previews for this message.
    #[must_use]
    pub fn preview_text(&self) -> &str {
        match self.kind {
            MessageKind::Text => &self.body,
            MessageKind::Image => "Photo",
            _ => "File",
        }
    }

    /// True when the message is flagged deleted for everyone and therefore
    /// hidden from every viewer.
    #[must_use]
    pub fn hidden_for_everyone(&self) -> bool {
        self.is_deleted && self.deleted_for == Some(DeleteScope::Everyone)
    }
}
