use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Separator for deterministic 1:1 room ids and for the delimited member
/// list stored in `participant_b` on group rooms.
pub const ROOM_ID_SEPARATOR: &str = "__";
pub const MEMBER_SEPARATOR: char = ',';

/// Maximum length of the stored last-message preview, in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// The two positional slots of a conversation. Per-side state (unread count,
/// pinned/archived/muted) binds to a slot, never to a username; callers
/// re-resolve which side they occupy on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomSide {
    A,
    B,
}

impl RoomSide {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// A conversation, 1:1 or group, with its derived aggregate state.
///
/// For 1:1 rooms `participant_a` and `participant_b` hold the two usernames
/// in lexicographic order. For groups `participant_a` is the creator/owner
/// and `participant_b` the comma-delimited member list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_icon: Option<String>,
    pub member_count: i32,
    pub created_by: Option<String>,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
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
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Derives the 1:1 room id for a pair of users. Commutative: both sides
/// compute the same id regardless of who initiates.
#[must_use]
pub fn direct_room_id(user_a: &str, user_b: &str) -> String {
    let (first, second) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
    format!("{first}{ROOM_ID_SEPARATOR}{second}")
}

/// Truncates preview text to at most `max` characters, on a char boundary.
#[must_use]
pub fn truncate_preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl Room {
    /// Builds a fresh 1:1 room with the participants sorted into sides, so
    /// side assignment matches the id derivation no matter who sent first.
    #[must_use]
    pub fn direct(id: String, user_a: &str, user_b: &str) -> Self {
        let (a, b) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            participant_a: a.to_owned(),
            participant_b: b.to_owned(),
            is_group: false,
            group_name: None,
            group_icon: None,
            member_count: 2,
            created_by: None,
            last_message: String::new(),
            last_message_at: now,
            last_sender: String::new(),
            unread_a: 0,
            unread_b: 0,
            pinned_a: false,
            pinned_b: false,
            archived_a: false,
            archived_b: false,
            muted_a: false,
            muted_b: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a fresh group room. The creator occupies side A; the member
    /// list lands in side B as a comma-delimited field. The preview is
    /// seeded with a creation line.
    #[must_use]
    pub fn group(
        id: String,
        creator: &str,
        members: &str,
        name: Option<String>,
        icon: Option<String>,
        member_count: i32,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            participant_a: creator.to_owned(),
            participant_b: members.to_owned(),
            is_group: true,
            group_name: name,
            group_icon: icon,
            member_count,
            created_by: Some(creator.to_owned()),
            last_message: format!("{creator} created the group"),
            last_message_at: now,
            last_sender: creator.to_owned(),
            unread_a: 0,
            unread_b: 0,
            pinned_a: false,
            pinned_b: false,
            archived_a: false,
            archived_b: false,
            muted_a: false,
            muted_b: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exact membership check. The store-level `LIKE` lookup is only a coarse
    /// prefilter; this split-on-delimiter comparison is the correctness
    /// bearer, so "al" never matches a stored member "ally".
    #[must_use]
    pub fn is_member(&self, username: &str) -> bool {
        if self.participant_a == username {
            return true;
        }
        self.participant_b.split(MEMBER_SEPARATOR).any(|member| member.trim() == username)
    }

    /// Which side `username` occupies, if any.
    #[must_use]
    pub fn side_of(&self, username: &str) -> Option<RoomSide> {
        if self.participant_a == username {
            Some(RoomSide::A)
        } else if self.is_member(username) {
            Some(RoomSide::B)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn unread(&self, side: RoomSide) -> i32 {
        match side {
            RoomSide::A => self.unread_a,
            RoomSide::B => self.unread_b,
        }
    }

    /// Projects the room onto the requesting user's side: their unread
    /// counter and flags, and for 1:1 rooms the other participant. Returns
    /// `None` when the user is not a member.
    #[must_use]
    pub fn summarize_for(&self, username: &str) -> Option<RoomSummary> {
        let side = self.side_of(username)?;
        let (unread_count, pinned, archived, muted) = match side {
            RoomSide::A => (self.unread_a, self.pinned_a, self.archived_a, self.muted_a),
            RoomSide::B => (self.unread_b, self.pinned_b, self.archived_b, self.muted_b),
        };
        let other_user = if self.is_group {
            None
        } else {
            Some(match side {
                RoomSide::A => self.participant_b.clone(),
                RoomSide::B => self.participant_a.clone(),
            })
        };
        Some(RoomSummary {
            room_id: self.id.clone(),
            is_group: self.is_group,
            group_name: self.group_name.clone(),
            group_icon: self.group_icon.clone(),
            member_count: self.member_count,
            other_user,
            last_message: self.last_message.clone(),
            last_message_at: self.last_message_at,
            last_sender: self.last_sender.clone(),
            unread_count,
            pinned,
            archived,
            muted,
        })
    }
}

/// A room as seen from one participant's side, for conversation-list UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_icon: Option<String>,
    pub member_count: i32,
    pub other_user: Option<String>,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_at: OffsetDateTime,
    pub last_sender: String,
    pub unread_count: i32,
    pub pinned: bool,
    pub archived: bool,
    pub muted: bool,
}
