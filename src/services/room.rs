use crate::domain::room::{PREVIEW_MAX_CHARS, Room, RoomSummary, truncate_preview};
use crate::error::{AppError, Result};
use crate::storage::ChatStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// Explicit room-creation request, 1:1 or group.
#[derive(Debug, Clone)]
pub struct CreateRoom {
    pub room_id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_icon: Option<String>,
    pub member_count: Option<i32>,
    pub created_by: Option<String>,
}

/// Partial group-metadata update.
#[derive(Debug, Clone, Default)]
pub struct UpdateGroup {
    pub group_name: Option<String>,
    pub participants: Option<String>,
    pub member_count: Option<i32>,
}

/// Maintains each conversation's derived summary and reconciles it on every
/// message event: unread counters on the side that did not send, last-message
/// preview fields, mark-as-read resets, and side-projected listings.
#[derive(Clone, Debug)]
pub struct RoomService {
    store: Arc<dyn ChatStore>,
}

impl RoomService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Loads the room, creating it lazily on first send. New 1:1 rooms sort
    /// the two participants into sides, so side assignment matches the
    /// deterministic id derivation regardless of who initiates.
    ///
    /// # Errors
    /// Returns `AppError::Database` on store failure.
    pub async fn ensure_room(&self, room_id: &str, sender: &str, receiver: &str) -> Result<Room> {
        if let Some(room) = self.store.room(room_id).await? {
            return Ok(room);
        }
        let room = Room::direct(room_id.to_owned(), sender, receiver);
        self.store.insert_room(&room).await?;
        tracing::info!(room_id = %room.id, "Room created lazily on first send");
        // Re-read after insert: a racing send may have created it first, and
        // insert is idempotent on conflict.
        Ok(self.store.room(room_id).await?.unwrap_or(room))
    }

    /// Applies one sent message to the aggregate: bumps the unread counter
    /// of the side that is not the sender and rewrites the preview fields.
    /// The write is a single atomic store-side increment, so two racing
    /// sends to the same room both land.
    ///
    /// # Errors
    /// Returns `AppError::Database` on store failure.
    pub async fn record_message(&self, room: &Room, preview: &str, sender: &str, at: OffsetDateTime) -> Result<()> {
        let unread_side = match room.side_of(sender) {
            // Group members other than the owner all share side B, so the
            // counter lands on side A; for 1:1 it is exactly the other user.
            Some(side) => side.other(),
            None => {
                tracing::warn!(room_id = %room.id, %sender, "Sender is not a room participant, counting toward side B");
                crate::domain::room::RoomSide::B
            }
        };
        let preview = truncate_preview(preview, PREVIEW_MAX_CHARS);
        self.store.apply_message_to_room(&room.id, unread_side, &preview, sender, at).await
    }

    /// Marks the room read for `username`: flips seen/delivered on unseen
    /// messages addressed to them, then zeroes their own side's unread
    /// counter — never the other side's.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the room does not exist.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_read(&self, room_id: &str, username: &str) -> Result<()> {
        let room = self.store.room(room_id).await?.ok_or(AppError::NotFound)?;
        self.store.mark_read(room_id, username).await?;
        if let Some(side) = room.side_of(username) {
            self.store.reset_unread(room_id, side, OffsetDateTime::now_utc()).await?;
        }
        Ok(())
    }

    /// Lists the user's rooms, most recent activity first, projected onto
    /// the side the user occupies. The store query is only a coarse
    /// prefilter; the exact membership check here is what keeps "al" out of
    /// "ally"'s rooms.
    ///
    /// # Errors
    /// Returns `AppError::Database` on store failure.
    pub async fn rooms_for_user(&self, username: &str) -> Result<Vec<RoomSummary>> {
        let rooms = self.store.rooms_for_user_prefilter(username).await?;
        Ok(rooms.iter().filter_map(|room| room.summarize_for(username)).collect())
    }

    /// Explicit create-or-check. Idempotent: an existing room comes back
    /// with `created = false` and is left untouched.
    ///
    /// # Errors
    /// Returns `AppError::Validation` on missing required fields.
    #[tracing::instrument(err(level = "warn"), skip(self, request), fields(room_id = %request.room_id, is_group = request.is_group))]
    pub async fn create_room(&self, request: CreateRoom) -> Result<(Room, bool)> {
        if request.room_id.is_empty() || request.participant_a.is_empty() || request.participant_b.is_empty() {
            return Err(AppError::Validation("roomId, participant1 and participant2 are required".into()));
        }

        if let Some(existing) = self.store.room(&request.room_id).await? {
            return Ok((existing, false));
        }

        let room = if request.is_group {
            let creator = request.created_by.as_deref().unwrap_or(&request.participant_a);
            Room::group(
                request.room_id,
                creator,
                &request.participant_b,
                request.group_name,
                request.group_icon,
                request.member_count.unwrap_or(2),
            )
        } else {
            Room::direct(request.room_id, &request.participant_a, &request.participant_b)
        };
        self.store.insert_room(&room).await?;
        Ok((room, true))
    }

    /// Partial update of group metadata; 1:1 rooms are not updatable here.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` when the room is absent or not a group.
    #[tracing::instrument(err(level = "warn"), skip(self, update))]
    pub async fn update_group(&self, group_id: &str, update: UpdateGroup) -> Result<Room> {
        self.store
            .update_group(
                group_id,
                update.group_name.as_deref(),
                update.participants.as_deref(),
                update.member_count,
                OffsetDateTime::now_utc(),
            )
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Total unread across every room the user belongs to, summing the
    /// counter of whichever side they occupy per room.
    ///
    /// # Errors
    /// Returns `AppError::Database` on store failure.
    pub async fn unread_total(&self, username: &str) -> Result<i64> {
        let rooms = self.store.rooms_for_user_prefilter(username).await?;
        Ok(rooms
            .iter()
            .filter_map(|room| room.side_of(username).map(|side| i64::from(room.unread(side))))
            .sum())
    }
}
