use crate::domain::message::Message;
use crate::domain::room::{Room, RoomSide};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod memory;
pub mod pg;
pub mod records;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(20).connect(database_url).await
}

/// Runs the embedded schema migrations.
///
/// # Errors
/// Returns an error if a migration fails to apply.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// The durable store behind the relay. Production uses [`PgStore`]; the test
/// suite runs against [`MemoryStore`]. Services never see sqlx directly.
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    // -- users --

    /// Creates the user if absent and marks them online. `last_seen` is
    /// bumped here too; it doubles as "session started at".
    async fn upsert_user_online(&self, username: &str, at: OffsetDateTime) -> Result<()>;

    async fn mark_user_offline(&self, username: &str, last_seen: OffsetDateTime) -> Result<()>;

    // -- rooms --

    async fn room(&self, room_id: &str) -> Result<Option<Room>>;

    async fn insert_room(&self, room: &Room) -> Result<()>;

    /// Applies one sent message to the room aggregate in a single atomic
    /// write: increments the unread counter of `unread_side` and rewrites
    /// the last-message preview fields. Two racing sends to the same room
    /// both land; there is no lost increment.
    async fn apply_message_to_room(
        &self,
        room_id: &str,
        unread_side: RoomSide,
        preview: &str,
        sender: &str,
        at: OffsetDateTime,
    ) -> Result<()>;

    /// Resets one side's unread counter to zero.
    async fn reset_unread(&self, room_id: &str, side: RoomSide, at: OffsetDateTime) -> Result<()>;

    /// Coarse prefilter for room listing: rooms where the user is
    /// `participant_a` or appears as a substring of `participant_b`. May
    /// over-return ("al" matches "ally"); callers must re-filter with
    /// [`Room::is_member`] before use.
    async fn rooms_for_user_prefilter(&self, username: &str) -> Result<Vec<Room>>;

    /// Partial update of group metadata. Returns `None` when the room is
    /// absent or not a group.
    async fn update_group(
        &self,
        room_id: &str,
        name: Option<&str>,
        members: Option<&str>,
        member_count: Option<i32>,
        at: OffsetDateTime,
    ) -> Result<Option<Room>>;

    // -- messages --

    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Bulk insert; all rows or none.
    async fn insert_messages(&self, messages: &[Message]) -> Result<()>;

    async fn message(&self, id: Uuid) -> Result<Option<Message>>;

    async fn messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>>;

    /// All of a room's messages, ascending by creation time, unfiltered.
    async fn messages_for_room(&self, room_id: &str) -> Result<Vec<Message>>;

    /// Flips `is_delivered` on one message. Returns whether the flag freshly
    /// flipped; re-acknowledging an already-delivered message reports false.
    async fn mark_delivered(&self, id: Uuid) -> Result<bool>;

    /// Bulk seen-flip: `is_seen = true, is_delivered = true` on every
    /// not-yet-seen message in the room not sent by `viewer`, optionally
    /// narrowed to `ids`. Returns the affected message ids.
    async fn mark_seen(&self, room_id: &str, viewer: &str, ids: Option<&[Uuid]>) -> Result<Vec<Uuid>>;

    /// Mark-as-read path: flips seen/delivered on unseen messages addressed
    /// to `receiver` in the room.
    async fn mark_read(&self, room_id: &str, receiver: &str) -> Result<()>;

    /// Terminal deletion flag, visible to all viewers. One-way.
    async fn mark_deleted_for_everyone(&self, id: Uuid, at: OffsetDateTime) -> Result<()>;

    /// Records a personal hide for (message, viewer). Idempotent: a second
    /// insert for the same pair is a no-op, never a duplicate.
    async fn insert_deletion_marker(&self, message_id: Uuid, viewer: &str, at: OffsetDateTime) -> Result<()>;

    /// Message ids the viewer has personally hidden.
    async fn deletion_markers_for(&self, viewer: &str) -> Result<Vec<Uuid>>;

    // -- health --

    /// Cheap connectivity check for the readiness probe.
    async fn ping(&self) -> Result<()>;
}
