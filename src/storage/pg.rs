use crate::domain::message::Message;
use crate::domain::room::{Room, RoomSide};
use crate::error::Result;
use crate::storage::records::{MessageRecord, RoomRecord};
use crate::storage::{ChatStore, DbPool};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Postgres-backed [`ChatStore`].
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn upsert_user_online(&self, username: &str, at: OffsetDateTime) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (username, is_online, last_seen)
            VALUES ($1, TRUE, $2)
            ON CONFLICT (username) DO UPDATE SET is_online = TRUE, last_seen = $2
            ",
        )
        .bind(username)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_user_offline(&self, username: &str, last_seen: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE users SET is_online = FALSE, last_seen = $2 WHERE username = $1")
            .bind(username)
            .bind(last_seen)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn room(&self, room_id: &str) -> Result<Option<Room>> {
        let record = sqlx::query_as::<_, RoomRecord>("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(Room::from))
    }

    async fn insert_room(&self, room: &Room) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO rooms (
                id, participant_a, participant_b, is_group, group_name, group_icon,
                member_count, created_by, last_message, last_message_at, last_sender,
                unread_a, unread_b, pinned_a, pinned_b, archived_a, archived_b,
                muted_a, muted_b, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&room.id)
        .bind(&room.participant_a)
        .bind(&room.participant_b)
        .bind(room.is_group)
        .bind(&room.group_name)
        .bind(&room.group_icon)
        .bind(room.member_count)
        .bind(&room.created_by)
        .bind(&room.last_message)
        .bind(room.last_message_at)
        .bind(&room.last_sender)
        .bind(room.unread_a)
        .bind(room.unread_b)
        .bind(room.pinned_a)
        .bind(room.pinned_b)
        .bind(room.archived_a)
        .bind(room.archived_b)
        .bind(room.muted_a)
        .bind(room.muted_b)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_message_to_room(
        &self,
        room_id: &str,
        unread_side: RoomSide,
        preview: &str,
        sender: &str,
        at: OffsetDateTime,
    ) -> Result<()> {
        // Single UPDATE so two racing sends both land their increment.
        sqlx::query(
            r"
            UPDATE rooms SET
                last_message = $2,
                last_message_at = $3,
                last_sender = $4,
                unread_a = unread_a + CASE WHEN $5 THEN 1 ELSE 0 END,
                unread_b = unread_b + CASE WHEN $5 THEN 0 ELSE 1 END,
                updated_at = $3
            WHERE id = $1
            ",
        )
        .bind(room_id)
        .bind(preview)
        .bind(at)
        .bind(sender)
        .bind(unread_side == RoomSide::A)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_unread(&self, room_id: &str, side: RoomSide, at: OffsetDateTime) -> Result<()> {
        let query = match side {
            RoomSide::A => "UPDATE rooms SET unread_a = 0, updated_at = $2 WHERE id = $1",
            RoomSide::B => "UPDATE rooms SET unread_b = 0, updated_at = $2 WHERE id = $1",
        };
        sqlx::query(query).bind(room_id).bind(at).execute(&self.pool).await?;
        Ok(())
    }

    async fn rooms_for_user_prefilter(&self, username: &str) -> Result<Vec<Room>> {
        // LIKE is only a coarse prefilter; the service re-checks exact
        // membership before projecting anything to the caller.
        let records = sqlx::query_as::<_, RoomRecord>(
            r"
            SELECT * FROM rooms
            WHERE participant_a = $1 OR participant_b LIKE '%' || $1 || '%'
            ORDER BY last_message_at DESC
            ",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Room::from).collect())
    }

    async fn update_group(
        &self,
        room_id: &str,
        name: Option<&str>,
        members: Option<&str>,
        member_count: Option<i32>,
        at: OffsetDateTime,
    ) -> Result<Option<Room>> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r"
            UPDATE rooms SET
                group_name = COALESCE($2, group_name),
                participant_b = COALESCE($3, participant_b),
                member_count = COALESCE($4, member_count),
                updated_at = $5
            WHERE id = $1 AND is_group
            RETURNING *
            ",
        )
        .bind(room_id)
        .bind(name)
        .bind(members)
        .bind(member_count)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Room::from))
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        insert_one(&self.pool, message).await
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for message in messages {
            insert_one(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn message(&self, id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(Message::from))
    }

    async fn messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn messages_for_room(&self, room_id: &str) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE room_id = $1 ORDER BY created_at ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET is_delivered = TRUE WHERE id = $1 AND NOT is_delivered")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_seen(&self, room_id: &str, viewer: &str, ids: Option<&[Uuid]>) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = if let Some(ids) = ids {
            sqlx::query_as(
                r"
                UPDATE messages SET is_seen = TRUE, is_delivered = TRUE
                WHERE room_id = $1 AND sender <> $2 AND NOT is_seen AND id = ANY($3)
                RETURNING id
                ",
            )
            .bind(room_id)
            .bind(viewer)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r"
                UPDATE messages SET is_seen = TRUE, is_delivered = TRUE
                WHERE room_id = $1 AND sender <> $2 AND NOT is_seen
                RETURNING id
                ",
            )
            .bind(room_id)
            .bind(viewer)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_read(&self, room_id: &str, receiver: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE messages SET is_seen = TRUE, is_delivered = TRUE
            WHERE room_id = $1 AND receiver = $2 AND NOT is_seen
            ",
        )
        .bind(room_id)
        .bind(receiver)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_deleted_for_everyone(&self, id: Uuid, at: OffsetDateTime) -> Result<()> {
        sqlx::query(
            r"
            UPDATE messages SET is_deleted = TRUE, deleted_for = 'everyone', deleted_at = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_deletion_marker(&self, message_id: Uuid, viewer: &str, at: OffsetDateTime) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO deleted_message_markers (message_id, viewer, deleted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, viewer) DO NOTHING
            ",
        )
        .bind(message_id)
        .bind(viewer)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deletion_markers_for(&self, viewer: &str) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT message_id FROM deleted_message_markers WHERE viewer = $1")
            .bind(viewer)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_one<'e, E>(executor: E, message: &Message) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO messages (
            id, room_id, sender, receiver, body, kind, file_url, file_name,
            file_size, reply_to, is_forwarded, forwarded_from, is_delivered,
            is_seen, is_deleted, deleted_for, deleted_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ",
    )
    .bind(message.id)
    .bind(&message.room_id)
    .bind(&message.sender)
    .bind(&message.receiver)
    .bind(&message.body)
    .bind(message.kind.as_str())
    .bind(&message.file_url)
    .bind(&message.file_name)
    .bind(message.file_size)
    .bind(message.reply_to)
    .bind(message.is_forwarded)
    .bind(&message.forwarded_from)
    .bind(message.is_delivered)
    .bind(message.is_seen)
    .bind(message.is_deleted)
    .bind(message.deleted_for.map(crate::domain::message::DeleteScope::as_str))
    .bind(message.deleted_at)
    .bind(message.created_at)
    .execute(executor)
    .await?;
    Ok(())
}
