use crate::domain::event::{ForwardTarget, ServerEvent};
use crate::domain::message::{DeleteScope, Message, MessageKind};
use crate::domain::room::truncate_preview;
use crate::error::{AppError, Result};
use crate::services::dispatcher::Dispatcher;
use crate::services::room::RoomService;
use crate::storage::ChatStore;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Length cap for the preview carried on the `room_updated` wire event. The
/// stored preview keeps the longer cap from the room module.
const EVENT_PREVIEW_CHARS: usize = 50;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    seen_batch_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sent_total: meter
                .u64_counter("parley_messages_sent_total")
                .with_description("Total messages accepted for delivery")
                .build(),
            seen_batch_size: meter
                .u64_histogram("parley_seen_batch_size")
                .with_description("Number of messages flipped per seen acknowledgment")
                .build(),
        }
    }
}

/// Text-message send request.
#[derive(Debug, Clone)]
pub struct SendText {
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub reply_to: Option<Uuid>,
}

/// File-message send request. The file itself is already uploaded; only the
/// reference travels through the relay.
#[derive(Debug, Clone)]
pub struct SendFile {
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub kind: MessageKind,
    pub file_url: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

/// Validates, persists and state-transitions individual messages, and emits
/// the corresponding fan-out events. The delivery-state machine is
/// monotonic: sent → delivered → seen, with deletion and forwarding as side
/// transitions.
#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    rooms: RoomService,
    dispatcher: Arc<Dispatcher>,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, rooms: RoomService, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, rooms, dispatcher, metrics: Metrics::new() }
    }

    /// Sends a text message: ensures the room, persists the row undelivered
    /// and unseen, updates the room aggregate, broadcasts the full row to
    /// the room and a lightweight `room_updated` summary to everyone.
    ///
    /// # Errors
    /// Returns `AppError::Validation` on missing fields, before any
    /// persistence side effect.
    #[tracing::instrument(err(level = "warn"), skip(self, request), fields(room_id = %request.room_id, sender = %request.sender))]
    pub async fn send_text(&self, request: SendText) -> Result<Message> {
        if request.room_id.is_empty() || request.sender.is_empty() || request.receiver.is_empty() || request.body.is_empty()
        {
            return Err(AppError::Validation("roomId, sender, receiver and message are required".into()));
        }
        let message = Message::text(request.room_id, request.sender, request.receiver, request.body, request.reply_to);
        self.persist_and_fan_out(message).await
    }

    /// Sends a file message; the preview text is derived from the kind.
    ///
    /// # Errors
    /// Returns `AppError::Validation` on missing fields.
    #[tracing::instrument(err(level = "warn"), skip(self, request), fields(room_id = %request.room_id, sender = %request.sender))]
    pub async fn send_file(&self, request: SendFile) -> Result<Message> {
        if request.room_id.is_empty() || request.sender.is_empty() || request.receiver.is_empty() || request.file_url.is_empty()
        {
            return Err(AppError::Validation("roomId, sender, receiver and fileUrl are required".into()));
        }
        let message = Message::file(
            request.room_id,
            request.sender,
            request.receiver,
            request.kind,
            request.file_url,
            request.file_name,
            request.file_size,
        );
        self.persist_and_fan_out(message).await
    }

    async fn persist_and_fan_out(&self, message: Message) -> Result<Message> {
        let room = self.rooms.ensure_room(&message.room_id, &message.sender, &message.receiver).await?;

        match self.store.insert_message(&message).await {
            Ok(()) => self.metrics.sent_total.add(1, &[KeyValue::new("status", "success")]),
            Err(e) => {
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "failure")]);
                return Err(e);
            }
        }

        let preview = message.preview_text().to_owned();
        self.rooms.record_message(&room, &preview, &message.sender, message.created_at).await?;

        self.dispatcher.broadcast_room(&message.room_id, &ServerEvent::ReceiveMessage(message.clone()));
        self.dispatcher.broadcast_all(&ServerEvent::RoomUpdated {
            room_id: message.room_id.clone(),
            last_message: truncate_preview(&preview, EVENT_PREVIEW_CHARS),
            sender: message.sender.clone(),
            timestamp: message.created_at,
        });

        tracing::debug!(message_id = %message.id, "Message stored and fanned out");
        Ok(message)
    }

    /// Delivery acknowledgment. Idempotent: re-acknowledging an
    /// already-delivered message changes nothing and emits nothing; the
    /// room broadcast fires only on the fresh flip.
    ///
    /// # Errors
    /// Returns `AppError::Validation` on a blank room id and
    /// `AppError::Database` on store failure.
    pub async fn ack_delivered(&self, room_id: &str, message_id: Uuid) -> Result<bool> {
        if room_id.is_empty() {
            return Err(AppError::Validation("roomId is required".into()));
        }
        let flipped = self.store.mark_delivered(message_id).await?;
        if flipped {
            self.dispatcher.broadcast_room(room_id, &ServerEvent::MessageDelivered { message_id });
        }
        Ok(flipped)
    }

    /// Bulk seen acknowledgment for `viewer` in a room, optionally narrowed
    /// to an explicit id list. Never touches the viewer's own sent
    /// messages. Seen implies delivered; nothing is broadcast when no row
    /// changed.
    ///
    /// # Errors
    /// Returns `AppError::Validation` when the room id or viewer is blank; a
    /// blank viewer would otherwise match every unseen row in the room,
    /// senders' own included.
    #[tracing::instrument(err(level = "warn"), skip(self, message_ids))]
    pub async fn ack_seen(&self, room_id: &str, viewer: &str, message_ids: Option<&[Uuid]>) -> Result<Vec<Uuid>> {
        if room_id.is_empty() || viewer.is_empty() {
            return Err(AppError::Validation("roomId and viewer are required".into()));
        }
        let affected = self.store.mark_seen(room_id, viewer, message_ids).await?;
        self.metrics.seen_batch_size.record(affected.len() as u64, &[]);
        if !affected.is_empty() {
            self.dispatcher.broadcast_room(room_id, &ServerEvent::MessageSeen { message_ids: affected.clone() });
        }
        Ok(affected)
    }

    /// Deletes a message. "Everyone" is sender-only and terminal, broadcast
    /// to the whole room; "me" records an idempotent per-viewer marker and
    /// echoes only to the requester, since no other viewer's view changes.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` when the message is absent and
    /// `AppError::Forbidden` when a non-sender asks for "everyone".
    #[tracing::instrument(err(level = "warn"), skip(self), fields(message_id = %message_id, delete_for = %scope.as_str()))]
    pub async fn delete(&self, message_id: Uuid, requester: &str, scope: DeleteScope) -> Result<()> {
        if requester.is_empty() {
            return Err(AppError::Validation("username is required".into()));
        }
        let message = self.store.message(message_id).await?.ok_or(AppError::NotFound)?;

        match scope {
            DeleteScope::Everyone => {
                if message.sender != requester {
                    return Err(AppError::Forbidden(
                        "You can only delete your own messages for everyone".into(),
                    ));
                }
                self.store.mark_deleted_for_everyone(message_id, OffsetDateTime::now_utc()).await?;
                self.dispatcher.broadcast_room(
                    &message.room_id,
                    &ServerEvent::MessageDeleted { message_id, delete_for: DeleteScope::Everyone },
                );
            }
            DeleteScope::Me => {
                self.store.insert_deletion_marker(message_id, requester, OffsetDateTime::now_utc()).await?;
                self.dispatcher.send_to_user(
                    requester,
                    &ServerEvent::MessageDeleted { message_id, delete_for: DeleteScope::Me },
                );
            }
        }
        Ok(())
    }

    /// Forwards messages: one new row per (destination room × source
    /// message), stamped forwarded with delivery state reset, inserted as a
    /// single bulk write, then broadcast per destination. If the bulk
    /// insert fails nothing is broadcast; rooms auto-created beforehand stay,
    /// which is harmless since creation is idempotent.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` when none of the source ids resolve.
    #[tracing::instrument(err(level = "warn"), skip(self, message_ids, targets), fields(sources = message_ids.len(), destinations = targets.len()))]
    pub async fn forward(&self, message_ids: &[Uuid], targets: &[ForwardTarget], sender: &str) -> Result<Vec<Message>> {
        if message_ids.is_empty() || targets.is_empty() || sender.is_empty() {
            return Err(AppError::Validation("messageIds, toRooms and sender are required".into()));
        }

        let originals = self.store.messages_by_ids(message_ids).await?;
        if originals.is_empty() {
            return Err(AppError::NotFound);
        }

        let mut rooms = Vec::with_capacity(targets.len());
        for target in targets {
            rooms.push(self.rooms.ensure_room(&target.room_id, sender, &target.receiver).await?);
        }

        let mut copies = Vec::with_capacity(targets.len() * originals.len());
        for target in targets {
            for original in &originals {
                copies.push(original.forward_to(target.room_id.clone(), sender.to_owned(), target.receiver.clone()));
            }
        }
        self.store.insert_messages(&copies).await?;

        for copy in &copies {
            self.dispatcher.broadcast_room(&copy.room_id, &ServerEvent::ReceiveMessage(copy.clone()));
        }
        for (target, room) in targets.iter().zip(&rooms) {
            // Aggregate per destination reflects the last copy landing there.
            if let Some(last) = copies.iter().rev().find(|copy| copy.room_id == target.room_id) {
                let preview = last.preview_text().to_owned();
                self.rooms.record_message(room, &preview, sender, last.created_at).await?;
                self.dispatcher.broadcast_all(&ServerEvent::RoomUpdated {
                    room_id: target.room_id.clone(),
                    last_message: truncate_preview(&preview, EVENT_PREVIEW_CHARS),
                    sender: sender.to_owned(),
                    timestamp: last.created_at,
                });
            }
        }

        tracing::info!(count = copies.len(), "Messages forwarded");
        Ok(copies)
    }

    /// Room history ascending by time. With a viewer, rows deleted for
    /// everyone and rows the viewer personally hid are filtered out; without
    /// one, only the former.
    ///
    /// # Errors
    /// Returns `AppError::Database` on store failure.
    pub async fn history(&self, room_id: &str, viewer: Option<&str>) -> Result<Vec<Message>> {
        let messages = self.store.messages_for_room(room_id).await?;
        let hidden: HashSet<Uuid> = match viewer {
            Some(viewer) => self.store.deletion_markers_for(viewer).await?.into_iter().collect(),
            None => HashSet::new(),
        };
        Ok(messages
            .into_iter()
            .filter(|message| !message.hidden_for_everyone() && !hidden.contains(&message.id))
            .collect())
    }

    /// Raw lookup by id; deletion flags are returned as stored, not hidden.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` when the message does not exist.
    pub async fn get(&self, message_id: Uuid) -> Result<Message> {
        self.store.message(message_id).await?.ok_or(AppError::NotFound)
    }
}
