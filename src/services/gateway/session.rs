use crate::domain::event::{ClientEvent, ServerEvent};
use crate::services::dispatcher::Dispatcher;
use crate::services::gateway::Metrics;
use crate::services::message::{MessageService, SendFile, SendText};
use crate::services::presence::{ConnId, PresenceRegistry};
use crate::services::typing::TypingTracker;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) conn_id: ConnId,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) outbound_rx: mpsc::Receiver<ServerEvent>,
    pub(crate) presence: Arc<PresenceRegistry>,
    pub(crate) typing: Arc<TypingTracker>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) messages: MessageService,
    pub(crate) metrics: Metrics,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Session {
    #[tracing::instrument(
        name = "gateway_session",
        skip(self),
        fields(
            conn_id = %self.conn_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = %Uuid::new_v4()
        )
    )]
    pub(crate) async fn run(self) {
        let Self {
            conn_id,
            socket,
            mut outbound_rx,
            presence,
            typing,
            dispatcher,
            messages,
            metrics,
            mut shutdown_rx,
            ..
        } = self;

        metrics.active_sessions.add(1, &[]);
        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();

        loop {
            // Shutdown takes priority over in-flight traffic.
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                frame = ws_stream.next() => {
                    let continue_loop = match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ClientEvent>(&text) {
                                Ok(event) => {
                                    metrics.events_handled_total.add(1, &[]);
                                    handle_event(conn_id, event, &presence, &typing, &dispatcher, &messages).await;
                                }
                                Err(e) => {
                                    metrics.undecodable_frames_total.add(1, &[]);
                                    tracing::warn!(error = %e, "Dropping undecodable frame");
                                }
                            }
                            true
                        }
                        Some(Ok(WsMessage::Close(_)) | Err(_)) | None => false,
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::warn!("Received unexpected binary frame");
                            true
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => true,
                    };

                    if !continue_loop { break; }
                }

                event = outbound_rx.recv() => {
                    match event {
                        Some(event) => {
                            match serde_json::to_string(&event) {
                                Ok(text) => {
                                    if ws_sink.send(WsMessage::Text(text.into())).await.is_err() { break; }
                                }
                                Err(e) => tracing::error!(error = %e, "Failed to encode outbound event"),
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = ws_sink.close().await;

        // Teardown order matters: clear typing while the room channels still
        // know their members, then drop channel membership, then presence.
        if let Some(username) = presence.username_of(conn_id) {
            for room_id in typing.clear_user(&username) {
                dispatcher.broadcast_room_except(
                    &room_id,
                    conn_id,
                    &ServerEvent::StopTyping { room_id: room_id.clone(), sender: username.clone() },
                );
            }
        }
        dispatcher.unregister(conn_id);
        match presence.disconnect(conn_id).await {
            Ok(Some((username, last_seen))) => {
                dispatcher.broadcast_all(&ServerEvent::UserOffline { username, last_seen });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Failed to persist offline status"),
        }

        metrics.active_sessions.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

/// Dispatches one decoded client event. Store failures are logged and echoed
/// back to the originating connection only; they never end the session.
async fn handle_event(
    conn_id: ConnId,
    event: ClientEvent,
    presence: &Arc<PresenceRegistry>,
    typing: &Arc<TypingTracker>,
    dispatcher: &Arc<Dispatcher>,
    messages: &MessageService,
) {
    match event {
        ClientEvent::Join { username } => {
            if username.is_empty() {
                return;
            }
            match presence.join(&username, conn_id).await {
                Ok(_) => dispatcher.broadcast_all(&ServerEvent::UserOnline { username }),
                Err(e) => report(dispatcher, conn_id, &e, "join"),
            }
        }
        ClientEvent::JoinRoom { room_id } => dispatcher.join_room(&room_id, conn_id),
        ClientEvent::LeaveRoom { room_id } => dispatcher.leave_room(&room_id, conn_id),
        ClientEvent::SendMessage { room_id, sender, receiver, message, reply_to_id } => {
            let request = SendText { room_id, sender, receiver, body: message, reply_to: reply_to_id };
            if let Err(e) = messages.send_text(request).await {
                report(dispatcher, conn_id, &e, "send_message");
            }
        }
        ClientEvent::SendFile { room_id, sender, receiver, message_type, file_url, file_name, file_size } => {
            let request =
                SendFile { room_id, sender, receiver, kind: message_type, file_url, file_name, file_size };
            if let Err(e) = messages.send_file(request).await {
                report(dispatcher, conn_id, &e, "send_file");
            }
        }
        ClientEvent::Typing { room_id, sender } => {
            if room_id.is_empty() || sender.is_empty() {
                return;
            }
            typing.start(&room_id, &sender);
            let event = ServerEvent::Typing { room_id: room_id.clone(), sender };
            dispatcher.broadcast_room_except(&room_id, conn_id, &event);
        }
        ClientEvent::StopTyping { room_id, sender } => {
            if room_id.is_empty() || sender.is_empty() {
                return;
            }
            typing.stop(&room_id, &sender);
            let event = ServerEvent::StopTyping { room_id: room_id.clone(), sender };
            dispatcher.broadcast_room_except(&room_id, conn_id, &event);
        }
        ClientEvent::MessageSeen { room_id, viewer, message_ids } => {
            if let Err(e) = messages.ack_seen(&room_id, &viewer, message_ids.as_deref()).await {
                report(dispatcher, conn_id, &e, "message_seen");
            }
        }
        ClientEvent::MessageDelivered { room_id, message_id } => {
            if let Err(e) = messages.ack_delivered(&room_id, message_id).await {
                report(dispatcher, conn_id, &e, "message_delivered");
            }
        }
        ClientEvent::DeleteMessage { message_id, username, delete_for, .. } => {
            if let Err(e) = messages.delete(message_id, &username, delete_for).await {
                report(dispatcher, conn_id, &e, "delete_message");
            }
        }
        ClientEvent::ForwardMessage { messages: rows, to_rooms } => {
            // Relay only: the HTTP forward endpoint is the persisting path.
            for target in &to_rooms {
                for row in &rows {
                    dispatcher.broadcast_room(&target.room_id, &ServerEvent::ReceiveMessage(row.clone()));
                }
            }
        }
        ClientEvent::NewGroupCreated { group_id, group_name, members, creator } => {
            let event = ServerEvent::NewGroupCreated {
                group_id: group_id.clone(),
                group_name,
                creator,
                member_count: members.len(),
            };
            for member in &members {
                dispatcher.send_to_user(member, &event);
            }
            dispatcher.broadcast_room(&group_id, &event);
        }
        ClientEvent::MembersAdded { group_id, group_name, new_members, added_by } => {
            for member in &new_members {
                dispatcher.send_to_user(
                    member,
                    &ServerEvent::AddedToGroup {
                        group_id: group_id.clone(),
                        group_name: group_name.clone(),
                        added_by: added_by.clone(),
                    },
                );
            }
            dispatcher.broadcast_room(
                &group_id,
                &ServerEvent::GroupMembersAdded { group_id: group_id.clone(), group_name, new_members, added_by },
            );
        }
        ClientEvent::MemberRemoved { group_id, removed_user, group_name } => {
            dispatcher.send_to_user(
                &removed_user,
                &ServerEvent::RemovedFromGroup { group_id: group_id.clone(), group_name: group_name.clone() },
            );
            dispatcher.broadcast_room(
                &group_id,
                &ServerEvent::GroupMemberRemoved { group_id: group_id.clone(), removed_user, group_name },
            );
        }
        ClientEvent::MemberLeft { group_id, username, group_name } => {
            dispatcher.broadcast_room(
                &group_id,
                &ServerEvent::GroupMemberLeft { group_id: group_id.clone(), group_name, username },
            );
        }
        ClientEvent::GroupNameUpdated { group_id, new_name, updated_by } => {
            dispatcher.broadcast_room(
                &group_id,
                &ServerEvent::GroupNameUpdated { group_id: group_id.clone(), new_name, updated_by },
            );
        }
    }
}

fn report(dispatcher: &Arc<Dispatcher>, conn_id: ConnId, error: &crate::error::AppError, operation: &str) {
    tracing::error!(error = %error, operation, "Event handling failed");
    dispatcher.send_to_conn(conn_id, &ServerEvent::Error { message: error.to_string() });
}
