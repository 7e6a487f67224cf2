use crate::api::AppState;
use crate::domain::event::ForwardTarget;
use crate::domain::message::{DeleteScope, Message};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw message lookup; deletion flags come back as stored.
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>> {
    Ok(Json(state.message_service.get(message_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub username: String,
    /// Defaults to a personal delete when unspecified.
    pub delete_for: Option<DeleteScope>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageResponse {
    pub success: bool,
    pub delete_for: DeleteScope,
    pub message_id: Uuid,
}

/// Deletes a message, broadcasting like the socket path: whole-room for
/// "everyone", a direct echo for "me".
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(request): Json<DeleteMessageRequest>,
) -> Result<Json<DeleteMessageResponse>> {
    if request.username.is_empty() {
        return Err(crate::error::AppError::Validation("username is required".into()));
    }
    let scope = request.delete_for.unwrap_or(DeleteScope::Me);
    state.message_service.delete(message_id, &request.username, scope).await?;
    Ok(Json(DeleteMessageResponse { success: true, delete_for: scope, message_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub message_ids: Vec<Uuid>,
    pub to_rooms: Vec<ForwardTarget>,
    pub sender: String,
}

#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub count: usize,
}

/// Persisting forward path: copies each source message into each destination
/// room and broadcasts the new rows.
pub async fn forward_messages(
    State(state): State<AppState>,
    Json(request): Json<ForwardRequest>,
) -> Result<Json<ForwardResponse>> {
    let messages = state
        .message_service
        .forward(&request.message_ids, &request.to_rooms, &request.sender)
        .await?;
    let count = messages.len();
    Ok(Json(ForwardResponse { success: true, messages, count }))
}
