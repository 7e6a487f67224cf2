use crate::api::AppState;
use crate::domain::message::Message;
use crate::domain::room::{Room, RoomSummary};
use crate::error::Result;
use crate::services::room::{CreateRoom, UpdateGroup};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_id: String,
    pub participant1: String,
    /// For groups this carries the comma-delimited member list.
    pub participant2: String,
    #[serde(default)]
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_icon: Option<String>,
    pub member_count: Option<i32>,
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room: Room,
    pub created: bool,
}

/// Create-or-check a room, 1:1 or group. Idempotent.
pub async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>> {
    let (room, created) = state
        .room_service
        .create_room(CreateRoom {
            room_id: request.room_id,
            participant_a: request.participant1,
            participant_b: request.participant2,
            is_group: request.is_group,
            group_name: request.group_name,
            group_icon: request.group_icon,
            member_count: request.member_count,
            created_by: request.created_by,
        })
        .await?;
    Ok(Json(CreateRoomResponse { room, created }))
}

/// The user's rooms, most recent first, projected onto their side.
pub async fn get_rooms(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<RoomSummary>>> {
    Ok(Json(state.room_service.rooms_for_user(&username).await?))
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Marks the room read for the user and zeroes their side's unread counter.
pub async fn mark_read(
    State(state): State<AppState>,
    Path((room_id, username)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>> {
    state.room_service.mark_read(&room_id, &username).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    pub group_id: String,
    pub group_name: Option<String>,
    pub participants: Option<String>,
    pub member_count: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct UpdateGroupResponse {
    pub success: bool,
    pub group: Room,
}

pub async fn update_group(
    State(state): State<AppState>,
    Json(request): Json<UpdateGroupRequest>,
) -> Result<Json<UpdateGroupResponse>> {
    let group = state
        .room_service
        .update_group(
            &request.group_id,
            UpdateGroup {
                group_name: request.group_name,
                participants: request.participants,
                member_count: request.member_count,
            },
        )
        .await?;
    Ok(Json(UpdateGroupResponse { success: true, group }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub username: Option<String>,
}

/// Room history, filtered for the requesting viewer when one is named.
pub async fn get_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>> {
    Ok(Json(state.message_service.history(&room_id, params.username.as_deref()).await?))
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub count: i64,
}

/// Total unread across all of the user's rooms.
pub async fn get_unread_total(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UnreadResponse>> {
    Ok(Json(UnreadResponse { count: state.room_service.unread_total(&username).await? }))
}
