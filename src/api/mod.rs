use crate::config::Config;
use crate::services::gateway::GatewayService;
use crate::services::message::MessageService;
use crate::services::presence::PresenceRegistry;
use crate::services::room::RoomService;
use crate::storage::ChatStore;
use axum::body::Body;
use axum::http::Request;
use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod chats;
pub mod gateway;
pub mod health;
pub mod messages;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub presence: Arc<PresenceRegistry>,
    pub room_service: RoomService,
    pub message_service: MessageService,
    pub gateway_service: GatewayService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub store: Arc<dyn ChatStore>,
}

/// Configures and returns the primary application router.
pub fn app_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/chats/create-room", post(chats::create_room))
        .route("/chats/rooms/{username}", get(chats::get_rooms))
        .route("/chats/mark-read/{roomId}/{username}", post(chats::mark_read))
        .route("/chats/update-group", put(chats::update_group))
        .route("/chats/history/{roomId}", get(chats::get_history))
        .route("/chats/unread/{username}", get(chats::get_unread_total))
        .route("/messages/forward", post(messages::forward_messages))
        .route("/messages/{messageId}", get(messages::get_message).delete(messages::delete_message))
        .route("/gateway", get(gateway::websocket_handler));

    Router::new()
        .nest("/v1", api_routes)
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
                let request_id = request
                    .extensions()
                    .get::<tower_http::request_id::RequestId>()
                    .map(|id| id.header_value().to_str().unwrap_or_default())
                    .unwrap_or_default()
                    .to_string();

                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
}

/// Router for the management port: liveness and readiness probes.
pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new()
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}
