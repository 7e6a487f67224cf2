use crate::api::AppState;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::Extensions,
    response::IntoResponse,
};
use tower_http::request_id::RequestId;

/// Upgrades to the gateway WebSocket. The client identifies itself with a
/// `join` event after connecting; there is no handshake credential.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    extensions: Extensions,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let request_id = extensions
        .get::<RequestId>()
        .map(|id| id.header_value().to_str().unwrap_or_default().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let shutdown_rx = state.shutdown_rx.clone();
    ws.on_upgrade(move |socket| async move {
        state.gateway_service.handle_socket(socket, request_id, shutdown_rx).await;
    })
}
