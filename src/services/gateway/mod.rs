pub(crate) mod session;

use crate::services::dispatcher::Dispatcher;
use crate::services::gateway::session::Session;
use crate::services::message::MessageService;
use crate::services::presence::PresenceRegistry;
use crate::services::typing::TypingTracker;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_sessions: UpDownCounter<i64>,
    pub(crate) undecodable_frames_total: Counter<u64>,
    pub(crate) events_handled_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            active_sessions: meter
                .i64_up_down_counter("parley_gateway_sessions")
                .with_description("Number of active WebSocket sessions")
                .build(),
            undecodable_frames_total: meter
                .u64_counter("parley_gateway_undecodable_frames_total")
                .with_description("Inbound frames that failed to decode into a client event")
                .build(),
            events_handled_total: meter
                .u64_counter("parley_gateway_events_total")
                .with_description("Client events dispatched by the gateway")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the per-connection session lifecycle: assigns a connection id,
/// registers the outbound queue, runs the event loop and tears everything
/// down on disconnect.
#[derive(Clone, Debug)]
pub struct GatewayService {
    presence: Arc<PresenceRegistry>,
    typing: Arc<TypingTracker>,
    dispatcher: Arc<Dispatcher>,
    messages: MessageService,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        typing: Arc<TypingTracker>,
        dispatcher: Arc<Dispatcher>,
        messages: MessageService,
    ) -> Self {
        Self { presence, typing, dispatcher, messages, metrics: Metrics::new() }
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let conn_id = Uuid::new_v4();
        let outbound_rx = self.dispatcher.register(conn_id);

        let session = Session {
            conn_id,
            request_id,
            socket,
            outbound_rx,
            presence: Arc::clone(&self.presence),
            typing: Arc::clone(&self.typing),
            dispatcher: Arc::clone(&self.dispatcher),
            messages: self.messages.clone(),
            metrics: self.metrics.clone(),
            shutdown_rx,
        };

        session.run().await;
    }
}
