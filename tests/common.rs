// Shared by every integration binary; each one uses a different subset.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parley_server::api::{AppState, MgmtState};
use parley_server::config::{Config, LogFormat, ServerConfig, TelemetryConfig, WsConfig};
use parley_server::services::dispatcher::Dispatcher;
use parley_server::services::gateway::GatewayService;
use parley_server::services::message::MessageService;
use parley_server::services::presence::PresenceRegistry;
use parley_server::services::room::RoomService;
use parley_server::services::typing::TypingTracker;
use parley_server::storage::{ChatStore, MemoryStore};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("parley_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub fn test_config() -> Config {
    Config {
        database_url: "unused-by-memory-store".to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            mgmt_port: 0,
            shutdown_timeout_secs: 5,
        },
        websocket: WsConfig { outbound_buffer_size: 64 },
        telemetry: TelemetryConfig { otlp_endpoint: None, log_format: LogFormat::Text },
    }
}

/// A full in-process server over the in-memory store: real router, real
/// sockets, no external infrastructure.
pub struct TestApp {
    pub addr: SocketAddr,
    pub mgmt_addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn ChatStore> = Arc::<MemoryStore>::clone(&store) as Arc<dyn ChatStore>;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&store_dyn)));
        let typing = Arc::new(TypingTracker::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&presence), config.websocket.outbound_buffer_size));
        let room_service = RoomService::new(Arc::clone(&store_dyn));
        let message_service =
            MessageService::new(Arc::clone(&store_dyn), room_service.clone(), Arc::clone(&dispatcher));
        let gateway_service = GatewayService::new(
            Arc::clone(&presence),
            typing,
            Arc::clone(&dispatcher),
            message_service.clone(),
        );

        let app_router = parley_server::api::app_router(AppState {
            config,
            presence,
            room_service,
            message_service,
            gateway_service,
            shutdown_rx: shutdown_rx.clone(),
        });
        let mgmt_app = parley_server::api::mgmt_router(MgmtState { store: store_dyn });

        let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind api");
        let mgmt_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mgmt");
        let addr = api_listener.local_addr().expect("api addr");
        let mgmt_addr = mgmt_listener.local_addr().expect("mgmt addr");

        let mut api_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = api_rx.wait_for(|&stop| stop).await;
                })
                .await
                .expect("api server");
        });
        let mut mgmt_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = mgmt_rx.wait_for(|&stop| stop).await;
                })
                .await
                .expect("mgmt server");
        });

        Self { addr, mgmt_addr, store, client: reqwest::Client::new(), shutdown_tx }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/v1{}", self.addr, path)
    }

    pub fn mgmt_url(&self, path: &str) -> String {
        format!("http://{}{}", self.mgmt_addr, path)
    }

    /// Opens a gateway socket and, when a username is given, joins as that
    /// user and drains the resulting `user_online` broadcast.
    pub async fn connect_ws(&self, username: Option<&str>) -> TestWs {
        let url = format!("ws://{}/v1/gateway", self.addr);
        let (stream, _) = connect_async(&url).await.expect("ws connect");
        let mut ws = TestWs { stream };
        if let Some(username) = username {
            ws.send_event(&serde_json::json!({
                "event": "join",
                "data": { "username": username }
            }))
            .await;
            let online = ws.expect_event("user_online").await;
            assert_eq!(online["data"]["username"], username);
        }
        ws
    }
}

pub struct TestWs {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWs {
    pub async fn send_event(&mut self, event: &Value) {
        self.stream
            .send(WsMessage::text(event.to_string()))
            .await
            .expect("ws send");
    }

    /// Joins a room channel and waits until the server has processed the
    /// frame. Frames on one connection are handled in order, so re-joining
    /// presence afterwards and reading back our own `user_online` echo
    /// proves the membership is registered; without that, a broadcast sent
    /// from another connection can outrun the join.
    pub async fn join_room(&mut self, room_id: &str, username: &str) {
        self.send_event(&serde_json::json!({
            "event": "join_room",
            "data": { "roomId": room_id }
        }))
        .await;
        self.send_event(&serde_json::json!({
            "event": "join",
            "data": { "username": username }
        }))
        .await;
        loop {
            let online = self.expect_event("user_online").await;
            if online["data"]["username"] == username {
                return;
            }
        }
    }

    /// Next decoded event within the timeout, or `None`.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(timeout, self.stream.next()).await.ok()??;
            match frame.ok()? {
                WsMessage::Text(text) => {
                    return Some(serde_json::from_str(&text).expect("valid event json"));
                }
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Reads until an event with the given name arrives; panics if it does
    /// not show up in time.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(remaining).await {
                Some(event) if event["event"] == name => return event,
                Some(_) => {}
                None => panic!("did not receive `{name}` event in time"),
            }
        }
    }

    /// Asserts that no event with the given name arrives within the window.
    pub async fn expect_silence(&mut self, name: &str, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            if let Some(event) = self.next_event(remaining).await {
                assert_ne!(event["event"], name, "unexpected `{name}` event: {event}");
            } else {
                return;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
