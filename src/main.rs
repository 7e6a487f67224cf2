#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use parley_server::api::{AppState, MgmtState};
use parley_server::config::Config;
use parley_server::services::dispatcher::Dispatcher;
use parley_server::services::gateway::GatewayService;
use parley_server::services::message::MessageService;
use parley_server::services::presence::PresenceRegistry;
use parley_server::services::room::RoomService;
use parley_server::services::typing::TypingTracker;
use parley_server::storage::{ChatStore, PgStore};
use parley_server::{storage, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    let boot_span = tracing::info_span!("boot_server");
    let (api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx) = async {
        // Phase 1: infrastructure
        let pool = storage::init_pool(&config.database_url).await?;
        storage::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        parley_server::spawn_signal_handler(shutdown_tx.clone());

        // Phase 2: component wiring
        let store: Arc<dyn ChatStore> = Arc::new(PgStore::new(pool));
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&store)));
        let typing = Arc::new(TypingTracker::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&presence), config.websocket.outbound_buffer_size));
        let room_service = RoomService::new(Arc::clone(&store));
        let message_service =
            MessageService::new(Arc::clone(&store), room_service.clone(), Arc::clone(&dispatcher));
        let gateway_service = GatewayService::new(
            Arc::clone(&presence),
            typing,
            Arc::clone(&dispatcher),
            message_service.clone(),
        );

        // Phase 3: listeners and routers
        let app_router = parley_server::api::app_router(AppState {
            config: config.clone(),
            presence,
            room_service,
            message_service,
            gateway_service,
            shutdown_rx: shutdown_rx.clone(),
        });
        let mgmt_app = parley_server::api::mgmt_router(MgmtState { store });

        let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;

        tracing::info!(address = %api_addr, "listening");
        tracing::info!(address = %mgmt_addr, "management server listening");

        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<_, anyhow::Error>((api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: serve until the shutdown signal
    let mut api_rx = shutdown_rx.clone();
    let api_server = axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&stop| stop).await;
        });

    let mut mgmt_rx = shutdown_rx;
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = mgmt_rx.wait_for(|&stop| stop).await;
        });

    let serve_all = async { tokio::try_join!(api_server, mgmt_server) };
    tokio::pin!(serve_all);

    let mut signal_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = &mut serve_all => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
            }
        }
        _ = signal_rx.wait_for(|&stop| stop) => {
            // Give in-flight sessions a bounded window to drain.
            let drain = std::time::Duration::from_secs(config.server.shutdown_timeout_secs);
            match tokio::time::timeout(drain, &mut serve_all).await {
                Ok(Err(e)) => tracing::error!(error = %e, "Server error during shutdown"),
                Ok(Ok(_)) => tracing::info!("Connections drained."),
                Err(_) => tracing::warn!("Timeout waiting for connections to drain."),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    telemetry_guard.shutdown();
    Ok(())
}
