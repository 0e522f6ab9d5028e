//! # Palaver Server
//!
//! The deployable signaling server: loads configuration, wires the JWT
//! authenticator, the event bus (Redis when configured, in-process
//! otherwise) and the remote SFU adapter into a hub, and serves the
//! WebSocket edge until shutdown.

mod auth;
mod bus;
mod config;
mod sfu;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Json;
use palaver_core::{EventBus, Hub, LocalBus, SfuClient};

use crate::auth::JwtAuthenticator;
use crate::bus::RedisBus;
use crate::sfu::RemoteSfu;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::init()?;

    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palaver=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting Palaver v{}", env!("CARGO_PKG_VERSION"));

    let authenticator = Arc::new(JwtAuthenticator::new(
        &config.auth.jwt_secret,
        config.auth.origins(),
    ));

    let bus: Arc<dyn EventBus> = match &config.bus.redis_url {
        Some(url) => {
            let bus = RedisBus::connect(url).await?;
            tracing::info!("event bus: redis");
            Arc::new(bus)
        }
        None => {
            tracing::info!("event bus: in-process (single instance)");
            Arc::new(LocalBus::new())
        }
    };

    let sfu: Option<Arc<dyn SfuClient>> = match &config.sfu.base_url {
        Some(base_url) => {
            tracing::info!(%base_url, "sfu: remote session api");
            Some(Arc::new(RemoteSfu::new(base_url)))
        }
        None => {
            tracing::warn!("no sfu configured; running signaling-only");
            None
        }
    };

    let hub = Hub::new(config.rooms.to_room_config(), authenticator, Some(bus), sfu);

    let app = palaver_core::ws::build_router(hub.clone()).merge(
        axum::Router::new()
            .route("/healthz", get(healthz))
            .with_state(hub.clone()),
    );

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("signaling listening on ws://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, closing rooms");
    hub.shutdown().await;
    Ok(())
}

async fn healthz(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    let stats = hub.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "rooms": stats.rooms,
        "participants": stats.participants,
        "waiting": stats.waiting,
    }))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
