//! Admin HTTP endpoints.
//!
//! - `GET /health`: liveness, active sessions and registry statistics
//! - `POST /notifications`: feed an instance change into the registry

use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use discovery_core::{InterestRegistry, RegistryStats};
use discovery_protocol::InterestSetNotification;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::server::ServerHandle;

/// Shared admin state.
#[derive(Clone)]
pub struct AdminState {
    /// Registry notifications are published into.
    pub registry: InterestRegistry,
    /// Handle to the running discovery server.
    pub server: ServerHandle,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
    pub registry: RegistryStats,
}

/// Body of `POST /notifications`.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Number of sessions the notification was delivered to.
    pub delivered: usize,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/notifications", post(publish_handler))
        .with_state(state)
}

/// Bind the admin listener.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind admin listener on {addr}"))
}

/// Serve the admin endpoints on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Admin endpoints listening on {}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Admin server failed")
}

/// Health check handler.
async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.server.active_sessions(),
        registry: state.registry.stats(),
    })
}

/// Publish handler.
async fn publish_handler(
    State(state): State<AdminState>,
    Json(notification): Json<InterestSetNotification>,
) -> Json<PublishResponse> {
    let delivered = state.registry.publish(&notification);
    debug!(
        instance = %notification.instance().id,
        delivered,
        "Published notification"
    );
    Json(PublishResponse { delivered })
}
