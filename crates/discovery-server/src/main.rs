//! # Discovery Server
//!
//! Streams service-instance changes to clients over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! discovery
//!
//! # Run with environment variables
//! DISCOVERY_PORT=7002 DISCOVERY_HOST=0.0.0.0 discovery
//! ```

use anyhow::{Context, Result};
use discovery_core::{InterestRegistry, RegistryConfig};
use discovery_server::admin::{self, AdminState};
use discovery_server::{metrics, Config, DiscoveryServer};
use discovery_transport::{WebSocketBrokerServer, WebSocketConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discovery=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    info!("Starting discovery server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind the admin listener first so a port conflict fails startup
    let admin_listener = if config.admin.enabled {
        Some(admin::bind(config.admin_addr()?).await?)
    } else {
        None
    };

    let broker_server = WebSocketBrokerServer::new(WebSocketConfig {
        bind_addr: config.bind_addr()?,
        max_message_size: config.limits.max_message_size,
        handshake_timeout: Duration::from_millis(config.limits.handshake_timeout_ms),
    })
    .await
    .context("Failed to start WebSocket transport")?;

    let registry = InterestRegistry::with_config(RegistryConfig {
        max_interests_per_set: config.limits.max_interests_per_set,
    });

    let server = DiscoveryServer::start(Arc::new(broker_server), Arc::new(registry.clone()));

    let admin_task = admin_listener.map(|listener| {
        let state = AdminState {
            registry,
            server: server.handle(),
        };
        let handle = server.handle();
        tokio::spawn(async move {
            let stopped = handle.clone();
            let result =
                admin::serve(listener, state, async move { stopped.stopped().await }).await;
            if let Err(e) = result {
                error!(error = %e, "Admin server failed");
                handle.shutdown().await;
            }
        })
    });

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C");
        }
        () = server.stopped() => {}
    }

    server.shutdown().await;
    server.wait().await;

    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            error!(error = %e, "Admin task panicked");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
