// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `wsgw serve`: run the control plane until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use gateway_core::application::context::GatewayContext;
use gateway_core::application::supervisor::{ChannelFrameSink, Supervisor};
use gateway_core::domain::gateway_config::{GatewayConfig, MetricsConfig};
use gateway_core::presentation::health;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = GatewayConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    install_metrics_exporter(&config.spec.observability.metrics)?;

    let listen_address = config.spec.server.listen_address.clone();
    let ctx = Arc::new(
        GatewayContext::from_config(config).context("Failed to build gateway context")?,
    );

    // Startup continues when the upstream is not ready yet; /readyz reports it.
    if ctx.services.is_ready().await {
        info!("Upstream is healthy and API-compatible");
    } else {
        let health = ctx.services.check_health().await;
        let version = ctx.services.check_version().await;
        warn!(
            status = ?health.status,
            version = version.version.as_deref().unwrap_or("unknown"),
            compatible = version.compatible,
            "Upstream not ready at startup"
        );
    }

    let sink = Arc::new(ChannelFrameSink::new(
        ctx.config.spec.websocket.queue_max_size,
    ));
    let supervisor = Supervisor::start(ctx.clone(), sink);

    let app = health::router(ctx.clone());
    let listener = TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_address))?;
    info!("Probe listener on {}", listen_address);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("Gateway shutting down");
    supervisor.shutdown().await;
    ctx.shutdown().await;

    served
}

fn install_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("Invalid metrics listen address {}", config.listen_address))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics on {}", addr);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
