//! # Policy Gateway - Main Entry Point
//!
//! Startup sequence:
//!
//! 1. Load gateway settings (`GATEWAY_CONFIG_PATH`, or defaults plus `GATEWAY_*` overrides)
//! 2. Initialize logging and, when enabled, the Prometheus exporter
//! 3. Load and compile the policy file; any error here is fatal
//! 4. Open the ownership database pool
//! 5. Serve until SIGINT or SIGTERM, then drain in-flight requests

use anyhow::Context;
use policy_gateway::core::policies::PoliciesConfig;
use policy_gateway::enrichment::PgOwnershipStore;
use policy_gateway::observability::{init_logging, install_exporter};
use policy_gateway::{GatewayConfig, GatewayServer, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("GATEWAY_CONFIG_PATH").map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref())
        .await
        .context("Failed to load gateway configuration")?;

    init_logging(&config.observability.logging)?;

    info!("🚀 Starting Policy Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Gateway failed: {:#}", e);
        std::process::exit(1);
    }

    info!("✅ Policy Gateway shutdown complete");
    Ok(())
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    install_exporter(&config.observability.metrics)?;

    info!("📋 Loading policies from {}", config.policies_path.display());
    let policies = PoliciesConfig::load(&config.policies_path)
        .await
        .with_context(|| format!("Invalid policy file {}", config.policies_path.display()))?;
    info!(
        services = policies.services.len(),
        policies = policies.policies.len(),
        "✅ Policies loaded"
    );

    info!("🔗 Connecting ownership database...");
    let store = PgOwnershipStore::connect_lazy(&config.database)?;

    let state = ServerState::new(&config, &policies, Arc::new(store))?;
    let server = GatewayServer::new(&config, state)?;
    info!("🌐 Policy Gateway ready on {}", server.bind_addr());

    server.start(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
