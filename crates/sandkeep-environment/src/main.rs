// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandkeep Environment - Fleet Server
//!
//! Keeps the configured tenants' sandboxes wakeable and replicates awake
//! tenants to the durable store on an interval.

use tracing::{info, warn};

use sandkeep_environment::config::Config;
use sandkeep_environment::runtime::FleetRuntimeBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandkeep_environment=info,sandkeep_core=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        data_dir = %config.data_dir.display(),
        durable_root = ?config.durable_root,
        service_command = %config.service_command,
        tenants = config.tenants.len(),
        "Starting Sandkeep Environment"
    );

    let runtime = FleetRuntimeBuilder::from_config(&config)
        .build()?
        .start()
        .await?;

    info!("Sandkeep Environment ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Sandkeep Environment shut down");

    Ok(())
}
