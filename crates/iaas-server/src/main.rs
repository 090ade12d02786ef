// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! iaas Server - Infrastructure Provisioning Service
//!
//! An HTTP server responsible for:
//! - PostgreSQL HA clusters (Patroni + etcd + HAProxy + pgBackRest)
//! - NGINX clusters with VRRP-style active-passive roles
//! - Single containers (postgres, nginx, generic)
//! - Stacks composing heterogeneous resources
//! - Status reconciliation from the container runtime's event stream

use std::sync::Arc;

use tracing::{info, warn};

use iaas_core::store::PostgresStore;
use iaas_runtime::{ContainerRuntime, DockerRuntime};
use iaas_server::config::Config;
use iaas_server::redis_bus::RedisEventBus;
use iaas_server::runtime::IaasRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iaas=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        docker_host = config.docker_host.as_deref().unwrap_or("local socket"),
        "Starting iaas server"
    );

    // Connect to the metadata database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.database_url)
        .await?;
    info!("Connected to database");

    iaas_core::migrations::run(&pool).await?;
    info!("Database schema verified");

    // Connect to the container runtime
    let runtime = Arc::new(DockerRuntime::connect(config.docker_host.as_deref())?);
    runtime.ping().await?;
    info!(runtime_type = runtime.runtime_type(), "Container runtime connected");

    let store = Arc::new(PostgresStore::new(pool));

    let mut builder = IaasRuntime::builder()
        .store(store)
        .container_runtime(runtime)
        .bind_addr(config.http_addr)
        .event_channel_capacity(config.event_channel_capacity);

    // Redis event bus when configured; in-process bus otherwise
    if let Some(redis_url) = &config.redis_url {
        let bus = RedisEventBus::connect(redis_url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to redis: {e}"))?;
        builder = builder.events(Arc::new(bus));
        info!("Lifecycle events publishing to Redis");
    } else {
        info!("No IAAS_REDIS_URL set; lifecycle events stay in-process");
    }

    let runtime = builder.build()?.start().await?;
    info!(addr = %runtime.bind_addr(), "iaas server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;
    info!("iaas server shut down");

    Ok(())
}
