// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for iaas-server.
//!
//! [`IaasRuntime`] wires the HTTP server, the runtime-event subscription,
//! and the reconciliation loop into an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use iaas_core::store::PostgresStore;
//! use iaas_runtime::DockerRuntime;
//! use iaas_server::runtime::IaasRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let runtime = IaasRuntime::builder()
//!         .store(Arc::new(PostgresStore::new(pool)))
//!         .container_runtime(Arc::new(DockerRuntime::from_env()?))
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use iaas_core::cache::ClusterCache;
use iaas_core::events::{EventBus, MemoryEventBus};
use iaas_core::store::MetadataStore;
use iaas_runtime::ContainerRuntime;

use crate::api::{self, AppState};
use crate::broadcast::StatusBroadcaster;
use crate::reconciler::Reconciler;
use crate::services::{ClusterTimings, ServiceDeps};

/// Builder for creating an [`IaasRuntime`].
pub struct IaasRuntimeBuilder {
    store: Option<Arc<dyn MetadataStore>>,
    container_runtime: Option<Arc<dyn ContainerRuntime>>,
    events: Option<Arc<dyn EventBus>>,
    cache: Arc<ClusterCache>,
    bind_addr: SocketAddr,
    event_channel_capacity: usize,
    timings: ClusterTimings,
}

impl Default for IaasRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            container_runtime: None,
            events: None,
            cache: Arc::new(ClusterCache::new()),
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            event_channel_capacity: 256,
            timings: ClusterTimings::default(),
        }
    }
}

impl IaasRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata store (required).
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the container runtime (required).
    pub fn container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.container_runtime = Some(runtime);
        self
    }

    /// Set the lifecycle event bus.
    ///
    /// Default: an in-process [`MemoryEventBus`].
    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the HTTP bind address.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the runtime event channel capacity.
    ///
    /// Default: 256. A full channel blocks the event producer.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set the cluster stage timings.
    ///
    /// Default: the production waits.
    pub fn timings(mut self, timings: ClusterTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<IaasRuntimeConfig> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let container_runtime = self
            .container_runtime
            .ok_or_else(|| anyhow::anyhow!("container runtime is required"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(MemoryEventBus::default()));

        Ok(IaasRuntimeConfig {
            store,
            container_runtime,
            events,
            cache: self.cache,
            bind_addr: self.bind_addr,
            event_channel_capacity: self.event_channel_capacity,
            timings: self.timings,
        })
    }
}

/// Configuration for an [`IaasRuntime`].
pub struct IaasRuntimeConfig {
    store: Arc<dyn MetadataStore>,
    container_runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventBus>,
    cache: Arc<ClusterCache>,
    bind_addr: SocketAddr,
    event_channel_capacity: usize,
    timings: ClusterTimings,
}

impl std::fmt::Debug for IaasRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IaasRuntimeConfig")
            .field("bind_addr", &self.bind_addr)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl IaasRuntimeConfig {
    /// Start the runtime: HTTP server, event subscription, reconciler.
    pub async fn start(self) -> Result<IaasRuntime> {
        let deps = ServiceDeps {
            store: self.store.clone(),
            runtime: self.container_runtime.clone(),
            cache: self.cache.clone(),
            events: self.events.clone(),
        };

        let broadcaster = StatusBroadcaster::default();
        let state = AppState::new(deps, self.timings, broadcaster.clone());

        let shutdown = CancellationToken::new();

        // Runtime event stream feeds the reconciliation loop through a
        // bounded channel; backpressure reaches the producer.
        let events_rx = self
            .container_runtime
            .subscribe_events(self.event_channel_capacity)
            .await
            .map_err(|e| anyhow::anyhow!("failed to subscribe to runtime events: {e}"))?;

        let reconciler = Reconciler::new(
            self.store.clone(),
            self.cache.clone(),
            self.events.clone(),
            Some(broadcaster),
        );
        let reconciler_shutdown = shutdown.clone();
        let reconciler_handle = tokio::spawn(async move {
            reconciler.run(events_rx, reconciler_shutdown).await;
        });

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;
        let router = api::router(state.clone());
        let server_shutdown = shutdown.clone();
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        });

        info!(bind_addr = %bind_addr, "IaasRuntime started");

        Ok(IaasRuntime {
            state,
            shutdown,
            reconciler_handle,
            server_handle,
            bind_addr,
        })
    }
}

/// A running iaas-server instance that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct IaasRuntime {
    state: Arc<AppState>,
    shutdown: CancellationToken,
    reconciler_handle: JoinHandle<()>,
    server_handle: JoinHandle<std::io::Result<()>>,
    bind_addr: SocketAddr,
}

impl IaasRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> IaasRuntimeBuilder {
        IaasRuntimeBuilder::new()
    }

    /// The bound HTTP address.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// A reference to the shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.reconciler_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("IaasRuntime shutting down...");
        self.shutdown.cancel();

        if let Err(e) = self.reconciler_handle.await {
            error!("reconciliation loop task panicked: {e}");
        }
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("IaasRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("HTTP server error during shutdown: {e}");
                Err(e.into())
            }
            Err(e) => {
                error!("HTTP server task panicked: {e}");
                Err(anyhow::anyhow!("server task panicked: {e}"))
            }
        }
    }
}
