// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API surface.
//!
//! Thin axum handlers over the provisioning services. Handlers parse,
//! call one service method, and serialise the result; nothing else
//! lives here.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::{delete, get, post, put};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use iaas_core::store::MetadataStore;
use iaas_runtime::ContainerRuntime;

use crate::broadcast::StatusBroadcaster;
use crate::services::{
    ClusterTimings, GenericContainerService, NginxClusterService, NginxSingleService,
    PostgresClusterService, PostgresSingleService, ServiceDeps, StackService,
};

/// Bearer principal extraction.
pub mod auth;

/// Service-error to HTTP mapping.
pub mod error;

/// Generic container endpoints.
pub mod docker;

/// NGINX endpoints, single and cluster.
pub mod nginx;

/// PostgreSQL endpoints, single and cluster.
pub mod postgres;

/// Stack endpoints.
pub mod stacks;

/// Websocket status feed.
pub mod ws;

/// Shared state behind every handler.
pub struct AppState {
    /// System of record.
    pub store: Arc<dyn MetadataStore>,
    /// Container runtime port.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Single PostgreSQL service.
    pub postgres_single: Arc<PostgresSingleService>,
    /// HA cluster engine.
    pub postgres_cluster: Arc<PostgresClusterService>,
    /// Single NGINX service.
    pub nginx_single: Arc<NginxSingleService>,
    /// NGINX cluster engine.
    pub nginx_cluster: Arc<NginxClusterService>,
    /// Generic container service.
    pub generic: Arc<GenericContainerService>,
    /// Stack engine.
    pub stacks: Arc<StackService>,
    /// Status fan-out for websocket clients.
    pub broadcaster: StatusBroadcaster,
    /// When the server started.
    pub start_time: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Wire every service over one dependency bundle.
    pub fn new(
        deps: ServiceDeps,
        timings: ClusterTimings,
        broadcaster: StatusBroadcaster,
    ) -> Arc<Self> {
        let postgres_single = Arc::new(PostgresSingleService::new(deps.clone()));
        let postgres_cluster = Arc::new(PostgresClusterService::new(deps.clone(), timings));
        let nginx_single = Arc::new(NginxSingleService::new(deps.clone()));
        let nginx_cluster = Arc::new(NginxClusterService::new(deps.clone()));
        let generic = Arc::new(GenericContainerService::new(deps.clone()));
        let stacks = Arc::new(StackService::new(
            deps.clone(),
            postgres_single.clone(),
            postgres_cluster.clone(),
            nginx_single.clone(),
            nginx_cluster.clone(),
            generic.clone(),
        ));

        Arc::new(Self {
            store: deps.store,
            runtime: deps.runtime,
            postgres_single,
            postgres_cluster,
            nginx_single,
            nginx_cluster,
            generic,
            stacks,
            broadcaster,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Build the full API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // PostgreSQL clusters
        .route("/api/v1/postgres/cluster", post(postgres::create_cluster))
        .route(
            "/api/v1/postgres/cluster/{id}",
            get(postgres::get_cluster).delete(postgres::delete_cluster),
        )
        .route("/api/v1/postgres/cluster/{id}/scale", post(postgres::scale_cluster))
        .route("/api/v1/postgres/cluster/{id}/nodes", post(postgres::add_node))
        .route(
            "/api/v1/postgres/cluster/{id}/nodes/{node_id}",
            delete(postgres::remove_node),
        )
        .route(
            "/api/v1/postgres/cluster/{id}/nodes/{node_id}/start",
            post(postgres::start_node),
        )
        .route(
            "/api/v1/postgres/cluster/{id}/nodes/{node_id}/stop",
            post(postgres::stop_node),
        )
        .route("/api/v1/postgres/cluster/{id}/failover", post(postgres::failover))
        .route(
            "/api/v1/postgres/cluster/{id}/replication",
            get(postgres::replication_status),
        )
        .route(
            "/api/v1/postgres/cluster/{id}/test-replication",
            post(postgres::test_replication),
        )
        .route("/api/v1/postgres/cluster/{id}/backup", post(postgres::backup))
        .route("/api/v1/postgres/cluster/{id}/stats", get(postgres::stats))
        .route("/api/v1/postgres/cluster/{id}/events", get(postgres::failover_events))
        .route("/api/v1/postgres/cluster/{id}/start", post(postgres::start_cluster))
        .route("/api/v1/postgres/cluster/{id}/stop", post(postgres::stop_cluster))
        // Single PostgreSQL
        .route(
            "/api/v1/postgres",
            post(postgres::create_instance).get(postgres::list_instances),
        )
        .route(
            "/api/v1/postgres/{id}",
            get(postgres::get_instance).delete(postgres::delete_instance),
        )
        .route("/api/v1/postgres/{id}/start", post(postgres::start_instance))
        .route("/api/v1/postgres/{id}/stop", post(postgres::stop_instance))
        .route("/api/v1/postgres/{id}/logs", get(postgres::instance_logs))
        // NGINX clusters
        .route("/api/v1/nginx/cluster", post(nginx::create_cluster))
        .route(
            "/api/v1/nginx/cluster/{id}",
            get(nginx::get_cluster).delete(nginx::delete_cluster),
        )
        .route("/api/v1/nginx/cluster/{id}/config", put(nginx::sync_config))
        .route("/api/v1/nginx/cluster/{id}/failover", post(nginx::failover))
        .route("/api/v1/nginx/cluster/{id}/start", post(nginx::start_cluster))
        .route("/api/v1/nginx/cluster/{id}/stop", post(nginx::stop_cluster))
        // Single NGINX
        .route("/api/v1/nginx", post(nginx::create_instance).get(nginx::list_instances))
        .route(
            "/api/v1/nginx/{id}",
            get(nginx::get_instance).delete(nginx::delete_instance),
        )
        .route(
            "/api/v1/nginx/{id}/routes",
            get(nginx::get_routes).put(nginx::update_routes),
        )
        .route(
            "/api/v1/nginx/{id}/upstreams",
            get(nginx::get_upstreams).put(nginx::update_upstreams),
        )
        .route("/api/v1/nginx/{id}/logs", get(nginx::instance_logs))
        .route("/api/v1/nginx/{id}/metrics", get(nginx::instance_metrics))
        // Generic containers
        .route(
            "/api/v1/docker",
            post(docker::create_container).get(docker::list_containers),
        )
        .route(
            "/api/v1/docker/{id}",
            get(docker::get_container).delete(docker::delete_container),
        )
        .route("/api/v1/docker/{id}/start", post(docker::start_container))
        .route("/api/v1/docker/{id}/stop", post(docker::stop_container))
        .route("/api/v1/docker/{id}/restart", post(docker::restart_container))
        .route("/api/v1/docker/{id}/logs", get(docker::container_logs))
        // Stacks
        .route("/api/v1/stacks", post(stacks::create_stack).get(stacks::list_stacks))
        .route(
            "/api/v1/stacks/{id}",
            get(stacks::get_stack).delete(stacks::delete_stack),
        )
        .route("/api/v1/stacks/{id}/start", post(stacks::start_stack))
        .route("/api/v1/stacks/{id}/stop", post(stacks::stop_stack))
        .route("/api/v1/stacks/{id}/restart", post(stacks::restart_stack))
        // Websocket status feed
        .route("/api/v1/ws/status", get(ws::status_feed))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Store ping, runtime ping, uptime, version.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let store_healthy = state.store.ping().await.unwrap_or(false);
    let runtime_healthy = state.runtime.ping().await.is_ok();

    Json(json!({
        "healthy": store_healthy && runtime_healthy,
        "store": store_healthy,
        "runtime": runtime_healthy,
        "version": state.version,
        "uptime_ms": state.start_time.elapsed().as_millis() as u64,
    }))
}
