// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NGINX endpoints, single containers and clusters.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use iaas_core::model::{InfraKind, Infrastructure, NginxRouting, Upstream};

use crate::api::AppState;
use crate::api::auth::AuthUser;
use crate::api::error::ApiResult;
use crate::services::nginx_cluster::{
    ConfigSyncReport, CreateNginxClusterRequest, NginxClusterView,
};
use crate::services::nginx_single::{CreateNginxRequest, NginxSingleView};

#[derive(Debug, Deserialize)]
pub(crate) struct LogParams {
    tail: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FailoverBody {
    target_node_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigBody {
    config: String,
}

// ----------------------------------------------------------------------
// Clusters
// ----------------------------------------------------------------------

pub(crate) async fn create_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreateNginxClusterRequest>,
) -> ApiResult<Json<NginxClusterView>> {
    Ok(Json(state.nginx_cluster.create(&ctx, req).await?))
}

pub(crate) async fn get_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NginxClusterView>> {
    Ok(Json(state.nginx_cluster.get(&ctx, id).await?))
}

pub(crate) async fn delete_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.nginx_cluster.delete(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Roll a candidate config out across the cluster. A partial rollout
/// answers 207 with the per-node report.
pub(crate) async fn sync_config(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfigBody>,
) -> ApiResult<(StatusCode, Json<ConfigSyncReport>)> {
    let report = state.nginx_cluster.sync_config(&ctx, id, &body.config).await?;
    let status = if report.has_failures() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

pub(crate) async fn failover(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<FailoverBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.nginx_cluster.failover(&ctx, id, body.target_node_id).await?;
    Ok(Json(serde_json::json!({ "promoted": body.target_node_id })))
}

pub(crate) async fn start_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.nginx_cluster.start(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "started": id })))
}

pub(crate) async fn stop_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.nginx_cluster.stop(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "stopped": id })))
}

// ----------------------------------------------------------------------
// Single instances
// ----------------------------------------------------------------------

pub(crate) async fn create_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreateNginxRequest>,
) -> ApiResult<Json<NginxSingleView>> {
    Ok(Json(state.nginx_single.create(&ctx, req).await?))
}

pub(crate) async fn list_instances(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<Vec<Infrastructure>>> {
    let all = state.store.list_infrastructures(Some(&ctx.user_id)).await?;
    Ok(Json(
        all.into_iter()
            .filter(|i| i.kind == InfraKind::SingleNginx)
            .collect(),
    ))
}

pub(crate) async fn get_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NginxSingleView>> {
    Ok(Json(state.nginx_single.get(&ctx, id).await?))
}

pub(crate) async fn delete_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.nginx_single.delete(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub(crate) async fn get_routes(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NginxRouting>> {
    Ok(Json(state.nginx_single.get(&ctx, id).await?.routing))
}

pub(crate) async fn update_routes(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(routing): Json<NginxRouting>,
) -> ApiResult<Json<NginxSingleView>> {
    Ok(Json(state.nginx_single.update_routing(&ctx, id, routing).await?))
}

pub(crate) async fn get_upstreams(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Upstream>>> {
    Ok(Json(state.nginx_single.get(&ctx, id).await?.routing.upstreams))
}

/// Replace the upstream pools, keeping the server blocks.
pub(crate) async fn update_upstreams(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(upstreams): Json<Vec<Upstream>>,
) -> ApiResult<Json<NginxSingleView>> {
    let mut routing = state.nginx_single.get(&ctx, id).await?.routing;
    routing.upstreams = upstreams;
    Ok(Json(state.nginx_single.update_routing(&ctx, id, routing).await?))
}

pub(crate) async fn instance_logs(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let logs = state
        .nginx_single
        .logs(&ctx, id, params.tail.unwrap_or(100))
        .await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

pub(crate) async fn instance_metrics(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(state.nginx_single.metrics(&ctx, id).await?))
}
