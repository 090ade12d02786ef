// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL endpoints, single containers and HA clusters.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use iaas_core::model::{FailoverEvent, InfraKind, Infrastructure};

use crate::api::auth::AuthUser;
use crate::api::error::ApiResult;
use crate::api::AppState;
use crate::services::postgres_cluster::{
    AddNodeRequest, BackupRequest, ClusterNodeView, ClusterStatsView, ClusterView,
    CreateClusterRequest, ReplicationStatusView, ReplicationTestView,
};
use crate::services::postgres_single::{CreatePostgresRequest, PostgresSingleView};

#[derive(Debug, Deserialize)]
pub(crate) struct ForceParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogParams {
    tail: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FailoverBody {
    target_node_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScaleBody {
    #[serde(default)]
    node_count: u32,
}

// ----------------------------------------------------------------------
// Clusters
// ----------------------------------------------------------------------

pub(crate) async fn create_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreateClusterRequest>,
) -> ApiResult<Json<ClusterView>> {
    Ok(Json(state.postgres_cluster.create(&ctx, req).await?))
}

pub(crate) async fn get_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClusterView>> {
    Ok(Json(state.postgres_cluster.get(&ctx, id).await?))
}

pub(crate) async fn delete_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.delete(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub(crate) async fn scale_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ScaleBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.scale(&ctx, id, body.node_count).await?;
    Ok(Json(serde_json::json!({})))
}

pub(crate) async fn add_node(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<Json<ClusterNodeView>> {
    Ok(Json(state.postgres_cluster.add_node(&ctx, id, req).await?))
}

pub(crate) async fn remove_node(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path((id, node_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<ForceParams>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .postgres_cluster
        .remove_node(&ctx, id, node_id, params.force)
        .await?;
    Ok(Json(serde_json::json!({ "removed": node_id })))
}

pub(crate) async fn start_node(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path((id, node_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.start_node(&ctx, id, node_id).await?;
    Ok(Json(serde_json::json!({ "started": node_id })))
}

pub(crate) async fn stop_node(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path((id, node_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.stop_node(&ctx, id, node_id).await?;
    Ok(Json(serde_json::json!({ "stopped": node_id })))
}

pub(crate) async fn failover(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<FailoverBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .postgres_cluster
        .failover(&ctx, id, body.target_node_id)
        .await?;
    Ok(Json(serde_json::json!({ "promoted": body.target_node_id })))
}

pub(crate) async fn replication_status(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReplicationStatusView>> {
    Ok(Json(state.postgres_cluster.replication_status(&ctx, id).await?))
}

pub(crate) async fn test_replication(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReplicationTestView>> {
    Ok(Json(state.postgres_cluster.test_replication(&ctx, id).await?))
}

pub(crate) async fn backup(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<BackupRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let output = state.postgres_cluster.backup(&ctx, id, req).await?;
    Ok(Json(serde_json::json!({ "output": output })))
}

pub(crate) async fn stats(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClusterStatsView>> {
    Ok(Json(state.postgres_cluster.stats(&ctx, id).await?))
}

pub(crate) async fn failover_events(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<FailoverEvent>>> {
    Ok(Json(state.postgres_cluster.failover_events(&ctx, id).await?))
}

pub(crate) async fn start_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.start(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "started": id })))
}

pub(crate) async fn stop_cluster(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_cluster.stop(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "stopped": id })))
}

// ----------------------------------------------------------------------
// Single instances
// ----------------------------------------------------------------------

pub(crate) async fn create_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreatePostgresRequest>,
) -> ApiResult<Json<PostgresSingleView>> {
    Ok(Json(state.postgres_single.create(&ctx, req).await?))
}

pub(crate) async fn list_instances(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<Vec<Infrastructure>>> {
    let all = state.store.list_infrastructures(Some(&ctx.user_id)).await?;
    Ok(Json(
        all.into_iter()
            .filter(|i| i.kind == InfraKind::SinglePostgres)
            .collect(),
    ))
}

pub(crate) async fn get_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PostgresSingleView>> {
    Ok(Json(state.postgres_single.get(&ctx, id).await?))
}

pub(crate) async fn delete_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_single.delete(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub(crate) async fn start_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_single.start(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "started": id })))
}

pub(crate) async fn stop_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.postgres_single.stop(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "stopped": id })))
}

pub(crate) async fn instance_logs(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let logs = state
        .postgres_single
        .logs(&ctx, id, params.tail.unwrap_or(100))
        .await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}
