// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic container endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use iaas_core::model::{InfraKind, Infrastructure};

use crate::api::AppState;
use crate::api::auth::AuthUser;
use crate::api::error::ApiResult;
use crate::services::docker_service::{ContainerView, CreateContainerRequest};

#[derive(Debug, Deserialize)]
pub(crate) struct LogParams {
    tail: Option<usize>,
}

pub(crate) async fn create_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreateContainerRequest>,
) -> ApiResult<Json<ContainerView>> {
    Ok(Json(state.generic.create(&ctx, req).await?))
}

pub(crate) async fn list_containers(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<Vec<Infrastructure>>> {
    let all = state.store.list_infrastructures(Some(&ctx.user_id)).await?;
    Ok(Json(
        all.into_iter()
            .filter(|i| i.kind == InfraKind::GenericContainer)
            .collect(),
    ))
}

pub(crate) async fn get_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ContainerView>> {
    Ok(Json(state.generic.get(&ctx, id).await?))
}

pub(crate) async fn delete_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.generic.delete(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub(crate) async fn start_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.generic.start(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "started": id })))
}

pub(crate) async fn stop_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.generic.stop(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "stopped": id })))
}

pub(crate) async fn restart_container(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.generic.restart(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "restarted": id })))
}

pub(crate) async fn container_logs(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let logs = state.generic.logs(&ctx, id, params.tail.unwrap_or(100)).await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}
