// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use iaas_core::model::Stack;

use crate::api::AppState;
use crate::api::auth::AuthUser;
use crate::api::error::ApiResult;
use crate::services::stack::{CreateStackRequest, StackDeleteReport, StackView};

pub(crate) async fn create_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Json(req): Json<CreateStackRequest>,
) -> ApiResult<Json<StackView>> {
    Ok(Json(state.stacks.create(&ctx, req).await?))
}

pub(crate) async fn list_stacks(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<Vec<Stack>>> {
    Ok(Json(state.stacks.list(&ctx).await?))
}

pub(crate) async fn get_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StackView>> {
    Ok(Json(state.stacks.get(&ctx, id).await?))
}

/// Delete the stack. The stack row always reaches `deleted`; per-resource
/// failures answer 207 with the error list.
pub(crate) async fn delete_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<StackDeleteReport>)> {
    let report = state.stacks.delete(&ctx, id).await?;
    let status = if report.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report)))
}

pub(crate) async fn start_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stacks.start(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "started": id })))
}

pub(crate) async fn stop_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stacks.stop(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "stopped": id })))
}

pub(crate) async fn restart_stack(
    State(state): State<Arc<AppState>>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stacks.restart(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "restarted": id })))
}
