// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bearer-token principal extraction.
//!
//! Authentication itself happens upstream; the bearer subject arrives as
//! an opaque, already-verified identity and becomes the `user_id` plumbed
//! into every service call.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::context::Ctx;

/// The authenticated principal, extracted from the Authorization header.
pub struct AuthUser(pub Ctx);

/// 401 response for missing or malformed credentials.
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "unauthorized",
                "message": "missing or malformed bearer token",
            })),
        )
            .into_response()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthRejection)?;

        let subject = header.strip_prefix("Bearer ").ok_or(AuthRejection)?;
        if subject.is_empty() {
            return Err(AuthRejection);
        }

        Ok(AuthUser(Ctx::new(subject)))
    }
}
