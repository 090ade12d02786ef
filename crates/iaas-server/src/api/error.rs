// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping.
//!
//! Service errors carry a kind; the kind alone decides the status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use iaas_core::error::{Error, ErrorKind};

/// A service error crossing the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

fn kind_str(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::NotFound => "not_found",
        ErrorKind::PreconditionFailed => "precondition_failed",
        ErrorKind::Conflict => "conflict",
        ErrorKind::RuntimeFailed => "runtime_failed",
        ErrorKind::DependencyFailed => "dependency_failed",
        ErrorKind::PartialSuccess => "partial_success",
        ErrorKind::Cancelled => "cancelled",
    }
}

fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RuntimeFailed | ErrorKind::DependencyFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::PartialSuccess => StatusCode::MULTI_STATUS,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = Json(json!({
            "error": kind_str(kind),
            "message": self.0.to_string(),
        }));
        (status_code(kind), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_code(ErrorKind::PreconditionFailed),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(status_code(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_code(ErrorKind::RuntimeFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_code(ErrorKind::PartialSuccess), StatusCode::MULTI_STATUS);
    }
}
