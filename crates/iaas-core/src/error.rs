// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for iaas.
//!
//! One error enum covers every service operation. Each variant maps to one
//! of the caller-visible kinds; the HTTP layer turns kinds into status
//! codes, and multi-step operations wrap per-step failures with the step's
//! identity before propagating.

use iaas_runtime::RuntimeError;
use thiserror::Error;

/// Caller-visible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shape or value rejected before any side effect.
    InvalidInput,
    /// Addressed entity missing.
    NotFound,
    /// Operation refused by an invariant.
    PreconditionFailed,
    /// Transient clash with runtime state.
    Conflict,
    /// The container runtime rejected or timed out on an operation.
    RuntimeFailed,
    /// An underlying collaborator returned an error.
    DependencyFailed,
    /// The operation completed on some targets but not others.
    PartialSuccess,
    /// The request was cancelled before completing.
    Cancelled,
}

/// iaas errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request shape or value rejected before any side effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Addressed entity missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation refused by an invariant.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Transient clash with runtime state (port in use, name collision).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The container runtime rejected or timed out on an operation.
    #[error("container runtime failed: {0}")]
    RuntimeFailed(String),

    /// An underlying collaborator (store, etcd, Patroni) returned an error.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// The operation completed on some targets but not others.
    #[error("partial success: {message}; failed: {}", failures.join("; "))]
    PartialSuccess {
        /// What the operation was doing.
        message: String,
        /// Per-target failure descriptions.
        failures: Vec<String>,
    },

    /// The request was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The caller-visible kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RuntimeFailed(_) => ErrorKind::RuntimeFailed,
            Self::DependencyFailed(_) | Self::Database(_) | Self::Json(_) => {
                ErrorKind::DependencyFailed
            }
            Self::PartialSuccess { .. } => ErrorKind::PartialSuccess,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wrap this error with the identity of the step that failed.
    ///
    /// Used by multi-step operations: `e.in_step("create nginx node 2")`.
    /// The kind is preserved.
    pub fn in_step(self, step: impl AsRef<str>) -> Self {
        let step = step.as_ref();
        match self {
            Self::InvalidInput(m) => Self::InvalidInput(format!("{step}: {m}")),
            Self::NotFound(m) => Self::NotFound(format!("{step}: {m}")),
            Self::PreconditionFailed(m) => Self::PreconditionFailed(format!("{step}: {m}")),
            Self::Conflict(m) => Self::Conflict(format!("{step}: {m}")),
            Self::RuntimeFailed(m) => Self::RuntimeFailed(format!("{step}: {m}")),
            Self::DependencyFailed(m) => Self::DependencyFailed(format!("{step}: {m}")),
            other => Self::DependencyFailed(format!("{step}: {other}")),
        }
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(m) => Self::NotFound(m),
            RuntimeError::Conflict(m) => Self::Conflict(m),
            other => Self::RuntimeFailed(other.to_string()),
        }
    }
}

/// Result type using the iaas Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::PreconditionFailed("x".into()).kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::RuntimeFailed("x".into()).kind(), ErrorKind::RuntimeFailed);
        assert_eq!(
            Error::DependencyFailed("x".into()).kind(),
            ErrorKind::DependencyFailed
        );
        assert_eq!(
            Error::PartialSuccess {
                message: "sync".into(),
                failures: vec!["node 2".into()]
            }
            .kind(),
            ErrorKind::PartialSuccess
        );
    }

    #[test]
    fn test_runtime_error_mapping() {
        assert_eq!(
            Error::from(RuntimeError::NotFound("c1".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::from(RuntimeError::Conflict("port".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::from(RuntimeError::Unavailable("down".into())).kind(),
            ErrorKind::RuntimeFailed
        );
    }

    #[test]
    fn test_in_step_preserves_kind() {
        let wrapped = Error::Conflict("port 5432 in use".into()).in_step("create patroni node 2");
        assert_eq!(wrapped.kind(), ErrorKind::Conflict);
        assert!(wrapped.to_string().contains("create patroni node 2"));
        assert!(wrapped.to_string().contains("port 5432 in use"));
    }

    #[test]
    fn test_partial_success_display() {
        let e = Error::PartialSuccess {
            message: "config sync".into(),
            failures: vec!["nginx-2: validation failed".into()],
        };
        let text = e.to_string();
        assert!(text.contains("config sync"));
        assert!(text.contains("nginx-2"));
    }
}
