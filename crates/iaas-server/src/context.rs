// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request context.
//!
//! Every service method takes a [`Ctx`] carrying the authenticated
//! principal and a cancellation token. Cancellation is cooperative:
//! multi-stage operations check the token between suspension points and
//! abandon - never undo - completed side effects.

use tokio_util::sync::CancellationToken;

use iaas_core::error::{Error, Result};

/// Request context: principal plus cancellation.
#[derive(Debug, Clone)]
pub struct Ctx {
    /// Authenticated principal the operation runs as.
    pub user_id: String,
    /// Cooperative cancellation token.
    pub cancel: CancellationToken,
}

impl Ctx {
    /// Context for the given principal with a fresh token.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context for background work owned by the system itself.
    pub fn system() -> Self {
        Self::new("system")
    }

    /// Error out if the request was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_not_cancelled() {
        let ctx = Ctx::new("u1");
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn test_cancelled_context_errors() {
        let ctx = Ctx::new("u1");
        ctx.cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }
}
