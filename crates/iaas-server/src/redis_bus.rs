// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis-backed lifecycle event bus.
//!
//! Publishes each event as JSON on the `iaas.lifecycle` channel. Like
//! every event-bus backend this is fire-and-forget: the reconciliation
//! loop and services log a failed publish and keep going.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use iaas_core::error::{Error, Result};
use iaas_core::events::EventBus;
use iaas_core::model::LifecycleEvent;

/// Pub/sub channel lifecycle events are published on.
pub const LIFECYCLE_CHANNEL: &str = "iaas.lifecycle";

/// Event bus over a Redis connection.
pub struct RedisEventBus {
    conn: ConnectionManager,
}

impl RedisEventBus {
    /// Connect to Redis and return a bus over a managed connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::DependencyFailed(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::DependencyFailed(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(LIFECYCLE_CHANNEL)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::DependencyFailed(e.to_string()))?;
        Ok(())
    }
}
