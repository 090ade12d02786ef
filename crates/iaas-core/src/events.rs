// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle event-bus port.
//!
//! Publication is fire-and-forget and never sits on a request's critical
//! path: callers log a failed publish and move on. The Redis backend lives
//! in the server crate; the in-process bus here backs tests and
//! deployments without a broker.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::LifecycleEvent;

/// Fire-and-forget publisher of lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event. Errors are logged and swallowed by callers.
    async fn publish(&self, event: &LifecycleEvent) -> Result<()>;
}

/// In-process event bus over a broadcast channel.
pub struct MemoryEventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryEventBus {
    /// Create a bus with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to published events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        // No subscribers is not a failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LifecycleEventMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(action: &str) -> LifecycleEvent {
        let id = Uuid::new_v4();
        LifecycleEvent {
            instance_id: id,
            user_id: "u1".into(),
            event_type: "infrastructure".into(),
            action: action.into(),
            timestamp: Utc::now(),
            metadata: LifecycleEventMetadata {
                container_id: "c1".into(),
                container_name: None,
                status: "running".into(),
                infrastructure_id: id,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = MemoryEventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(&event("start")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, "start");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryEventBus::new(8);
        bus.publish(&event("die")).await.unwrap();
    }
}
