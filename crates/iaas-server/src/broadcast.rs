// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Real-time status broadcast.
//!
//! The reconciliation loop pushes a [`StatusUpdate`] for every status
//! transition; websocket handlers subscribe and forward updates to their
//! client. Slow subscribers lag and drop, they never block the loop.

use tokio::sync::broadcast;

use iaas_core::model::StatusUpdate;

/// Fan-out channel for status updates.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatusBroadcaster {
    /// Create a broadcaster with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Push an update to every subscriber.
    pub fn send(&self, update: StatusUpdate) {
        // No subscribers is the common idle case.
        let _ = self.sender.send(update);
    }

    /// Subscribe to future updates.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscriber_receives_update() {
        let broadcaster = StatusBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(StatusUpdate {
            infrastructure_id: Uuid::new_v4(),
            container_id: "c1".into(),
            status: "running".into(),
            action: "start".into(),
            timestamp: Utc::now(),
        });

        let update = rx.recv().await.unwrap();
        assert_eq!(update.status, "running");
    }

    #[test]
    fn test_send_without_subscribers_is_fine() {
        let broadcaster = StatusBroadcaster::new(8);
        broadcaster.send(StatusUpdate {
            infrastructure_id: Uuid::new_v4(),
            container_id: "c1".into(),
            status: "stopped".into(),
            action: "die".into(),
            timestamp: Utc::now(),
        });
    }
}
