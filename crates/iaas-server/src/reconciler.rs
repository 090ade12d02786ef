// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation loop.
//!
//! A single long-running task consumes the runtime's container event
//! stream and projects it onto the authoritative store: derive a status
//! from the action, look the container up, write the status
//! unconditionally (last writer wins), invalidate cluster caches, publish
//! a lifecycle event, and broadcast to websocket subscribers.
//!
//! Per-event failures are logged and swallowed; the loop only exits when
//! the upstream channel closes or shutdown is signalled.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use iaas_core::cache::ClusterCache;
use iaas_core::error::Result;
use iaas_core::events::EventBus;
use iaas_core::model::{
    InfraKind, InfraStatus, LifecycleEvent, LifecycleEventMetadata, StatusUpdate,
};
use iaas_core::store::MetadataStore;
use iaas_runtime::{EventAction, RuntimeEvent};

use crate::broadcast::StatusBroadcaster;

/// Map a runtime action onto a canonical status; `None` means ignore.
fn derive_status(action: EventAction) -> Option<InfraStatus> {
    match action {
        EventAction::Start | EventAction::Restart => Some(InfraStatus::Running),
        EventAction::Stop | EventAction::Die => Some(InfraStatus::Stopped),
        EventAction::Destroy | EventAction::Remove => Some(InfraStatus::Deleted),
        EventAction::Create => Some(InfraStatus::Creating),
        EventAction::Other => None,
    }
}

/// The runtime-event consumer.
pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    cache: Arc<ClusterCache>,
    events: Arc<dyn EventBus>,
    broadcaster: Option<StatusBroadcaster>,
}

impl Reconciler {
    /// Create a reconciler over the shared collaborators.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<ClusterCache>,
        events: Arc<dyn EventBus>,
        broadcaster: Option<StatusBroadcaster>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            broadcaster,
        }
    }

    /// Run until the event channel closes or shutdown is signalled.
    ///
    /// Events for a given container are processed in the order the runtime
    /// produced them; the bounded channel upstream backpressures the
    /// producer rather than dropping events.
    pub async fn run(self, mut rx: mpsc::Receiver<RuntimeEvent>, shutdown: CancellationToken) {
        info!("reconciliation loop started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("reconciliation loop received shutdown signal");
                    break;
                }

                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle(&event).await {
                                error!(
                                    container_id = %event.container_id,
                                    action = event.action.as_str(),
                                    error = %e,
                                    "failed to reconcile runtime event"
                                );
                            }
                        }
                        None => {
                            info!("runtime event channel closed");
                            break;
                        }
                    }
                }
            }
        }
        info!("reconciliation loop stopped");
    }

    async fn handle(&self, event: &RuntimeEvent) -> Result<()> {
        let Some(derived) = derive_status(event.action) else {
            return Ok(());
        };

        let Some(infra) = self
            .store
            .find_infrastructure_by_container(&event.container_id)
            .await?
        else {
            // Not one of ours.
            debug!(container_id = %event.container_id, "event for unmanaged container");
            return Ok(());
        };

        // A single patroni member going down degrades the cluster instead
        // of stopping it (a deliberate cluster-wide stop has already
        // written `stopped`); everything else writes the derived status
        // as-is, last writer wins.
        let status = if derived == InfraStatus::Stopped
            && matches!(infra.status, InfraStatus::Running | InfraStatus::Degraded)
            && infra.kind == InfraKind::PostgresCluster
        {
            InfraStatus::Degraded
        } else {
            derived
        };

        self.store
            .update_infrastructure_status(infra.id, status)
            .await?;
        self.store
            .update_node_health_by_container(&event.container_id, status == InfraStatus::Running)
            .await?;

        if infra.kind == InfraKind::PostgresCluster
            && let Ok(Some(cluster)) = self.store.get_postgres_cluster_by_infra(infra.id).await
        {
            self.cache.invalidate_cluster(cluster.id);
        }

        let timestamp = Utc::now();
        let lifecycle = LifecycleEvent {
            instance_id: infra.id,
            user_id: infra.user_id.clone(),
            event_type: "infrastructure".to_string(),
            action: event.action.as_str().to_string(),
            timestamp,
            metadata: LifecycleEventMetadata {
                container_id: event.container_id.clone(),
                container_name: event.container_name.clone(),
                status: status.as_str().to_string(),
                infrastructure_id: infra.id,
            },
        };
        if let Err(e) = self.events.publish(&lifecycle).await {
            warn!(infrastructure_id = %infra.id, error = %e, "failed to publish lifecycle event");
        }

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(StatusUpdate {
                infrastructure_id: infra.id,
                container_id: event.container_id.clone(),
                status: status.as_str().to_string(),
                action: event.action.as_str().to_string(),
                timestamp,
            });
        }

        debug!(
            infrastructure_id = %infra.id,
            container_id = %event.container_id,
            status = status.as_str(),
            "reconciled runtime event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_mapping() {
        assert_eq!(derive_status(EventAction::Start), Some(InfraStatus::Running));
        assert_eq!(derive_status(EventAction::Restart), Some(InfraStatus::Running));
        assert_eq!(derive_status(EventAction::Stop), Some(InfraStatus::Stopped));
        assert_eq!(derive_status(EventAction::Die), Some(InfraStatus::Stopped));
        assert_eq!(derive_status(EventAction::Destroy), Some(InfraStatus::Deleted));
        assert_eq!(derive_status(EventAction::Remove), Some(InfraStatus::Deleted));
        assert_eq!(derive_status(EventAction::Create), Some(InfraStatus::Creating));
        assert_eq!(derive_status(EventAction::Other), None);
    }
}
