// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning engines.
//!
//! One service per resource type, all over the same set of ports. Shared
//! glue lives here: the dependency bundle, the container naming
//! convention, runtime-to-status mapping, and lifecycle event publishing.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use iaas_core::cache::ClusterCache;
use iaas_core::events::EventBus;
use iaas_core::model::{InfraStatus, Infrastructure, LifecycleEvent, LifecycleEventMetadata};
use iaas_core::store::MetadataStore;
use iaas_runtime::{ContainerRuntime, ContainerState};

/// Single PostgreSQL containers.
pub mod postgres_single;

/// Single NGINX containers, including routing subresources.
pub mod nginx_single;

/// Generic user-supplied containers.
pub mod docker_service;

/// NGINX configuration generation and in-container apply/rollback.
pub mod nginx_config;

/// The Patroni/etcd/HAProxy HA cluster engine.
pub mod postgres_cluster;

/// The NGINX active-passive cluster engine.
pub mod nginx_cluster;

/// The stack composition engine.
pub mod stack;

pub use docker_service::GenericContainerService;
pub use nginx_cluster::NginxClusterService;
pub use nginx_single::NginxSingleService;
pub use postgres_cluster::{ClusterTimings, PostgresClusterService};
pub use postgres_single::PostgresSingleService;
pub use stack::StackService;

/// Shared collaborators handed to every service.
#[derive(Clone)]
pub struct ServiceDeps {
    /// System of record.
    pub store: Arc<dyn MetadataStore>,
    /// Container runtime port.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Read-through cluster view cache.
    pub cache: Arc<ClusterCache>,
    /// Fire-and-forget lifecycle event bus.
    pub events: Arc<dyn EventBus>,
}

/// Deterministic container name: `iaas-<role>-<unit-id>[-<node-name>]`.
pub fn container_name(role: &str, unit_id: Uuid, node: Option<&str>) -> String {
    match node {
        Some(node) => format!("iaas-{role}-{unit_id}-{node}"),
        None => format!("iaas-{role}-{unit_id}"),
    }
}

/// Volume name for a unit's data path.
pub fn volume_name(role: &str, unit_id: Uuid, suffix: &str) -> String {
    format!("iaas-{role}-{unit_id}-{suffix}")
}

/// Bridge network name for a clustered unit.
pub fn network_name(unit_id: Uuid) -> String {
    format!("iaas-net-{unit_id}")
}

/// Map an inspected container state onto an infrastructure status.
pub fn status_from_state(state: &ContainerState) -> InfraStatus {
    if state.running {
        InfraStatus::Running
    } else if state.dead || state.exit_code != 0 {
        InfraStatus::Failed
    } else {
        InfraStatus::Stopped
    }
}

/// First free port at or above `base`, skipping ports already used within
/// the cluster.
pub fn scan_port(base: i32, used: &HashSet<i32>) -> i32 {
    let mut candidate = base;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

/// Publish a lifecycle event; failures are logged and swallowed.
pub async fn publish_lifecycle(
    events: &Arc<dyn EventBus>,
    infra: &Infrastructure,
    container_id: &str,
    container_name: Option<String>,
    status: InfraStatus,
    action: &str,
) {
    let event = LifecycleEvent {
        instance_id: infra.id,
        user_id: infra.user_id.clone(),
        event_type: "infrastructure".to_string(),
        action: action.to_string(),
        timestamp: Utc::now(),
        metadata: LifecycleEventMetadata {
            container_id: container_id.to_string(),
            container_name,
            status: status.as_str().to_string(),
            infrastructure_id: infra.id,
        },
    };
    if let Err(e) = events.publish(&event).await {
        warn!(infrastructure_id = %infra.id, error = %e, "failed to publish lifecycle event");
    }
}
