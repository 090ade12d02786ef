// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metadata-store port and backends.
//!
//! The store is the system of record: every service method writes here and
//! reads back from here. Two backends exist - [`postgres::PostgresStore`]
//! for production and [`memory::MemoryStore`] for tests. Correlated writes
//! (primary swaps, stack teardown) are atomic in both.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ClusterNode, DockerService, FailoverEvent, InfraStatus, Infrastructure, NginxCluster,
    NginxNode, NginxRole, NginxRouting, NodeRole, PostgresCluster, PostgresSingle, Stack,
    StackOperation, StackOperationStatus, StackResource, StackStatus,
};

/// Metadata-store interface used by every service.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ------------------------------------------------------------------
    // Infrastructures
    // ------------------------------------------------------------------

    /// Persist a new infrastructure row.
    async fn create_infrastructure(&self, infra: &Infrastructure) -> Result<()>;

    /// Fetch an infrastructure by id.
    async fn get_infrastructure(&self, id: Uuid) -> Result<Option<Infrastructure>>;

    /// List infrastructures, optionally restricted to one principal.
    async fn list_infrastructures(&self, user_id: Option<&str>) -> Result<Vec<Infrastructure>>;

    /// Write a new lifecycle status. Unconditional; last writer wins.
    async fn update_infrastructure_status(&self, id: Uuid, status: InfraStatus) -> Result<()>;

    /// Resolve the infrastructure that owns a container, if any.
    ///
    /// Looks across single components, cluster nodes, and nginx nodes. An
    /// unknown container id means the container is not managed here.
    async fn find_infrastructure_by_container(
        &self,
        container_id: &str,
    ) -> Result<Option<Infrastructure>>;

    // ------------------------------------------------------------------
    // Single PostgreSQL
    // ------------------------------------------------------------------

    /// Persist a new single-postgres component.
    async fn create_postgres_single(&self, component: &PostgresSingle) -> Result<()>;

    /// Fetch the single-postgres component of an infrastructure.
    async fn get_postgres_single_by_infra(&self, infra_id: Uuid)
    -> Result<Option<PostgresSingle>>;

    /// Record the runtime container id of a single-postgres component.
    async fn set_postgres_single_container(&self, id: Uuid, container_id: &str) -> Result<()>;

    /// Delete a single-postgres component row.
    async fn delete_postgres_single(&self, id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // Single NGINX
    // ------------------------------------------------------------------

    /// Persist a new single-nginx component.
    async fn create_nginx_single(&self, component: &crate::model::NginxSingle) -> Result<()>;

    /// Fetch the single-nginx component of an infrastructure.
    async fn get_nginx_single_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<crate::model::NginxSingle>>;

    /// Record the runtime container id of a single-nginx component.
    async fn set_nginx_single_container(&self, id: Uuid, container_id: &str) -> Result<()>;

    /// Store the applied config and routing model of a single-nginx component.
    async fn update_nginx_single_config(
        &self,
        id: Uuid,
        config: &str,
        routing: &NginxRouting,
    ) -> Result<()>;

    /// Delete a single-nginx component row.
    async fn delete_nginx_single(&self, id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // Generic containers
    // ------------------------------------------------------------------

    /// Persist a new generic-container component.
    async fn create_docker_service(&self, component: &DockerService) -> Result<()>;

    /// Fetch the generic-container component of an infrastructure.
    async fn get_docker_service_by_infra(&self, infra_id: Uuid) -> Result<Option<DockerService>>;

    /// Record the runtime container id of a generic-container component.
    async fn set_docker_service_container(&self, id: Uuid, container_id: &str) -> Result<()>;

    /// Delete a generic-container component row.
    async fn delete_docker_service(&self, id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // PostgreSQL clusters
    // ------------------------------------------------------------------

    /// Persist a new postgres-cluster component.
    async fn create_postgres_cluster(&self, cluster: &PostgresCluster) -> Result<()>;

    /// Fetch a postgres cluster by id.
    async fn get_postgres_cluster(&self, id: Uuid) -> Result<Option<PostgresCluster>>;

    /// Fetch the postgres cluster of an infrastructure.
    async fn get_postgres_cluster_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<PostgresCluster>>;

    /// Record the bridge network the cluster runs on.
    async fn set_cluster_network(&self, id: Uuid, network_id: &str) -> Result<()>;

    /// Record the current primary node (or clear it).
    async fn set_cluster_primary(&self, id: Uuid, primary: Option<Uuid>) -> Result<()>;

    /// Delete a postgres-cluster component row and its nodes.
    async fn delete_postgres_cluster(&self, id: Uuid) -> Result<()>;

    /// Persist a new cluster node.
    async fn create_cluster_node(&self, node: &ClusterNode) -> Result<()>;

    /// Fetch a cluster node by id.
    async fn get_cluster_node(&self, id: Uuid) -> Result<Option<ClusterNode>>;

    /// List a cluster's nodes ordered by name.
    async fn list_cluster_nodes(&self, cluster_id: Uuid) -> Result<Vec<ClusterNode>>;

    /// Write a node's role.
    async fn update_node_role(&self, node_id: Uuid, role: NodeRole) -> Result<()>;

    /// Atomically demote the current primary, promote the target, and point
    /// the cluster's `primary_node_id` at it.
    async fn swap_primary(
        &self,
        cluster_id: Uuid,
        old_primary: Option<Uuid>,
        new_primary: Uuid,
    ) -> Result<()>;

    /// Write a node's health flag.
    async fn update_node_health(&self, node_id: Uuid, healthy: bool) -> Result<()>;

    /// Project a container's health onto whichever cluster node owns it.
    ///
    /// Covers both postgres and nginx cluster nodes; a container nobody
    /// owns is a no-op. Used by the reconciliation loop.
    async fn update_node_health_by_container(
        &self,
        container_id: &str,
        healthy: bool,
    ) -> Result<()>;

    /// Write a node's replication lag.
    async fn update_node_replication_lag(&self, node_id: Uuid, lag: Option<i64>) -> Result<()>;

    /// Delete a cluster node row.
    async fn delete_cluster_node(&self, node_id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // NGINX clusters
    // ------------------------------------------------------------------

    /// Persist a new nginx-cluster component.
    async fn create_nginx_cluster(&self, cluster: &NginxCluster) -> Result<()>;

    /// Fetch an nginx cluster by id.
    async fn get_nginx_cluster(&self, id: Uuid) -> Result<Option<NginxCluster>>;

    /// Fetch the nginx cluster of an infrastructure.
    async fn get_nginx_cluster_by_infra(&self, infra_id: Uuid) -> Result<Option<NginxCluster>>;

    /// Store the effective nginx configuration of a cluster.
    async fn update_nginx_cluster_config(&self, id: Uuid, config: &str) -> Result<()>;

    /// Delete an nginx-cluster component row and its nodes.
    async fn delete_nginx_cluster(&self, id: Uuid) -> Result<()>;

    /// Persist a new nginx node.
    async fn create_nginx_node(&self, node: &NginxNode) -> Result<()>;

    /// Fetch an nginx node by id.
    async fn get_nginx_node(&self, id: Uuid) -> Result<Option<NginxNode>>;

    /// List a cluster's nginx nodes ordered by priority, highest first.
    async fn list_nginx_nodes(&self, cluster_id: Uuid) -> Result<Vec<NginxNode>>;

    /// Write an nginx node's role and priority.
    async fn update_nginx_node_role(
        &self,
        node_id: Uuid,
        role: NginxRole,
        priority: i32,
    ) -> Result<()>;

    /// Atomically swap master and backup roles between two nodes.
    ///
    /// The demoted node gets priority 50, the promoted node 100.
    async fn swap_nginx_master(
        &self,
        cluster_id: Uuid,
        old_master: Uuid,
        new_master: Uuid,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Failover events
    // ------------------------------------------------------------------

    /// Append an immutable failover event.
    async fn append_failover_event(&self, event: &FailoverEvent) -> Result<()>;

    /// List a cluster's failover events, newest first.
    async fn list_failover_events(&self, cluster_id: Uuid) -> Result<Vec<FailoverEvent>>;

    // ------------------------------------------------------------------
    // Stacks
    // ------------------------------------------------------------------

    /// Persist a new stack.
    async fn create_stack(&self, stack: &Stack) -> Result<()>;

    /// Fetch a stack by id.
    async fn get_stack(&self, id: Uuid) -> Result<Option<Stack>>;

    /// List stacks, optionally restricted to one principal.
    async fn list_stacks(&self, user_id: Option<&str>) -> Result<Vec<Stack>>;

    /// Write a stack's lifecycle status.
    async fn update_stack_status(&self, id: Uuid, status: StackStatus) -> Result<()>;

    /// Persist a stack resource row.
    async fn create_stack_resource(&self, resource: &StackResource) -> Result<()>;

    /// List a stack's resources ordered by position.
    async fn list_stack_resources(&self, stack_id: Uuid) -> Result<Vec<StackResource>>;

    /// Remove all resource rows of a stack.
    async fn delete_stack_resources(&self, stack_id: Uuid) -> Result<()>;

    /// Persist a stack operation journal entry.
    async fn create_stack_operation(&self, operation: &StackOperation) -> Result<()>;

    /// Close a stack operation with a final status and optional error text.
    async fn finish_stack_operation(
        &self,
        id: Uuid,
        status: StackOperationStatus,
        error: Option<&str>,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Check store connectivity.
    async fn ping(&self) -> Result<bool>;
}
