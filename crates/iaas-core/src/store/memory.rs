// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory metadata store for tests.
//!
//! Backs every table with a map behind one mutex, so correlated writes are
//! atomic the same way the PostgreSQL backend's transactions are.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    ClusterNode, DockerService, FailoverEvent, InfraStatus, Infrastructure, NginxCluster,
    NginxNode, NginxRole, NginxRouting, NginxSingle, NodeRole, PostgresCluster, PostgresSingle,
    Stack, StackOperation, StackOperationStatus, StackResource, StackStatus,
};
use crate::store::MetadataStore;

#[derive(Default)]
struct Tables {
    infrastructures: HashMap<Uuid, Infrastructure>,
    postgres_singles: HashMap<Uuid, PostgresSingle>,
    nginx_singles: HashMap<Uuid, NginxSingle>,
    docker_services: HashMap<Uuid, DockerService>,
    postgres_clusters: HashMap<Uuid, PostgresCluster>,
    cluster_nodes: HashMap<Uuid, ClusterNode>,
    nginx_clusters: HashMap<Uuid, NginxCluster>,
    nginx_nodes: HashMap<Uuid, NginxNode>,
    failover_events: Vec<FailoverEvent>,
    stacks: HashMap<Uuid, Stack>,
    stack_resources: Vec<StackResource>,
    stack_operations: HashMap<Uuid, StackOperation>,
}

/// In-memory metadata store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(entity: &str, id: Uuid) -> Error {
        Error::NotFound(format!("{entity} {id}"))
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create_infrastructure(&self, infra: &Infrastructure) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .infrastructures
            .insert(infra.id, infra.clone());
        Ok(())
    }

    async fn get_infrastructure(&self, id: Uuid) -> Result<Option<Infrastructure>> {
        Ok(self.tables.lock().unwrap().infrastructures.get(&id).cloned())
    }

    async fn list_infrastructures(&self, user_id: Option<&str>) -> Result<Vec<Infrastructure>> {
        let tables = self.tables.lock().unwrap();
        let mut result: Vec<Infrastructure> = tables
            .infrastructures
            .values()
            .filter(|i| user_id.is_none_or(|u| i.user_id == u))
            .cloned()
            .collect();
        result.sort_by_key(|i| i.created_at);
        Ok(result)
    }

    async fn update_infrastructure_status(&self, id: Uuid, status: InfraStatus) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let infra = tables
            .infrastructures
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("infrastructure", id))?;
        infra.status = status;
        infra.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn find_infrastructure_by_container(
        &self,
        container_id: &str,
    ) -> Result<Option<Infrastructure>> {
        let tables = self.tables.lock().unwrap();

        let infra_id = tables
            .postgres_singles
            .values()
            .find(|c| c.container_id.as_deref() == Some(container_id))
            .map(|c| c.infrastructure_id)
            .or_else(|| {
                tables
                    .nginx_singles
                    .values()
                    .find(|c| c.container_id.as_deref() == Some(container_id))
                    .map(|c| c.infrastructure_id)
            })
            .or_else(|| {
                tables
                    .docker_services
                    .values()
                    .find(|c| c.container_id.as_deref() == Some(container_id))
                    .map(|c| c.infrastructure_id)
            })
            .or_else(|| {
                tables
                    .cluster_nodes
                    .values()
                    .find(|n| n.container_id == container_id)
                    .and_then(|n| tables.postgres_clusters.get(&n.cluster_id))
                    .map(|c| c.infrastructure_id)
            })
            .or_else(|| {
                tables
                    .nginx_nodes
                    .values()
                    .find(|n| n.container_id == container_id)
                    .and_then(|n| tables.nginx_clusters.get(&n.cluster_id))
                    .map(|c| c.infrastructure_id)
            });

        Ok(infra_id.and_then(|id| tables.infrastructures.get(&id).cloned()))
    }

    async fn create_postgres_single(&self, component: &PostgresSingle) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .postgres_singles
            .insert(component.id, component.clone());
        Ok(())
    }

    async fn get_postgres_single_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<PostgresSingle>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .postgres_singles
            .values()
            .find(|c| c.infrastructure_id == infra_id)
            .cloned())
    }

    async fn set_postgres_single_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let component = tables
            .postgres_singles
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("postgres single", id))?;
        component.container_id = Some(container_id.to_string());
        Ok(())
    }

    async fn delete_postgres_single(&self, id: Uuid) -> Result<()> {
        self.tables.lock().unwrap().postgres_singles.remove(&id);
        Ok(())
    }

    async fn create_nginx_single(&self, component: &NginxSingle) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .nginx_singles
            .insert(component.id, component.clone());
        Ok(())
    }

    async fn get_nginx_single_by_infra(&self, infra_id: Uuid) -> Result<Option<NginxSingle>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .nginx_singles
            .values()
            .find(|c| c.infrastructure_id == infra_id)
            .cloned())
    }

    async fn set_nginx_single_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let component = tables
            .nginx_singles
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("nginx single", id))?;
        component.container_id = Some(container_id.to_string());
        Ok(())
    }

    async fn update_nginx_single_config(
        &self,
        id: Uuid,
        config: &str,
        routing: &NginxRouting,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let component = tables
            .nginx_singles
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("nginx single", id))?;
        component.config = Some(config.to_string());
        component.routing = routing.clone();
        Ok(())
    }

    async fn delete_nginx_single(&self, id: Uuid) -> Result<()> {
        self.tables.lock().unwrap().nginx_singles.remove(&id);
        Ok(())
    }

    async fn create_docker_service(&self, component: &DockerService) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .docker_services
            .insert(component.id, component.clone());
        Ok(())
    }

    async fn get_docker_service_by_infra(&self, infra_id: Uuid) -> Result<Option<DockerService>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .docker_services
            .values()
            .find(|c| c.infrastructure_id == infra_id)
            .cloned())
    }

    async fn set_docker_service_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let component = tables
            .docker_services
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("docker service", id))?;
        component.container_id = Some(container_id.to_string());
        Ok(())
    }

    async fn delete_docker_service(&self, id: Uuid) -> Result<()> {
        self.tables.lock().unwrap().docker_services.remove(&id);
        Ok(())
    }

    async fn create_postgres_cluster(&self, cluster: &PostgresCluster) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .postgres_clusters
            .insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn get_postgres_cluster(&self, id: Uuid) -> Result<Option<PostgresCluster>> {
        Ok(self.tables.lock().unwrap().postgres_clusters.get(&id).cloned())
    }

    async fn get_postgres_cluster_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<PostgresCluster>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .postgres_clusters
            .values()
            .find(|c| c.infrastructure_id == infra_id)
            .cloned())
    }

    async fn set_cluster_network(&self, id: Uuid, network_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let cluster = tables
            .postgres_clusters
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("postgres cluster", id))?;
        cluster.network_id = Some(network_id.to_string());
        Ok(())
    }

    async fn set_cluster_primary(&self, id: Uuid, primary: Option<Uuid>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let cluster = tables
            .postgres_clusters
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("postgres cluster", id))?;
        cluster.primary_node_id = primary;
        Ok(())
    }

    async fn delete_postgres_cluster(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.cluster_nodes.retain(|_, n| n.cluster_id != id);
        tables.postgres_clusters.remove(&id);
        Ok(())
    }

    async fn create_cluster_node(&self, node: &ClusterNode) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .cluster_nodes
            .insert(node.id, node.clone());
        Ok(())
    }

    async fn get_cluster_node(&self, id: Uuid) -> Result<Option<ClusterNode>> {
        Ok(self.tables.lock().unwrap().cluster_nodes.get(&id).cloned())
    }

    async fn list_cluster_nodes(&self, cluster_id: Uuid) -> Result<Vec<ClusterNode>> {
        let tables = self.tables.lock().unwrap();
        let mut nodes: Vec<ClusterNode> = tables
            .cluster_nodes
            .values()
            .filter(|n| n.cluster_id == cluster_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn update_node_role(&self, node_id: Uuid, role: NodeRole) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let node = tables
            .cluster_nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found("cluster node", node_id))?;
        node.role = role;
        Ok(())
    }

    async fn swap_primary(
        &self,
        cluster_id: Uuid,
        old_primary: Option<Uuid>,
        new_primary: Uuid,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();

        match tables.cluster_nodes.get(&new_primary) {
            Some(node) if node.cluster_id == cluster_id => {}
            _ => return Err(Self::not_found("cluster node", new_primary)),
        }

        // Demote every current primary so the at-most-one invariant holds
        // even if the stored old primary went stale.
        for node in tables.cluster_nodes.values_mut() {
            if node.cluster_id == cluster_id
                && node.role == NodeRole::Primary
                && node.id != new_primary
            {
                node.role = NodeRole::Replica;
            }
        }
        if let Some(old_id) = old_primary
            && let Some(node) = tables.cluster_nodes.get_mut(&old_id)
            && node.role == NodeRole::Primary
        {
            node.role = NodeRole::Replica;
        }

        if let Some(node) = tables.cluster_nodes.get_mut(&new_primary) {
            node.role = NodeRole::Primary;
        }
        let cluster = tables
            .postgres_clusters
            .get_mut(&cluster_id)
            .ok_or_else(|| Self::not_found("postgres cluster", cluster_id))?;
        cluster.primary_node_id = Some(new_primary);
        Ok(())
    }

    async fn update_node_health(&self, node_id: Uuid, healthy: bool) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let node = tables
            .cluster_nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found("cluster node", node_id))?;
        node.is_healthy = healthy;
        Ok(())
    }

    async fn update_node_health_by_container(
        &self,
        container_id: &str,
        healthy: bool,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(node) = tables
            .cluster_nodes
            .values_mut()
            .find(|n| n.container_id == container_id)
        {
            node.is_healthy = healthy;
        }
        if let Some(node) = tables
            .nginx_nodes
            .values_mut()
            .find(|n| n.container_id == container_id)
        {
            node.is_healthy = healthy;
        }
        Ok(())
    }

    async fn update_node_replication_lag(&self, node_id: Uuid, lag: Option<i64>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let node = tables
            .cluster_nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found("cluster node", node_id))?;
        node.replication_lag_bytes = lag;
        Ok(())
    }

    async fn delete_cluster_node(&self, node_id: Uuid) -> Result<()> {
        self.tables.lock().unwrap().cluster_nodes.remove(&node_id);
        Ok(())
    }

    async fn create_nginx_cluster(&self, cluster: &NginxCluster) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .nginx_clusters
            .insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn get_nginx_cluster(&self, id: Uuid) -> Result<Option<NginxCluster>> {
        Ok(self.tables.lock().unwrap().nginx_clusters.get(&id).cloned())
    }

    async fn get_nginx_cluster_by_infra(&self, infra_id: Uuid) -> Result<Option<NginxCluster>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .nginx_clusters
            .values()
            .find(|c| c.infrastructure_id == infra_id)
            .cloned())
    }

    async fn update_nginx_cluster_config(&self, id: Uuid, config: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let cluster = tables
            .nginx_clusters
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("nginx cluster", id))?;
        cluster.config = config.to_string();
        Ok(())
    }

    async fn delete_nginx_cluster(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.nginx_nodes.retain(|_, n| n.cluster_id != id);
        tables.nginx_clusters.remove(&id);
        Ok(())
    }

    async fn create_nginx_node(&self, node: &NginxNode) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .nginx_nodes
            .insert(node.id, node.clone());
        Ok(())
    }

    async fn get_nginx_node(&self, id: Uuid) -> Result<Option<NginxNode>> {
        Ok(self.tables.lock().unwrap().nginx_nodes.get(&id).cloned())
    }

    async fn list_nginx_nodes(&self, cluster_id: Uuid) -> Result<Vec<NginxNode>> {
        let tables = self.tables.lock().unwrap();
        let mut nodes: Vec<NginxNode> = tables
            .nginx_nodes
            .values()
            .filter(|n| n.cluster_id == cluster_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(nodes)
    }

    async fn update_nginx_node_role(
        &self,
        node_id: Uuid,
        role: NginxRole,
        priority: i32,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let node = tables
            .nginx_nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found("nginx node", node_id))?;
        node.role = role;
        node.priority = priority;
        Ok(())
    }

    async fn swap_nginx_master(
        &self,
        cluster_id: Uuid,
        old_master: Uuid,
        new_master: Uuid,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();

        match tables.nginx_nodes.get(&new_master) {
            Some(node) if node.cluster_id == cluster_id => {}
            _ => return Err(Self::not_found("nginx node", new_master)),
        }

        if let Some(node) = tables.nginx_nodes.get_mut(&old_master) {
            node.role = NginxRole::Backup;
            node.priority = 50;
        }
        if let Some(node) = tables.nginx_nodes.get_mut(&new_master) {
            node.role = NginxRole::Master;
            node.priority = 100;
        }
        Ok(())
    }

    async fn append_failover_event(&self, event: &FailoverEvent) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .failover_events
            .push(event.clone());
        Ok(())
    }

    async fn list_failover_events(&self, cluster_id: Uuid) -> Result<Vec<FailoverEvent>> {
        let tables = self.tables.lock().unwrap();
        let mut events: Vec<FailoverEvent> = tables
            .failover_events
            .iter()
            .filter(|e| e.cluster_id == cluster_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(events)
    }

    async fn create_stack(&self, stack: &Stack) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .stacks
            .insert(stack.id, stack.clone());
        Ok(())
    }

    async fn get_stack(&self, id: Uuid) -> Result<Option<Stack>> {
        Ok(self.tables.lock().unwrap().stacks.get(&id).cloned())
    }

    async fn list_stacks(&self, user_id: Option<&str>) -> Result<Vec<Stack>> {
        let tables = self.tables.lock().unwrap();
        let mut result: Vec<Stack> = tables
            .stacks
            .values()
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .cloned()
            .collect();
        result.sort_by_key(|s| s.created_at);
        Ok(result)
    }

    async fn update_stack_status(&self, id: Uuid, status: StackStatus) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let stack = tables
            .stacks
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("stack", id))?;
        stack.status = status;
        stack.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn create_stack_resource(&self, resource: &StackResource) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .stack_resources
            .push(resource.clone());
        Ok(())
    }

    async fn list_stack_resources(&self, stack_id: Uuid) -> Result<Vec<StackResource>> {
        let tables = self.tables.lock().unwrap();
        let mut resources: Vec<StackResource> = tables
            .stack_resources
            .iter()
            .filter(|r| r.stack_id == stack_id)
            .cloned()
            .collect();
        resources.sort_by_key(|r| r.position);
        Ok(resources)
    }

    async fn delete_stack_resources(&self, stack_id: Uuid) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .stack_resources
            .retain(|r| r.stack_id != stack_id);
        Ok(())
    }

    async fn create_stack_operation(&self, operation: &StackOperation) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .stack_operations
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn finish_stack_operation(
        &self,
        id: Uuid,
        status: StackOperationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let operation = tables
            .stack_operations
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("stack operation", id))?;
        operation.status = status;
        operation.error = error.map(|e| e.to_string());
        operation.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfraKind, PatroniTunables, ReplicationMode};

    fn cluster(infra_id: Uuid) -> PostgresCluster {
        PostgresCluster {
            id: Uuid::new_v4(),
            infrastructure_id: infra_id,
            name: "pg".into(),
            version: "17".into(),
            replication_mode: ReplicationMode::Async,
            namespace: "/iaas/".into(),
            superuser_password: "pw".into(),
            replication_password: "rpw".into(),
            cpu_limit: None,
            memory_limit_mb: None,
            write_port: 5000,
            read_port: 5001,
            stats_port: 7000,
            backup_retention: None,
            backup_concurrency: None,
            patroni: PatroniTunables::default(),
            primary_node_id: None,
            network_id: None,
        }
    }

    fn node(cluster_id: Uuid, name: &str, role: NodeRole) -> ClusterNode {
        ClusterNode {
            id: Uuid::new_v4(),
            cluster_id,
            name: name.into(),
            container_id: format!("ctr-{name}"),
            role,
            port: 5432,
            volume_id: None,
            backup_volume_id: None,
            is_healthy: true,
            replication_lag_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_swap_primary_keeps_single_primary() {
        let store = MemoryStore::new();
        let c = cluster(Uuid::new_v4());
        store.create_postgres_cluster(&c).await.unwrap();

        let n1 = node(c.id, "patroni-node-1", NodeRole::Primary);
        let n2 = node(c.id, "patroni-node-2", NodeRole::Replica);
        store.create_cluster_node(&n1).await.unwrap();
        store.create_cluster_node(&n2).await.unwrap();
        store.set_cluster_primary(c.id, Some(n1.id)).await.unwrap();

        store.swap_primary(c.id, Some(n1.id), n2.id).await.unwrap();

        let nodes = store.list_cluster_nodes(c.id).await.unwrap();
        let primaries: Vec<_> = nodes.iter().filter(|n| n.role == NodeRole::Primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].id, n2.id);

        let stored = store.get_postgres_cluster(c.id).await.unwrap().unwrap();
        assert_eq!(stored.primary_node_id, Some(n2.id));
    }

    #[tokio::test]
    async fn test_swap_primary_rejects_foreign_node() {
        let store = MemoryStore::new();
        let c = cluster(Uuid::new_v4());
        let other = cluster(Uuid::new_v4());
        store.create_postgres_cluster(&c).await.unwrap();
        store.create_postgres_cluster(&other).await.unwrap();

        let foreign = node(other.id, "patroni-node-1", NodeRole::Replica);
        store.create_cluster_node(&foreign).await.unwrap();

        assert!(store.swap_primary(c.id, None, foreign.id).await.is_err());
    }

    #[tokio::test]
    async fn test_find_infrastructure_by_cluster_node_container() {
        let store = MemoryStore::new();
        let infra = Infrastructure::new("pg", InfraKind::PostgresCluster, "u1");
        store.create_infrastructure(&infra).await.unwrap();

        let c = cluster(infra.id);
        store.create_postgres_cluster(&c).await.unwrap();
        let n = node(c.id, "patroni-node-1", NodeRole::Primary);
        store.create_cluster_node(&n).await.unwrap();

        let found = store
            .find_infrastructure_by_container(&n.container_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, infra.id);

        assert!(
            store
                .find_infrastructure_by_container("unmanaged")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_stack_resources_ordered_by_position() {
        let store = MemoryStore::new();
        let stack_id = Uuid::new_v4();
        for (name, position) in [("app", 2), ("db", 1), ("edge", 3)] {
            store
                .create_stack_resource(&StackResource {
                    id: Uuid::new_v4(),
                    stack_id,
                    name: name.into(),
                    resource_type: crate::model::ResourceType::DockerService,
                    role: None,
                    position,
                    depends_on: vec![],
                    infrastructure_id: None,
                })
                .await
                .unwrap();
        }

        let resources = store.list_stack_resources(stack_id).await.unwrap();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["db", "app", "edge"]);
    }

    #[tokio::test]
    async fn test_delete_cluster_removes_nodes() {
        let store = MemoryStore::new();
        let c = cluster(Uuid::new_v4());
        store.create_postgres_cluster(&c).await.unwrap();
        store
            .create_cluster_node(&node(c.id, "etcd-1", NodeRole::Etcd))
            .await
            .unwrap();

        store.delete_postgres_cluster(c.id).await.unwrap();
        assert!(store.list_cluster_nodes(c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nginx_nodes_ordered_by_priority() {
        let store = MemoryStore::new();
        let cluster_id = Uuid::new_v4();
        for (name, priority, role) in [
            ("web-nginx-2", 99, NginxRole::Backup),
            ("web-nginx-1", 100, NginxRole::Master),
            ("web-nginx-3", 98, NginxRole::Backup),
        ] {
            store
                .create_nginx_node(&NginxNode {
                    id: Uuid::new_v4(),
                    cluster_id,
                    name: name.into(),
                    container_id: format!("ctr-{name}"),
                    role,
                    priority,
                    http_port: 8080,
                    https_port: None,
                    is_healthy: true,
                })
                .await
                .unwrap();
        }

        let nodes = store.list_nginx_nodes(cluster_id).await.unwrap();
        let priorities: Vec<_> = nodes.iter().map(|n| n.priority).collect();
        assert_eq!(priorities, vec![100, 99, 98]);
    }
}
