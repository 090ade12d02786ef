// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL metadata store.
//!
//! Enum columns are stored as TEXT in the wire format of the model's
//! `as_str`/`parse` pair; nested structures (tunables, routing, env) are
//! stored as JSONB. Correlated writes go through transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    ClusterNode, DockerService, FailoverEvent, FailoverReason, InfraKind, InfraStatus,
    Infrastructure, LbAlgorithm, NginxCluster, NginxNode, NginxRole, NginxRouting, NginxSingle,
    NginxTunables, NodeRole, PatroniTunables, PostgresCluster, PostgresSingle, ReplicationMode,
    ResourceType, ServicePort, Stack, StackOperation, StackOperationStatus, StackResource,
    StackStatus, TriggeredBy,
};
use crate::store::MetadataStore;

/// Metadata store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bad_value(what: &str, raw: &str) -> Error {
    Error::DependencyFailed(format!("unknown {what} value in store: {raw}"))
}

// ----------------------------------------------------------------------
// Row types
// ----------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct InfraRow {
    id: Uuid,
    name: String,
    kind: String,
    user_id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InfraRow {
    fn into_model(self) -> Result<Infrastructure> {
        Ok(Infrastructure {
            id: self.id,
            name: self.name,
            kind: InfraKind::parse(&self.kind)
                .ok_or_else(|| bad_value("infrastructure kind", &self.kind))?,
            user_id: self.user_id,
            status: InfraStatus::parse(&self.status)
                .ok_or_else(|| bad_value("infrastructure status", &self.status))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const INFRA_COLUMNS: &str = "id, name, kind, user_id, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PostgresSingleRow {
    id: Uuid,
    infrastructure_id: Uuid,
    container_id: Option<String>,
    version: String,
    port: i32,
    database_name: String,
    username: String,
    password: String,
    volume_id: Option<String>,
}

impl PostgresSingleRow {
    fn into_model(self) -> PostgresSingle {
        PostgresSingle {
            id: self.id,
            infrastructure_id: self.infrastructure_id,
            container_id: self.container_id,
            version: self.version,
            port: self.port,
            database: self.database_name,
            username: self.username,
            password: self.password,
            volume_id: self.volume_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NginxSingleRow {
    id: Uuid,
    infrastructure_id: Uuid,
    container_id: Option<String>,
    http_port: i32,
    https_port: Option<i32>,
    config: Option<String>,
    routing: Json<NginxRouting>,
}

impl NginxSingleRow {
    fn into_model(self) -> NginxSingle {
        NginxSingle {
            id: self.id,
            infrastructure_id: self.infrastructure_id,
            container_id: self.container_id,
            http_port: self.http_port,
            https_port: self.https_port,
            config: self.config,
            routing: self.routing.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DockerServiceRow {
    id: Uuid,
    infrastructure_id: Uuid,
    container_id: Option<String>,
    image: String,
    env: Json<std::collections::BTreeMap<String, String>>,
    ports: Json<Vec<ServicePort>>,
    command: Option<Json<Vec<String>>>,
}

impl DockerServiceRow {
    fn into_model(self) -> DockerService {
        DockerService {
            id: self.id,
            infrastructure_id: self.infrastructure_id,
            container_id: self.container_id,
            image: self.image,
            env: self.env.0,
            ports: self.ports.0,
            command: self.command.map(|c| c.0),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostgresClusterRow {
    id: Uuid,
    infrastructure_id: Uuid,
    name: String,
    version: String,
    replication_mode: String,
    namespace: String,
    superuser_password: String,
    replication_password: String,
    cpu_limit: Option<f64>,
    memory_limit_mb: Option<i64>,
    write_port: i32,
    read_port: i32,
    stats_port: i32,
    backup_retention: Option<i32>,
    backup_concurrency: Option<i32>,
    patroni: Json<PatroniTunables>,
    primary_node_id: Option<Uuid>,
    network_id: Option<String>,
}

impl PostgresClusterRow {
    fn into_model(self) -> Result<PostgresCluster> {
        Ok(PostgresCluster {
            id: self.id,
            infrastructure_id: self.infrastructure_id,
            name: self.name,
            version: self.version,
            replication_mode: ReplicationMode::parse(&self.replication_mode)
                .ok_or_else(|| bad_value("replication mode", &self.replication_mode))?,
            namespace: self.namespace,
            superuser_password: self.superuser_password,
            replication_password: self.replication_password,
            cpu_limit: self.cpu_limit,
            memory_limit_mb: self.memory_limit_mb,
            write_port: self.write_port,
            read_port: self.read_port,
            stats_port: self.stats_port,
            backup_retention: self.backup_retention,
            backup_concurrency: self.backup_concurrency,
            patroni: self.patroni.0,
            primary_node_id: self.primary_node_id,
            network_id: self.network_id,
        })
    }
}

const CLUSTER_COLUMNS: &str = "id, infrastructure_id, name, version, replication_mode, namespace, \
     superuser_password, replication_password, cpu_limit, memory_limit_mb, write_port, read_port, \
     stats_port, backup_retention, backup_concurrency, patroni, primary_node_id, network_id";

#[derive(sqlx::FromRow)]
struct ClusterNodeRow {
    id: Uuid,
    cluster_id: Uuid,
    name: String,
    container_id: String,
    role: String,
    port: i32,
    volume_id: Option<String>,
    backup_volume_id: Option<String>,
    is_healthy: bool,
    replication_lag_bytes: Option<i64>,
}

impl ClusterNodeRow {
    fn into_model(self) -> Result<ClusterNode> {
        Ok(ClusterNode {
            id: self.id,
            cluster_id: self.cluster_id,
            name: self.name,
            container_id: self.container_id,
            role: NodeRole::parse(&self.role).ok_or_else(|| bad_value("node role", &self.role))?,
            port: self.port,
            volume_id: self.volume_id,
            backup_volume_id: self.backup_volume_id,
            is_healthy: self.is_healthy,
            replication_lag_bytes: self.replication_lag_bytes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NginxClusterRow {
    id: Uuid,
    infrastructure_id: Uuid,
    name: String,
    virtual_ip: Option<String>,
    http_port: i32,
    https_port: Option<i32>,
    algorithm: String,
    config: String,
    network_id: Option<String>,
    tunables: Json<NginxTunables>,
    routing: Json<NginxRouting>,
}

impl NginxClusterRow {
    fn into_model(self) -> Result<NginxCluster> {
        Ok(NginxCluster {
            id: self.id,
            infrastructure_id: self.infrastructure_id,
            name: self.name,
            virtual_ip: self.virtual_ip,
            http_port: self.http_port,
            https_port: self.https_port,
            algorithm: LbAlgorithm::parse(&self.algorithm)
                .ok_or_else(|| bad_value("lb algorithm", &self.algorithm))?,
            config: self.config,
            network_id: self.network_id,
            tunables: self.tunables.0,
            routing: self.routing.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NginxNodeRow {
    id: Uuid,
    cluster_id: Uuid,
    name: String,
    container_id: String,
    role: String,
    priority: i32,
    http_port: i32,
    https_port: Option<i32>,
    is_healthy: bool,
}

impl NginxNodeRow {
    fn into_model(self) -> Result<NginxNode> {
        Ok(NginxNode {
            id: self.id,
            cluster_id: self.cluster_id,
            name: self.name,
            container_id: self.container_id,
            role: NginxRole::parse(&self.role)
                .ok_or_else(|| bad_value("nginx role", &self.role))?,
            priority: self.priority,
            http_port: self.http_port,
            https_port: self.https_port,
            is_healthy: self.is_healthy,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FailoverEventRow {
    id: Uuid,
    cluster_id: Uuid,
    old_primary_id: Option<Uuid>,
    old_primary_name: String,
    new_primary_id: Uuid,
    new_primary_name: String,
    reason: String,
    triggered_by: String,
    occurred_at: DateTime<Utc>,
}

impl FailoverEventRow {
    fn into_model(self) -> Result<FailoverEvent> {
        Ok(FailoverEvent {
            id: self.id,
            cluster_id: self.cluster_id,
            old_primary_id: self.old_primary_id,
            old_primary_name: self.old_primary_name,
            new_primary_id: self.new_primary_id,
            new_primary_name: self.new_primary_name,
            reason: FailoverReason::parse(&self.reason)
                .ok_or_else(|| bad_value("failover reason", &self.reason))?,
            triggered_by: TriggeredBy::parse(&self.triggered_by)
                .ok_or_else(|| bad_value("triggered_by", &self.triggered_by))?,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StackRow {
    id: Uuid,
    name: String,
    environment: String,
    status: String,
    user_id: String,
    tags: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StackRow {
    fn into_model(self) -> Result<Stack> {
        Ok(Stack {
            id: self.id,
            name: self.name,
            environment: self.environment,
            status: StackStatus::parse(&self.status)
                .ok_or_else(|| bad_value("stack status", &self.status))?,
            user_id: self.user_id,
            tags: self.tags.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StackResourceRow {
    id: Uuid,
    stack_id: Uuid,
    name: String,
    resource_type: String,
    role: Option<String>,
    position: i32,
    depends_on: Json<Vec<String>>,
    infrastructure_id: Option<Uuid>,
}

impl StackResourceRow {
    fn into_model(self) -> Result<StackResource> {
        Ok(StackResource {
            id: self.id,
            stack_id: self.stack_id,
            name: self.name,
            resource_type: ResourceType::parse(&self.resource_type)
                .ok_or_else(|| bad_value("resource type", &self.resource_type))?,
            role: self.role,
            position: self.position,
            depends_on: self.depends_on.0,
            infrastructure_id: self.infrastructure_id,
        })
    }
}

// ----------------------------------------------------------------------
// Store implementation
// ----------------------------------------------------------------------

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn create_infrastructure(&self, infra: &Infrastructure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO infrastructures (id, name, kind, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(infra.id)
        .bind(&infra.name)
        .bind(infra.kind.as_str())
        .bind(&infra.user_id)
        .bind(infra.status.as_str())
        .bind(infra.created_at)
        .bind(infra.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_infrastructure(&self, id: Uuid) -> Result<Option<Infrastructure>> {
        let row = sqlx::query_as::<_, InfraRow>(&format!(
            "SELECT {INFRA_COLUMNS} FROM infrastructures WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InfraRow::into_model).transpose()
    }

    async fn list_infrastructures(&self, user_id: Option<&str>) -> Result<Vec<Infrastructure>> {
        let rows = sqlx::query_as::<_, InfraRow>(&format!(
            r#"
            SELECT {INFRA_COLUMNS} FROM infrastructures
            WHERE ($1::TEXT IS NULL OR user_id = $1)
            ORDER BY created_at
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InfraRow::into_model).collect()
    }

    async fn update_infrastructure_status(&self, id: Uuid, status: InfraStatus) -> Result<()> {
        sqlx::query("UPDATE infrastructures SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_infrastructure_by_container(
        &self,
        container_id: &str,
    ) -> Result<Option<Infrastructure>> {
        let row = sqlx::query_as::<_, InfraRow>(
            r#"
            SELECT i.id, i.name, i.kind, i.user_id, i.status, i.created_at, i.updated_at
            FROM infrastructures i
            JOIN postgres_singles c ON c.infrastructure_id = i.id
            WHERE c.container_id = $1
            UNION ALL
            SELECT i.id, i.name, i.kind, i.user_id, i.status, i.created_at, i.updated_at
            FROM infrastructures i
            JOIN nginx_singles c ON c.infrastructure_id = i.id
            WHERE c.container_id = $1
            UNION ALL
            SELECT i.id, i.name, i.kind, i.user_id, i.status, i.created_at, i.updated_at
            FROM infrastructures i
            JOIN docker_services c ON c.infrastructure_id = i.id
            WHERE c.container_id = $1
            UNION ALL
            SELECT i.id, i.name, i.kind, i.user_id, i.status, i.created_at, i.updated_at
            FROM infrastructures i
            JOIN postgres_clusters pc ON pc.infrastructure_id = i.id
            JOIN cluster_nodes n ON n.cluster_id = pc.id
            WHERE n.container_id = $1
            UNION ALL
            SELECT i.id, i.name, i.kind, i.user_id, i.status, i.created_at, i.updated_at
            FROM infrastructures i
            JOIN nginx_clusters nc ON nc.infrastructure_id = i.id
            JOIN nginx_nodes n ON n.cluster_id = nc.id
            WHERE n.container_id = $1
            LIMIT 1
            "#,
        )
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InfraRow::into_model).transpose()
    }

    async fn create_postgres_single(&self, component: &PostgresSingle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO postgres_singles
                (id, infrastructure_id, container_id, version, port, database_name,
                 username, password, volume_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(component.id)
        .bind(component.infrastructure_id)
        .bind(&component.container_id)
        .bind(&component.version)
        .bind(component.port)
        .bind(&component.database)
        .bind(&component.username)
        .bind(&component.password)
        .bind(&component.volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_postgres_single_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<PostgresSingle>> {
        let row = sqlx::query_as::<_, PostgresSingleRow>(
            "SELECT * FROM postgres_singles WHERE infrastructure_id = $1",
        )
        .bind(infra_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PostgresSingleRow::into_model))
    }

    async fn set_postgres_single_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        sqlx::query("UPDATE postgres_singles SET container_id = $2 WHERE id = $1")
            .bind(id)
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_postgres_single(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM postgres_singles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_nginx_single(&self, component: &NginxSingle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nginx_singles
                (id, infrastructure_id, container_id, http_port, https_port, config, routing)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(component.id)
        .bind(component.infrastructure_id)
        .bind(&component.container_id)
        .bind(component.http_port)
        .bind(component.https_port)
        .bind(&component.config)
        .bind(Json(&component.routing))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_nginx_single_by_infra(&self, infra_id: Uuid) -> Result<Option<NginxSingle>> {
        let row = sqlx::query_as::<_, NginxSingleRow>(
            "SELECT * FROM nginx_singles WHERE infrastructure_id = $1",
        )
        .bind(infra_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(NginxSingleRow::into_model))
    }

    async fn set_nginx_single_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        sqlx::query("UPDATE nginx_singles SET container_id = $2 WHERE id = $1")
            .bind(id)
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_nginx_single_config(
        &self,
        id: Uuid,
        config: &str,
        routing: &NginxRouting,
    ) -> Result<()> {
        sqlx::query("UPDATE nginx_singles SET config = $2, routing = $3 WHERE id = $1")
            .bind(id)
            .bind(config)
            .bind(Json(routing))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_nginx_single(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM nginx_singles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_docker_service(&self, component: &DockerService) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO docker_services
                (id, infrastructure_id, container_id, image, env, ports, command)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(component.id)
        .bind(component.infrastructure_id)
        .bind(&component.container_id)
        .bind(&component.image)
        .bind(Json(&component.env))
        .bind(Json(&component.ports))
        .bind(component.command.as_ref().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_docker_service_by_infra(&self, infra_id: Uuid) -> Result<Option<DockerService>> {
        let row = sqlx::query_as::<_, DockerServiceRow>(
            "SELECT * FROM docker_services WHERE infrastructure_id = $1",
        )
        .bind(infra_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DockerServiceRow::into_model))
    }

    async fn set_docker_service_container(&self, id: Uuid, container_id: &str) -> Result<()> {
        sqlx::query("UPDATE docker_services SET container_id = $2 WHERE id = $1")
            .bind(id)
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_docker_service(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM docker_services WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_postgres_cluster(&self, cluster: &PostgresCluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO postgres_clusters
                (id, infrastructure_id, name, version, replication_mode, namespace,
                 superuser_password, replication_password, cpu_limit, memory_limit_mb,
                 write_port, read_port, stats_port, backup_retention, backup_concurrency,
                 patroni, primary_node_id, network_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(cluster.id)
        .bind(cluster.infrastructure_id)
        .bind(&cluster.name)
        .bind(&cluster.version)
        .bind(cluster.replication_mode.as_str())
        .bind(&cluster.namespace)
        .bind(&cluster.superuser_password)
        .bind(&cluster.replication_password)
        .bind(cluster.cpu_limit)
        .bind(cluster.memory_limit_mb)
        .bind(cluster.write_port)
        .bind(cluster.read_port)
        .bind(cluster.stats_port)
        .bind(cluster.backup_retention)
        .bind(cluster.backup_concurrency)
        .bind(Json(&cluster.patroni))
        .bind(cluster.primary_node_id)
        .bind(&cluster.network_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_postgres_cluster(&self, id: Uuid) -> Result<Option<PostgresCluster>> {
        let row = sqlx::query_as::<_, PostgresClusterRow>(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM postgres_clusters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PostgresClusterRow::into_model).transpose()
    }

    async fn get_postgres_cluster_by_infra(
        &self,
        infra_id: Uuid,
    ) -> Result<Option<PostgresCluster>> {
        let row = sqlx::query_as::<_, PostgresClusterRow>(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM postgres_clusters WHERE infrastructure_id = $1"
        ))
        .bind(infra_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PostgresClusterRow::into_model).transpose()
    }

    async fn set_cluster_network(&self, id: Uuid, network_id: &str) -> Result<()> {
        sqlx::query("UPDATE postgres_clusters SET network_id = $2 WHERE id = $1")
            .bind(id)
            .bind(network_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_cluster_primary(&self, id: Uuid, primary: Option<Uuid>) -> Result<()> {
        sqlx::query("UPDATE postgres_clusters SET primary_node_id = $2 WHERE id = $1")
            .bind(id)
            .bind(primary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_postgres_cluster(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cluster_nodes WHERE cluster_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM postgres_clusters WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(cluster_id = %id, "deleted postgres cluster and nodes");
        Ok(())
    }

    async fn create_cluster_node(&self, node: &ClusterNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_nodes
                (id, cluster_id, name, container_id, role, port, volume_id,
                 backup_volume_id, is_healthy, replication_lag_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(node.id)
        .bind(node.cluster_id)
        .bind(&node.name)
        .bind(&node.container_id)
        .bind(node.role.as_str())
        .bind(node.port)
        .bind(&node.volume_id)
        .bind(&node.backup_volume_id)
        .bind(node.is_healthy)
        .bind(node.replication_lag_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cluster_node(&self, id: Uuid) -> Result<Option<ClusterNode>> {
        let row =
            sqlx::query_as::<_, ClusterNodeRow>("SELECT * FROM cluster_nodes WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ClusterNodeRow::into_model).transpose()
    }

    async fn list_cluster_nodes(&self, cluster_id: Uuid) -> Result<Vec<ClusterNode>> {
        let rows = sqlx::query_as::<_, ClusterNodeRow>(
            "SELECT * FROM cluster_nodes WHERE cluster_id = $1 ORDER BY name",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ClusterNodeRow::into_model).collect()
    }

    async fn update_node_role(&self, node_id: Uuid, role: NodeRole) -> Result<()> {
        sqlx::query("UPDATE cluster_nodes SET role = $2 WHERE id = $1")
            .bind(node_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn swap_primary(
        &self,
        cluster_id: Uuid,
        _old_primary: Option<Uuid>,
        new_primary: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Demote everything first so the at-most-one-primary invariant
        // holds even when the stored primary went stale.
        sqlx::query(
            "UPDATE cluster_nodes SET role = 'replica' \
             WHERE cluster_id = $1 AND role = 'primary' AND id <> $2",
        )
        .bind(cluster_id)
        .bind(new_primary)
        .execute(&mut *tx)
        .await?;

        let promoted = sqlx::query(
            "UPDATE cluster_nodes SET role = 'primary' WHERE id = $1 AND cluster_id = $2",
        )
        .bind(new_primary)
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?;
        if promoted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("cluster node {new_primary}")));
        }

        sqlx::query("UPDATE postgres_clusters SET primary_node_id = $2 WHERE id = $1")
            .bind(cluster_id)
            .bind(new_primary)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            cluster_id = %cluster_id,
            new_primary = %new_primary,
            "swapped primary role"
        );
        Ok(())
    }

    async fn update_node_health(&self, node_id: Uuid, healthy: bool) -> Result<()> {
        sqlx::query("UPDATE cluster_nodes SET is_healthy = $2 WHERE id = $1")
            .bind(node_id)
            .bind(healthy)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_node_health_by_container(
        &self,
        container_id: &str,
        healthy: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE cluster_nodes SET is_healthy = $2 WHERE container_id = $1")
            .bind(container_id)
            .bind(healthy)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE nginx_nodes SET is_healthy = $2 WHERE container_id = $1")
            .bind(container_id)
            .bind(healthy)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_node_replication_lag(&self, node_id: Uuid, lag: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE cluster_nodes SET replication_lag_bytes = $2 WHERE id = $1")
            .bind(node_id)
            .bind(lag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_cluster_node(&self, node_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cluster_nodes WHERE id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_nginx_cluster(&self, cluster: &NginxCluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nginx_clusters
                (id, infrastructure_id, name, virtual_ip, http_port, https_port,
                 algorithm, config, network_id, tunables, routing)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(cluster.id)
        .bind(cluster.infrastructure_id)
        .bind(&cluster.name)
        .bind(&cluster.virtual_ip)
        .bind(cluster.http_port)
        .bind(cluster.https_port)
        .bind(cluster.algorithm.as_str())
        .bind(&cluster.config)
        .bind(&cluster.network_id)
        .bind(Json(&cluster.tunables))
        .bind(Json(&cluster.routing))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_nginx_cluster(&self, id: Uuid) -> Result<Option<NginxCluster>> {
        let row = sqlx::query_as::<_, NginxClusterRow>(
            "SELECT * FROM nginx_clusters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(NginxClusterRow::into_model).transpose()
    }

    async fn get_nginx_cluster_by_infra(&self, infra_id: Uuid) -> Result<Option<NginxCluster>> {
        let row = sqlx::query_as::<_, NginxClusterRow>(
            "SELECT * FROM nginx_clusters WHERE infrastructure_id = $1",
        )
        .bind(infra_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(NginxClusterRow::into_model).transpose()
    }

    async fn update_nginx_cluster_config(&self, id: Uuid, config: &str) -> Result<()> {
        sqlx::query("UPDATE nginx_clusters SET config = $2 WHERE id = $1")
            .bind(id)
            .bind(config)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_nginx_cluster(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM nginx_nodes WHERE cluster_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nginx_clusters WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_nginx_node(&self, node: &NginxNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nginx_nodes
                (id, cluster_id, name, container_id, role, priority,
                 http_port, https_port, is_healthy)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(node.id)
        .bind(node.cluster_id)
        .bind(&node.name)
        .bind(&node.container_id)
        .bind(node.role.as_str())
        .bind(node.priority)
        .bind(node.http_port)
        .bind(node.https_port)
        .bind(node.is_healthy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_nginx_node(&self, id: Uuid) -> Result<Option<NginxNode>> {
        let row = sqlx::query_as::<_, NginxNodeRow>("SELECT * FROM nginx_nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(NginxNodeRow::into_model).transpose()
    }

    async fn list_nginx_nodes(&self, cluster_id: Uuid) -> Result<Vec<NginxNode>> {
        let rows = sqlx::query_as::<_, NginxNodeRow>(
            "SELECT * FROM nginx_nodes WHERE cluster_id = $1 ORDER BY priority DESC",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NginxNodeRow::into_model).collect()
    }

    async fn update_nginx_node_role(
        &self,
        node_id: Uuid,
        role: NginxRole,
        priority: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE nginx_nodes SET role = $2, priority = $3 WHERE id = $1")
            .bind(node_id)
            .bind(role.as_str())
            .bind(priority)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn swap_nginx_master(
        &self,
        cluster_id: Uuid,
        old_master: Uuid,
        new_master: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let promoted = sqlx::query(
            "UPDATE nginx_nodes SET role = 'master', priority = 100 \
             WHERE id = $1 AND cluster_id = $2",
        )
        .bind(new_master)
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?;
        if promoted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("nginx node {new_master}")));
        }

        sqlx::query(
            "UPDATE nginx_nodes SET role = 'backup', priority = 50 \
             WHERE id = $1 AND cluster_id = $2",
        )
        .bind(old_master)
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_failover_event(&self, event: &FailoverEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO failover_events
                (id, cluster_id, old_primary_id, old_primary_name, new_primary_id,
                 new_primary_name, reason, triggered_by, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.cluster_id)
        .bind(event.old_primary_id)
        .bind(&event.old_primary_name)
        .bind(event.new_primary_id)
        .bind(&event.new_primary_name)
        .bind(event.reason.as_str())
        .bind(event.triggered_by.as_str())
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_failover_events(&self, cluster_id: Uuid) -> Result<Vec<FailoverEvent>> {
        let rows = sqlx::query_as::<_, FailoverEventRow>(
            "SELECT * FROM failover_events WHERE cluster_id = $1 ORDER BY occurred_at DESC",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FailoverEventRow::into_model).collect()
    }

    async fn create_stack(&self, stack: &Stack) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stacks (id, name, environment, status, user_id, tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stack.id)
        .bind(&stack.name)
        .bind(&stack.environment)
        .bind(stack.status.as_str())
        .bind(&stack.user_id)
        .bind(Json(&stack.tags))
        .bind(stack.created_at)
        .bind(stack.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stack(&self, id: Uuid) -> Result<Option<Stack>> {
        let row = sqlx::query_as::<_, StackRow>("SELECT * FROM stacks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StackRow::into_model).transpose()
    }

    async fn list_stacks(&self, user_id: Option<&str>) -> Result<Vec<Stack>> {
        let rows = sqlx::query_as::<_, StackRow>(
            r#"
            SELECT * FROM stacks
            WHERE ($1::TEXT IS NULL OR user_id = $1)
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StackRow::into_model).collect()
    }

    async fn update_stack_status(&self, id: Uuid, status: StackStatus) -> Result<()> {
        sqlx::query("UPDATE stacks SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_stack_resource(&self, resource: &StackResource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stack_resources
                (id, stack_id, name, resource_type, role, position, depends_on, infrastructure_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(resource.id)
        .bind(resource.stack_id)
        .bind(&resource.name)
        .bind(resource.resource_type.as_str())
        .bind(&resource.role)
        .bind(resource.position)
        .bind(Json(&resource.depends_on))
        .bind(resource.infrastructure_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_stack_resources(&self, stack_id: Uuid) -> Result<Vec<StackResource>> {
        let rows = sqlx::query_as::<_, StackResourceRow>(
            "SELECT * FROM stack_resources WHERE stack_id = $1 ORDER BY position",
        )
        .bind(stack_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StackResourceRow::into_model).collect()
    }

    async fn delete_stack_resources(&self, stack_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stack_resources WHERE stack_id = $1")
            .bind(stack_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_stack_operation(&self, operation: &StackOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stack_operations (id, stack_id, kind, status, error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(operation.id)
        .bind(operation.stack_id)
        .bind(operation.kind.as_str())
        .bind(operation.status.as_str())
        .bind(&operation.error)
        .bind(operation.started_at)
        .bind(operation.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_stack_operation(
        &self,
        id: Uuid,
        status: StackOperationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE stack_operations SET status = $2, error = $3, finished_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Error::from)
    }
}
