// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL HA cluster engine.
//!
//! Builds a Patroni cluster in three ordered stages: a fixed three-node
//! etcd quorum, N Patroni-wrapped PostgreSQL nodes, and one HAProxy front.
//! Stage ordering is enforced with wall-clock waits injected through
//! [`ClusterTimings`] so replicas never race the primary's initialisation.
//!
//! The metadata role column is a hint. Any operation that must target the
//! current primary probes Patroni's REST endpoint on each node and trusts
//! the JSON `role` field; metadata is updated opportunistically when the
//! two disagree.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use iaas_core::cache::{self, ClusterCache};
use iaas_core::error::{Error, Result};
use iaas_core::model::{
    ClusterNode, FailoverEvent, FailoverReason, InfraKind, InfraStatus, Infrastructure,
    NodeRole, PatroniTunables, PostgresCluster, ReplicationMode, TriggeredBy,
};
use iaas_runtime::{ContainerSpec, RuntimeError};

use crate::context::Ctx;
use crate::services::{ServiceDeps, container_name, network_name, publish_lifecycle, volume_name};

/// Fixed etcd quorum size.
const ETCD_NODES: u32 = 3;
/// Cap on Patroni nodes per cluster.
const MAX_PATRONI_NODES: usize = 10;
/// Offset between a node's host PostgreSQL port and its Patroni API port.
const API_PORT_OFFSET: i32 = 1000;

const ETCD_IMAGE: &str = "quay.io/coreos/etcd:v3.5.16";
const HAPROXY_IMAGE: &str = "haproxy:2.9";

fn patroni_image(version: &str) -> String {
    format!("iaas/patroni:{version}")
}

/// Wall-clock waits between provisioning stages.
///
/// These are lower bounds on readiness, not timeouts: etcd must elect a
/// leader before Patroni starts, and the primary must finish initdb before
/// replicas clone from it. Tests zero them out.
#[derive(Debug, Clone)]
pub struct ClusterTimings {
    /// Wait after launching the etcd quorum.
    pub etcd_quorum: Duration,
    /// Wait between etcd node launches.
    pub etcd_node_gap: Duration,
    /// Wait after the first Patroni node.
    pub primary_ready: Duration,
    /// Wait between subsequent Patroni nodes.
    pub replica_gap: Duration,
    /// Wait between stages when starting a stopped cluster.
    pub stage_gap: Duration,
    /// Wait between the replication-test insert and the probes.
    pub replication_probe: Duration,
}

impl Default for ClusterTimings {
    fn default() -> Self {
        Self {
            etcd_quorum: Duration::from_secs(15),
            etcd_node_gap: Duration::from_secs(3),
            primary_ready: Duration::from_secs(20),
            replica_gap: Duration::from_secs(15),
            stage_gap: Duration::from_secs(5),
            replication_probe: Duration::from_secs(1),
        }
    }
}

impl ClusterTimings {
    /// All-zero timings for tests.
    pub fn zero() -> Self {
        Self {
            etcd_quorum: Duration::ZERO,
            etcd_node_gap: Duration::ZERO,
            primary_ready: Duration::ZERO,
            replica_gap: Duration::ZERO,
            stage_gap: Duration::ZERO,
            replication_probe: Duration::ZERO,
        }
    }
}

/// Request to create an HA cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterRequest {
    /// Cluster name (Patroni scope).
    pub name: String,
    /// Patroni node count; defaults to 2.
    #[serde(default)]
    pub node_count: Option<u32>,
    /// PostgreSQL major version; defaults to 17.
    #[serde(default)]
    pub postgres_version: Option<String>,
    /// Superuser password.
    pub postgres_password: String,
    /// Replication mode; defaults to async.
    #[serde(default)]
    pub replication_mode: Option<ReplicationMode>,
    /// Patroni namespace; defaults to `/iaas/`.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Per-node CPU cap.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Per-node memory cap in megabytes.
    #[serde(default)]
    pub memory_limit_mb: Option<i64>,
    /// HAProxy write port; defaults to 5000.
    #[serde(default)]
    pub write_port: Option<i32>,
    /// HAProxy read port; defaults to 5001.
    #[serde(default)]
    pub read_port: Option<i32>,
    /// HAProxy stats port; defaults to 7000.
    #[serde(default)]
    pub stats_port: Option<i32>,
    /// Host port of the first Patroni node's 5432; defaults to 15432.
    #[serde(default)]
    pub node_port_base: Option<i32>,
    /// Enable pgBackRest backups.
    #[serde(default)]
    pub backup_enabled: bool,
    /// Full-backup retention; defaults to 7 when backups are enabled.
    #[serde(default)]
    pub backup_retention: Option<i32>,
    /// pgBackRest process concurrency; defaults to 2 when enabled.
    #[serde(default)]
    pub backup_concurrency: Option<i32>,
    /// Patroni tunables.
    #[serde(default)]
    pub patroni: Option<PatroniTunables>,
}

/// Request to add a replica.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddNodeRequest {
    /// Node name; defaults to the next `patroni-node-<i>`.
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Request to trigger a backup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupRequest {
    /// `full` (default) or `incr`.
    #[serde(default)]
    pub backup_type: Option<String>,
}

/// Caller-facing view of a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNodeView {
    /// Node id.
    pub id: Uuid,
    /// Node name.
    pub name: String,
    /// Role inside the cluster.
    pub role: NodeRole,
    /// Advertised host port.
    pub port: i32,
    /// Health flag.
    pub is_healthy: bool,
    /// Replication lag in bytes, for replicas.
    pub replication_lag_bytes: Option<i64>,
}

/// Cluster endpoints fronted by HAProxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEndpoints {
    /// Write endpoint (routes to the primary).
    pub write: String,
    /// Read endpoint (balances over replicas).
    pub read: String,
    /// HAProxy stats endpoint.
    pub stats: String,
}

/// Caller-facing view of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Infrastructure id.
    pub infrastructure_id: Uuid,
    /// Cluster name.
    pub name: String,
    /// Lifecycle status.
    pub status: InfraStatus,
    /// PostgreSQL version.
    pub version: String,
    /// Replication mode.
    pub replication_mode: ReplicationMode,
    /// Endpoints.
    pub endpoints: ClusterEndpoints,
    /// Current primary node, when known.
    pub primary_node_id: Option<Uuid>,
    /// All nodes: etcd, patroni, haproxy.
    pub nodes: Vec<ClusterNodeView>,
    /// Number of Patroni-managed database nodes.
    pub patroni_node_count: usize,
}

/// One node's row in the stats view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    /// Node name.
    pub name: String,
    /// Role inside the cluster.
    pub role: NodeRole,
    /// Whether the container is running.
    pub running: bool,
    /// Replication lag in bytes, for replicas.
    pub replication_lag_bytes: Option<i64>,
}

/// Cluster stats view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatsView {
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Per-node stats.
    pub nodes: Vec<NodeStats>,
}

/// One replica's replication state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaStatus {
    /// Replica name.
    pub name: String,
    /// `pg_stat_replication.state`.
    pub state: String,
    /// `pg_stat_replication.sync_state`.
    pub sync_state: String,
    /// Lag in bytes behind the primary.
    pub lag_bytes: Option<i64>,
}

/// Replication status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatusView {
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Current primary node name.
    pub primary: String,
    /// Replication mode.
    pub mode: ReplicationMode,
    /// Per-replica state.
    pub replicas: Vec<ReplicaStatus>,
}

/// One node's result in the live replication test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTestNode {
    /// Node name.
    pub name: String,
    /// Role at test time.
    pub role: NodeRole,
    /// Whether the probe row was visible.
    pub has_data: bool,
    /// Observed row count.
    pub row_count: i64,
}

/// Result of the live replication test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTestView {
    /// The probe payload that was inserted.
    pub payload: String,
    /// True when every node saw exactly one probe row.
    pub all_synced: bool,
    /// Per-node results.
    pub nodes: Vec<ReplicationTestNode>,
}

/// Extract the numeric suffix of a node name (`patroni-node-4` → 4).
fn node_index(name: &str) -> u32 {
    name.rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn node_view(node: &ClusterNode) -> ClusterNodeView {
    ClusterNodeView {
        id: node.id,
        name: node.name.clone(),
        role: node.role,
        port: node.port,
        is_healthy: node.is_healthy,
        replication_lag_bytes: node.replication_lag_bytes,
    }
}

/// The Patroni/etcd/HAProxy cluster engine.
pub struct PostgresClusterService {
    deps: ServiceDeps,
    timings: ClusterTimings,
}

impl PostgresClusterService {
    /// Create the engine over shared dependencies.
    pub fn new(deps: ServiceDeps, timings: ClusterTimings) -> Self {
        Self { deps, timings }
    }

    // ==================================================================
    // Create
    // ==================================================================

    /// Create an HA cluster: etcd quorum, Patroni nodes, HAProxy.
    ///
    /// A failed create marks the infrastructure failed and retains every
    /// partially created artefact; delete reclaims them.
    pub async fn create(&self, ctx: &Ctx, req: CreateClusterRequest) -> Result<ClusterView> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        if req.postgres_password.is_empty() {
            return Err(Error::InvalidInput("postgres_password must not be empty".into()));
        }
        let node_count = req.node_count.unwrap_or(2) as usize;
        if node_count == 0 || node_count > MAX_PATRONI_NODES {
            return Err(Error::InvalidInput(format!(
                "node_count must be between 1 and {MAX_PATRONI_NODES}"
            )));
        }

        let infra = Infrastructure::new(&req.name, InfraKind::PostgresCluster, &ctx.user_id);
        let cluster = PostgresCluster {
            id: Uuid::new_v4(),
            infrastructure_id: infra.id,
            name: req.name.clone(),
            version: req.postgres_version.unwrap_or_else(|| "17".to_string()),
            replication_mode: req.replication_mode.unwrap_or(ReplicationMode::Async),
            namespace: req.namespace.unwrap_or_else(|| "/iaas/".to_string()),
            superuser_password: req.postgres_password.clone(),
            replication_password: format!("repl-{}", Uuid::new_v4()),
            cpu_limit: req.cpu_limit,
            memory_limit_mb: req.memory_limit_mb,
            write_port: req.write_port.unwrap_or(5000),
            read_port: req.read_port.unwrap_or(5001),
            stats_port: req.stats_port.unwrap_or(7000),
            backup_retention: req
                .backup_enabled
                .then(|| req.backup_retention.unwrap_or(7)),
            backup_concurrency: req
                .backup_enabled
                .then(|| req.backup_concurrency.unwrap_or(2)),
            patroni: req.patroni.unwrap_or_default(),
            primary_node_id: None,
            network_id: None,
        };

        self.deps.store.create_infrastructure(&infra).await?;
        self.deps.store.create_postgres_cluster(&cluster).await?;

        let node_port_base = req.node_port_base.unwrap_or(15432);
        match self
            .provision(ctx, &cluster, node_count, node_port_base)
            .await
        {
            Ok(primary_node_id) => {
                self.deps
                    .store
                    .set_cluster_primary(cluster.id, Some(primary_node_id))
                    .await?;
                let mut cluster = cluster;
                cluster.primary_node_id = Some(primary_node_id);
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Running)
                    .await?;

                let mut infra = infra;
                infra.status = InfraStatus::Running;
                publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Running, "created")
                    .await;

                info!(cluster_id = %cluster.id, nodes = node_count, "postgres cluster created");
                self.deps.cache.invalidate_cluster(cluster.id);
                self.build_view(&infra, &cluster).await
            }
            Err(e) => {
                // Artefacts stay for operator inspection; delete reclaims them.
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Failed)
                    .await?;
                Err(e.in_step(format!("create cluster {}", req.name)))
            }
        }
    }

    async fn provision(
        &self,
        ctx: &Ctx,
        cluster: &PostgresCluster,
        node_count: usize,
        node_port_base: i32,
    ) -> Result<Uuid> {
        let network = network_name(cluster.id);
        self.deps.runtime.create_network(&network).await?;
        self.deps
            .store
            .set_cluster_network(cluster.id, &network)
            .await?;

        // Stage 1 - etcd quorum.
        self.launch_etcd_quorum(ctx, cluster, &network).await?;
        sleep(self.timings.etcd_quorum).await;

        // Stage 2 - Patroni nodes, primary first.
        let mut primary_node_id = None;
        for i in 1..=node_count as u32 {
            ctx.check_cancelled()?;
            let node = self
                .launch_patroni_node(
                    cluster,
                    &network,
                    i,
                    node_port_base + (i as i32 - 1),
                    i == 1,
                    false,
                )
                .await
                .map_err(|e| e.in_step(format!("create patroni node {i}")))?;
            if i == 1 {
                primary_node_id = Some(node.id);
                sleep(self.timings.primary_ready).await;
            } else {
                sleep(self.timings.replica_gap).await;
            }
        }

        // Stage 3 - HAProxy.
        ctx.check_cancelled()?;
        self.launch_haproxy(cluster, &network, node_count)
            .await
            .map_err(|e| e.in_step("create haproxy"))?;

        Ok(primary_node_id.expect("at least one patroni node"))
    }

    async fn launch_etcd_quorum(
        &self,
        ctx: &Ctx,
        cluster: &PostgresCluster,
        network: &str,
    ) -> Result<()> {
        let initial_cluster = (1..=ETCD_NODES)
            .map(|i| format!("etcd-{i}=http://etcd-{i}:2380"))
            .collect::<Vec<_>>()
            .join(",");

        for i in 1..=ETCD_NODES {
            ctx.check_cancelled()?;
            let name = format!("etcd-{i}");
            let volume = volume_name("pgcluster", cluster.id, &format!("{name}-data"));
            self.deps
                .runtime
                .create_volume(&volume)
                .await
                .map_err(|e| Error::from(e).in_step(format!("create etcd volume {i}")))?;

            let spec = ContainerSpec::new(
                container_name("pgcluster", cluster.id, Some(&name)),
                ETCD_IMAGE,
            )
            .env("ETCD_NAME", &name)
            .env("ETCD_INITIAL_CLUSTER_TOKEN", format!("etcd-{}", cluster.id))
            .env("ETCD_INITIAL_CLUSTER", &initial_cluster)
            .env("ETCD_INITIAL_CLUSTER_STATE", "new")
            .env(
                "ETCD_INITIAL_ADVERTISE_PEER_URLS",
                format!("http://{name}:2380"),
            )
            .env("ETCD_LISTEN_PEER_URLS", "http://0.0.0.0:2380")
            .env("ETCD_ADVERTISE_CLIENT_URLS", format!("http://{name}:2379"))
            .env("ETCD_LISTEN_CLIENT_URLS", "http://0.0.0.0:2379")
            .env("ETCD_DATA_DIR", "/etcd-data")
            .volume(&volume, "/etcd-data")
            .network(network, Some(name.clone()));

            let container_id = self
                .deps
                .runtime
                .create_container(&spec)
                .await
                .map_err(|e| Error::from(e).in_step(format!("create etcd node {i}")))?;

            self.deps
                .store
                .create_cluster_node(&ClusterNode {
                    id: Uuid::new_v4(),
                    cluster_id: cluster.id,
                    name: name.clone(),
                    container_id: container_id.clone(),
                    role: NodeRole::Etcd,
                    port: 2379,
                    volume_id: Some(volume),
                    backup_volume_id: None,
                    is_healthy: true,
                    replication_lag_bytes: None,
                })
                .await?;

            self.deps
                .runtime
                .start_container(&container_id)
                .await
                .map_err(|e| Error::from(e).in_step(format!("start etcd node {i}")))?;

            if i < ETCD_NODES {
                sleep(self.timings.etcd_node_gap).await;
            }
        }
        Ok(())
    }

    async fn launch_patroni_node(
        &self,
        cluster: &PostgresCluster,
        network: &str,
        index: u32,
        pg_host_port: i32,
        is_leader: bool,
        clonefrom: bool,
    ) -> Result<ClusterNode> {
        let name = format!("patroni-node-{index}");
        let data_volume = volume_name("pgcluster", cluster.id, &format!("{name}-data"));
        let backup_volume = volume_name("pgcluster", cluster.id, &format!("{name}-backups"));
        self.deps.runtime.create_volume(&data_volume).await?;
        self.deps.runtime.create_volume(&backup_volume).await?;

        let synchronous = cluster.replication_mode == ReplicationMode::Sync;
        let tunables = &cluster.patroni;

        let mut spec = ContainerSpec::new(
            container_name("pgcluster", cluster.id, Some(&name)),
            patroni_image(&cluster.version),
        )
        .env("PATRONI_SCOPE", &cluster.name)
        .env("PATRONI_NAMESPACE", &cluster.namespace)
        .env("PATRONI_NAME", &name)
        .env("PATRONI_ETCD3_HOSTS", "etcd-1:2379")
        .env("PATRONI_SUPERUSER_USERNAME", "postgres")
        .env("PATRONI_SUPERUSER_PASSWORD", &cluster.superuser_password)
        .env("PATRONI_REPLICATION_USERNAME", "replicator")
        .env("PATRONI_REPLICATION_PASSWORD", &cluster.replication_password)
        .env(
            "PATRONI_POSTGRESQL_MAX_CONNECTIONS",
            tunables.max_connections.to_string(),
        )
        .env("PATRONI_POSTGRESQL_SHARED_BUFFERS", &tunables.shared_buffers)
        .env(
            "PATRONI_POSTGRESQL_SYNCHRONOUS_COMMIT",
            if synchronous { "on" } else { "local" },
        )
        .env("PATRONI_WATCHDOG_MODE", &tunables.watchdog_mode)
        .env("PATRONI_TAGS_NOFAILOVER", tunables.nofailover.to_string())
        .env(
            "PATRONI_TAGS_NOLOADBALANCE",
            tunables.noloadbalance.to_string(),
        )
        .env(
            "PATRONI_TAGS_CLONEFROM",
            (tunables.clonefrom || clonefrom).to_string(),
        )
        .env("PATRONI_TAGS_NOSYNC", tunables.nosync.to_string())
        .env("PGDATA", "/var/lib/postgresql/data/pgdata")
        .env(
            "PGBACKREST_ENABLED",
            cluster.backup_retention.is_some().to_string(),
        )
        .env("PGBACKREST_IS_LEADER", is_leader.to_string())
        .port(5432, pg_host_port as u16)
        .port(8008, (pg_host_port + API_PORT_OFFSET) as u16)
        .volume(&data_volume, "/var/lib/postgresql/data")
        .volume(&backup_volume, "/var/lib/pgbackrest")
        .network(network, Some(name.clone()));

        if synchronous {
            spec = spec.env("PATRONI_POSTGRESQL_SYNCHRONOUS_STANDBY_NAMES", "ANY 1 (*)");
        }
        if let Some(retention) = cluster.backup_retention {
            spec = spec.env("PGBACKREST_RETENTION_FULL", retention.to_string());
        }
        if let Some(concurrency) = cluster.backup_concurrency {
            spec = spec.env("PGBACKREST_PROCESS_MAX", concurrency.to_string());
        }
        spec.memory_mb = cluster.memory_limit_mb;
        spec.cpus = cluster.cpu_limit;

        let container_id = self.deps.runtime.create_container(&spec).await?;

        let node = ClusterNode {
            id: Uuid::new_v4(),
            cluster_id: cluster.id,
            name,
            container_id: container_id.clone(),
            role: if is_leader {
                NodeRole::Primary
            } else {
                NodeRole::Replica
            },
            port: pg_host_port,
            volume_id: Some(data_volume),
            backup_volume_id: Some(backup_volume),
            is_healthy: true,
            replication_lag_bytes: None,
        };
        self.deps.store.create_cluster_node(&node).await?;
        self.deps.runtime.start_container(&container_id).await?;
        Ok(node)
    }

    async fn launch_haproxy(
        &self,
        cluster: &PostgresCluster,
        network: &str,
        node_count: usize,
    ) -> Result<()> {
        let upstreams = (1..=node_count)
            .map(|i| format!("patroni-node-{i}:5432"))
            .collect::<Vec<_>>()
            .join(",");

        let spec = ContainerSpec::new(
            container_name("pgcluster", cluster.id, Some("haproxy")),
            HAPROXY_IMAGE,
        )
        .env("PATRONI_NODES", upstreams)
        .env("PATRONI_API_PORT", "8008")
        .port(5000, cluster.write_port as u16)
        .port(5001, cluster.read_port as u16)
        .port(7000, cluster.stats_port as u16)
        .network(network, Some("haproxy".to_string()));

        let container_id = self.deps.runtime.create_container(&spec).await?;
        self.deps
            .store
            .create_cluster_node(&ClusterNode {
                id: Uuid::new_v4(),
                cluster_id: cluster.id,
                name: "haproxy".to_string(),
                container_id: container_id.clone(),
                role: NodeRole::Haproxy,
                port: cluster.write_port,
                volume_id: None,
                backup_volume_id: None,
                is_healthy: true,
                replication_lag_bytes: None,
            })
            .await?;
        self.deps.runtime.start_container(&container_id).await?;
        Ok(())
    }

    // ==================================================================
    // Views
    // ==================================================================

    /// Resolve a cluster and its infrastructure from either id.
    async fn resolve(&self, id: Uuid) -> Result<(Infrastructure, PostgresCluster)> {
        if let Some(cluster) = self.deps.store.get_postgres_cluster_by_infra(id).await? {
            let infra = self
                .deps
                .store
                .get_infrastructure(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("infrastructure {id}")))?;
            return Ok((infra, cluster));
        }
        if let Some(cluster) = self.deps.store.get_postgres_cluster(id).await? {
            let infra = self
                .deps
                .store
                .get_infrastructure(cluster.infrastructure_id)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("infrastructure {}", cluster.infrastructure_id))
                })?;
            return Ok((infra, cluster));
        }
        Err(Error::NotFound(format!("postgres cluster {id}")))
    }

    /// Nodes ordered etcd, patroni (by index), haproxy.
    async fn ordered_nodes(&self, cluster_id: Uuid) -> Result<Vec<ClusterNode>> {
        let mut nodes = self.deps.store.list_cluster_nodes(cluster_id).await?;
        nodes.sort_by_key(|n| {
            let group = match n.role {
                NodeRole::Etcd => 0,
                NodeRole::Primary | NodeRole::Replica => 1,
                NodeRole::Haproxy => 2,
            };
            (group, node_index(&n.name))
        });
        Ok(nodes)
    }

    fn patroni_nodes(nodes: &[ClusterNode]) -> Vec<&ClusterNode> {
        let mut patroni: Vec<&ClusterNode> =
            nodes.iter().filter(|n| n.role.is_database()).collect();
        patroni.sort_by_key(|n| node_index(&n.name));
        patroni
    }

    async fn build_view(
        &self,
        infra: &Infrastructure,
        cluster: &PostgresCluster,
    ) -> Result<ClusterView> {
        let nodes = self.ordered_nodes(cluster.id).await?;
        let patroni_node_count = Self::patroni_nodes(&nodes).len();
        Ok(ClusterView {
            cluster_id: cluster.id,
            infrastructure_id: infra.id,
            name: cluster.name.clone(),
            status: infra.status,
            version: cluster.version.clone(),
            replication_mode: cluster.replication_mode,
            endpoints: ClusterEndpoints {
                write: format!("localhost:{}", cluster.write_port),
                read: format!("localhost:{}", cluster.read_port),
                stats: format!("localhost:{}", cluster.stats_port),
            },
            primary_node_id: cluster.primary_node_id,
            nodes: nodes.iter().map(node_view).collect(),
            patroni_node_count,
        })
    }

    /// Cluster info view, cached.
    pub async fn get(&self, _ctx: &Ctx, id: Uuid) -> Result<ClusterView> {
        let (infra, cluster) = self.resolve(id).await?;
        let key = ClusterCache::info_key(cluster.id);
        if let Some(view) = self.deps.cache.get::<ClusterView>(&key) {
            return Ok(view);
        }
        let view = self.build_view(&infra, &cluster).await?;
        self.deps.cache.put(&key, &view, cache::INFO_TTL);
        Ok(view)
    }

    /// Per-node runtime stats, cached.
    pub async fn stats(&self, _ctx: &Ctx, id: Uuid) -> Result<ClusterStatsView> {
        let (_, cluster) = self.resolve(id).await?;
        let key = ClusterCache::stats_key(cluster.id);
        if let Some(view) = self.deps.cache.get::<ClusterStatsView>(&key) {
            return Ok(view);
        }

        let nodes = self.ordered_nodes(cluster.id).await?;
        let mut stats = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let running = match self.deps.runtime.inspect_container(&node.container_id).await {
                Ok(state) => state.running,
                Err(RuntimeError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            };
            stats.push(NodeStats {
                name: node.name.clone(),
                role: node.role,
                running,
                replication_lag_bytes: node.replication_lag_bytes,
            });
        }

        let view = ClusterStatsView {
            cluster_id: cluster.id,
            nodes: stats,
        };
        self.deps.cache.put(&key, &view, cache::STATS_TTL);
        Ok(view)
    }

    /// Failover audit trail, newest first.
    pub async fn failover_events(&self, _ctx: &Ctx, id: Uuid) -> Result<Vec<FailoverEvent>> {
        let (_, cluster) = self.resolve(id).await?;
        self.deps.store.list_failover_events(cluster.id).await
    }

    // ==================================================================
    // Primary identification
    // ==================================================================

    /// Probe Patroni's REST endpoint and return the reported role.
    async fn probe_role(&self, container_id: &str) -> Option<String> {
        let result = self
            .deps
            .runtime
            .exec_command(container_id, &["curl", "-s", "http://localhost:8008"])
            .await
            .ok()?;
        if !result.success() {
            return None;
        }
        let json: serde_json::Value = serde_json::from_str(&result.output).ok()?;
        json.get("role")
            .and_then(|r| r.as_str())
            .map(|r| r.to_string())
    }

    /// Identify the current primary via Patroni REST; the role column is a
    /// hint only. Metadata is updated opportunistically on disagreement.
    async fn resolve_primary(
        &self,
        cluster: &PostgresCluster,
        nodes: &[ClusterNode],
    ) -> Result<ClusterNode> {
        for node in Self::patroni_nodes(nodes) {
            match self.probe_role(&node.container_id).await.as_deref() {
                Some("master") | Some("leader") => {
                    if node.role != NodeRole::Primary {
                        warn!(
                            cluster_id = %cluster.id,
                            node = %node.name,
                            "metadata role out of date; Patroni reports this node as primary"
                        );
                        self.deps
                            .store
                            .swap_primary(cluster.id, cluster.primary_node_id, node.id)
                            .await?;
                        self.deps.cache.invalidate_cluster(cluster.id);
                    }
                    return Ok((*node).clone());
                }
                _ => continue,
            }
        }
        Err(Error::DependencyFailed(
            "could not identify the current primary via Patroni".into(),
        ))
    }

    /// Replication status: primary plus per-replica lag and sync state.
    pub async fn replication_status(&self, _ctx: &Ctx, id: Uuid) -> Result<ReplicationStatusView> {
        let (_, cluster) = self.resolve(id).await?;
        let key = ClusterCache::replication_key(cluster.id);
        if let Some(view) = self.deps.cache.get::<ReplicationStatusView>(&key) {
            return Ok(view);
        }

        let nodes = self.ordered_nodes(cluster.id).await?;
        let primary = self.resolve_primary(&cluster, &nodes).await?;

        let result = self
            .deps
            .runtime
            .exec_command(
                &primary.container_id,
                &[
                    "psql",
                    "-U",
                    "postgres",
                    "-t",
                    "-A",
                    "-F",
                    "|",
                    "-c",
                    "SELECT application_name, state, sync_state, \
                     COALESCE(pg_wal_lsn_diff(pg_current_wal_lsn(), replay_lsn), 0) \
                     FROM pg_stat_replication",
                ],
            )
            .await?;
        if !result.success() {
            return Err(Error::DependencyFailed(format!(
                "pg_stat_replication query failed: {}",
                result.output.trim()
            )));
        }

        let mut replicas = Vec::new();
        for line in result.output.lines() {
            let fields: Vec<&str> = line.trim().split('|').collect();
            if fields.len() < 4 {
                continue;
            }
            let lag = fields[3].parse::<f64>().ok().map(|l| l as i64);
            let name = fields[0].to_string();
            if let Some(node) = nodes.iter().find(|n| n.name == name) {
                self.deps
                    .store
                    .update_node_replication_lag(node.id, lag)
                    .await?;
            }
            replicas.push(ReplicaStatus {
                name,
                state: fields[1].to_string(),
                sync_state: fields[2].to_string(),
                lag_bytes: lag,
            });
        }

        let view = ReplicationStatusView {
            cluster_id: cluster.id,
            primary: primary.name,
            mode: cluster.replication_mode,
            replicas,
        };
        self.deps.cache.put(&key, &view, cache::REPLICATION_TTL);
        Ok(view)
    }

    // ==================================================================
    // Replication test
    // ==================================================================

    /// Insert a probe row on the primary and verify it on every node.
    pub async fn test_replication(&self, _ctx: &Ctx, id: Uuid) -> Result<ReplicationTestView> {
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.ordered_nodes(cluster.id).await?;
        let primary = self.resolve_primary(&cluster, &nodes).await?;
        let payload = format!("test-{}", Utc::now().timestamp());

        let create = "CREATE TABLE IF NOT EXISTS replication_test \
                      (id SERIAL PRIMARY KEY, data TEXT NOT NULL, created_at TIMESTAMPTZ DEFAULT NOW())";
        let result = self
            .deps
            .runtime
            .exec_command(&primary.container_id, &["psql", "-U", "postgres", "-c", create])
            .await?;
        if !result.success() {
            return Err(Error::DependencyFailed(format!(
                "failed to create probe table: {}",
                result.output.trim()
            )));
        }

        let insert = format!("INSERT INTO replication_test (data) VALUES ('{payload}')");
        let result = self
            .deps
            .runtime
            .exec_command(&primary.container_id, &["psql", "-U", "postgres", "-c", &insert])
            .await?;
        if !result.success() {
            return Err(Error::DependencyFailed(format!(
                "failed to insert probe row: {}",
                result.output.trim()
            )));
        }

        sleep(self.timings.replication_probe).await;

        let count_sql = format!("SELECT count(*) FROM replication_test WHERE data='{payload}'");
        let mut results = Vec::new();
        let mut all_synced = true;
        for node in Self::patroni_nodes(&nodes) {
            let row_count = match self
                .deps
                .runtime
                .exec_command(
                    &node.container_id,
                    &["psql", "-U", "postgres", "-t", "-A", "-c", &count_sql],
                )
                .await
            {
                Ok(result) if result.success() => {
                    result.output.trim().parse::<i64>().unwrap_or(0)
                }
                _ => 0,
            };
            if row_count != 1 {
                all_synced = false;
            }
            results.push(ReplicationTestNode {
                name: node.name.clone(),
                role: node.role,
                has_data: row_count > 0,
                row_count,
            });
        }

        // Clean the probe row up on the primary.
        let cleanup = format!("DELETE FROM replication_test WHERE data='{payload}'");
        if let Err(e) = self
            .deps
            .runtime
            .exec_command(&primary.container_id, &["psql", "-U", "postgres", "-c", &cleanup])
            .await
        {
            warn!(cluster_id = %cluster.id, error = %e, "failed to clean up probe row");
        }

        Ok(ReplicationTestView {
            payload,
            all_synced,
            nodes: results,
        })
    }

    // ==================================================================
    // Node add / remove
    // ==================================================================

    /// Add a replica that clones itself from the primary.
    pub async fn add_node(
        &self,
        ctx: &Ctx,
        id: Uuid,
        req: AddNodeRequest,
    ) -> Result<ClusterNodeView> {
        ctx.check_cancelled()?;
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_cluster_nodes(cluster.id).await?;
        let patroni = Self::patroni_nodes(&nodes);

        if patroni.len() >= MAX_PATRONI_NODES {
            return Err(Error::PreconditionFailed(format!(
                "cluster already has the maximum of {MAX_PATRONI_NODES} database nodes"
            )));
        }

        let next_index = patroni
            .iter()
            .map(|n| node_index(&n.name))
            .max()
            .unwrap_or(0)
            + 1;
        if let Some(name) = &req.node_name
            && nodes.iter().any(|n| &n.name == name)
        {
            return Err(Error::Conflict(format!("node name {name} already in use")));
        }

        let network = cluster
            .network_id
            .clone()
            .ok_or_else(|| Error::PreconditionFailed("cluster has no network".into()))?;
        let pg_host_port = patroni.iter().map(|n| n.port).max().unwrap_or(15431) + 1;

        let node = self
            .launch_patroni_node(&cluster, &network, next_index, pg_host_port, false, true)
            .await
            .map_err(|e| e.in_step(format!("add patroni node {next_index}")))?;

        // An explicit node name overrides the derived one.
        if let Some(name) = req.node_name
            && name != node.name
        {
            // The container and volumes already carry the derived name; the
            // metadata row keeps the caller's label.
            let renamed = ClusterNode { name, ..node.clone() };
            self.deps.store.delete_cluster_node(node.id).await?;
            self.deps.store.create_cluster_node(&renamed).await?;
            self.deps.cache.invalidate_cluster(cluster.id);
            return Ok(node_view(&renamed));
        }

        self.deps.cache.invalidate_cluster(cluster.id);
        info!(cluster_id = %cluster.id, node = %node.name, "replica added");
        Ok(node_view(&node))
    }

    /// Remove a database node. Removing the primary requires `force` and
    /// promotes a healthy replica first.
    pub async fn remove_node(&self, ctx: &Ctx, id: Uuid, node_id: Uuid, force: bool) -> Result<()> {
        ctx.check_cancelled()?;
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_cluster_nodes(cluster.id).await?;
        let node = nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| Error::NotFound(format!("node {node_id} in cluster {}", cluster.id)))?
            .clone();

        if !node.role.is_database() {
            return Err(Error::PreconditionFailed(format!(
                "node {} is not a database node",
                node.name
            )));
        }
        let patroni = Self::patroni_nodes(&nodes);
        if patroni.len() <= 1 {
            return Err(Error::PreconditionFailed(
                "at least one database node must remain".into(),
            ));
        }

        if node.role == NodeRole::Primary {
            if !force {
                return Err(Error::PreconditionFailed(format!(
                    "node {} is the primary; pass force to remove it",
                    node.name
                )));
            }
            let replacement = patroni
                .iter()
                .find(|n| n.id != node.id && n.is_healthy && n.role == NodeRole::Replica)
                .ok_or_else(|| {
                    Error::PreconditionFailed("no healthy replica available for promotion".into())
                })?;
            self.record_failover(
                &cluster,
                &node,
                replacement,
                FailoverReason::Manual,
                TriggeredBy::User,
            )
            .await?;
        }

        let _ = self.deps.runtime.stop_container(&node.container_id).await;
        if let Err(e) = self
            .deps
            .runtime
            .remove_container(&node.container_id, true)
            .await
            && !matches!(e, RuntimeError::NotFound(_))
        {
            warn!(node = %node.name, error = %e, "failed to remove node container");
        }
        for volume in [&node.volume_id, &node.backup_volume_id].into_iter().flatten() {
            if let Err(e) = self.deps.runtime.remove_volume(volume).await {
                warn!(node = %node.name, volume = %volume, error = %e, "failed to remove volume");
            }
        }

        self.deps.store.delete_cluster_node(node.id).await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        info!(cluster_id = %cluster.id, node = %node.name, "node removed");
        Ok(())
    }

    /// Append a failover event and atomically swap role columns.
    async fn record_failover(
        &self,
        cluster: &PostgresCluster,
        old_primary: &ClusterNode,
        new_primary: &ClusterNode,
        reason: FailoverReason,
        triggered_by: TriggeredBy,
    ) -> Result<()> {
        self.deps
            .store
            .append_failover_event(&FailoverEvent {
                id: Uuid::new_v4(),
                cluster_id: cluster.id,
                old_primary_id: Some(old_primary.id),
                old_primary_name: old_primary.name.clone(),
                new_primary_id: new_primary.id,
                new_primary_name: new_primary.name.clone(),
                reason,
                triggered_by,
                occurred_at: Utc::now(),
            })
            .await?;
        self.deps
            .store
            .swap_primary(cluster.id, Some(old_primary.id), new_primary.id)
            .await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        Ok(())
    }

    // ==================================================================
    // Failover
    // ==================================================================

    /// Manually promote a target node. Patroni performs the switchover; the
    /// engine records the event and projects the role swap.
    pub async fn failover(&self, ctx: &Ctx, id: Uuid, target_node_id: Uuid) -> Result<()> {
        ctx.check_cancelled()?;
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_cluster_nodes(cluster.id).await?;
        let target = nodes
            .iter()
            .find(|n| n.id == target_node_id)
            .ok_or_else(|| {
                Error::NotFound(format!("node {target_node_id} in cluster {}", cluster.id))
            })?;

        if !target.role.is_database() {
            return Err(Error::PreconditionFailed(format!(
                "node {} cannot be promoted",
                target.name
            )));
        }
        if target.role == NodeRole::Primary {
            return Err(Error::PreconditionFailed(format!(
                "node {} is already the primary",
                target.name
            )));
        }

        let primary = self.resolve_primary(&cluster, &nodes).await?;
        if primary.id == target.id {
            return Err(Error::PreconditionFailed(format!(
                "node {} is already the primary",
                target.name
            )));
        }

        let body = format!(
            r#"{{"leader": "{}", "candidate": "{}"}}"#,
            primary.name, target.name
        );
        let result = self
            .deps
            .runtime
            .exec_command(
                &primary.container_id,
                &[
                    "curl",
                    "-s",
                    "-X",
                    "POST",
                    "-d",
                    &body,
                    "http://localhost:8008/switchover",
                ],
            )
            .await?;
        if !result.success() {
            return Err(Error::DependencyFailed(format!(
                "Patroni switchover failed: {}",
                result.output.trim()
            )));
        }

        self.record_failover(
            &cluster,
            &primary,
            target,
            FailoverReason::Manual,
            TriggeredBy::User,
        )
        .await?;

        info!(
            cluster_id = %cluster.id,
            old = %primary.name,
            new = %target.name,
            "manual failover complete"
        );
        Ok(())
    }

    // ==================================================================
    // Node and cluster start/stop
    // ==================================================================

    /// Stop one node. Stopping the primary pre-records an automatic
    /// failover projection that the reconciliation loop later confirms.
    pub async fn stop_node(&self, _ctx: &Ctx, id: Uuid, node_id: Uuid) -> Result<()> {
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_cluster_nodes(cluster.id).await?;
        let node = nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| Error::NotFound(format!("node {node_id} in cluster {}", cluster.id)))?;

        if node.role == NodeRole::Primary {
            let replacement = Self::patroni_nodes(&nodes)
                .into_iter()
                .find(|n| n.id != node.id && n.is_healthy && n.role == NodeRole::Replica);
            if let Some(replacement) = replacement {
                // Best-effort metadata projection of Patroni's own election.
                self.record_failover(
                    &cluster,
                    node,
                    replacement,
                    FailoverReason::Automatic,
                    TriggeredBy::System,
                )
                .await?;
            }
        }

        self.deps.runtime.stop_container(&node.container_id).await?;
        self.deps.store.update_node_health(node.id, false).await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        Ok(())
    }

    /// Start one node.
    pub async fn start_node(&self, _ctx: &Ctx, id: Uuid, node_id: Uuid) -> Result<()> {
        let (_, cluster) = self.resolve(id).await?;
        let node = self
            .deps
            .store
            .get_cluster_node(node_id)
            .await?
            .filter(|n| n.cluster_id == cluster.id)
            .ok_or_else(|| Error::NotFound(format!("node {node_id} in cluster {}", cluster.id)))?;

        self.deps.runtime.start_container(&node.container_id).await?;
        self.deps.store.update_node_health(node.id, true).await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        Ok(())
    }

    /// Start the whole cluster: etcd, then Patroni, then HAProxy.
    pub async fn start(&self, ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        let nodes = self.ordered_nodes(cluster.id).await?;

        for node in nodes.iter().filter(|n| n.role == NodeRole::Etcd) {
            ctx.check_cancelled()?;
            self.deps
                .runtime
                .start_container(&node.container_id)
                .await
                .map_err(|e| Error::from(e).in_step(format!("start {}", node.name)))?;
        }
        sleep(self.timings.stage_gap).await;

        for node in nodes.iter().filter(|n| n.role.is_database()) {
            ctx.check_cancelled()?;
            self.deps
                .runtime
                .start_container(&node.container_id)
                .await
                .map_err(|e| Error::from(e).in_step(format!("start {}", node.name)))?;
        }
        sleep(self.timings.stage_gap).await;

        for node in nodes.iter().filter(|n| n.role == NodeRole::Haproxy) {
            self.deps
                .runtime
                .start_container(&node.container_id)
                .await
                .map_err(|e| Error::from(e).in_step(format!("start {}", node.name)))?;
        }

        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Running)
            .await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Running, "start").await;
        Ok(())
    }

    /// Stop the whole cluster: HAProxy, then Patroni, then etcd.
    pub async fn stop(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        let nodes = self.ordered_nodes(cluster.id).await?;

        for node in nodes.iter().rev() {
            if let Err(e) = self.deps.runtime.stop_container(&node.container_id).await {
                warn!(node = %node.name, error = %e, "failed to stop node");
            }
        }

        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Stopped)
            .await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Stopped, "stop").await;
        Ok(())
    }

    // ==================================================================
    // Backup
    // ==================================================================

    /// Trigger a pgBackRest backup on the current primary.
    pub async fn backup(&self, _ctx: &Ctx, id: Uuid, req: BackupRequest) -> Result<String> {
        let (_, cluster) = self.resolve(id).await?;
        if cluster.backup_retention.is_none() {
            return Err(Error::PreconditionFailed(
                "backups were not enabled for this cluster".into(),
            ));
        }
        let backup_type = req.backup_type.unwrap_or_else(|| "full".to_string());
        if backup_type != "full" && backup_type != "incr" {
            return Err(Error::InvalidInput(format!(
                "backup_type must be full or incr, got {backup_type}"
            )));
        }

        let nodes = self.ordered_nodes(cluster.id).await?;
        let primary = self.resolve_primary(&cluster, &nodes).await?;

        let type_arg = format!("--type={backup_type}");
        let result = self
            .deps
            .runtime
            .exec_command(
                &primary.container_id,
                &["pgbackrest", "--stanza=db", "backup", &type_arg],
            )
            .await?;
        if !result.success() {
            return Err(Error::DependencyFailed(format!(
                "pgbackrest backup failed: {}",
                result.output.trim()
            )));
        }
        Ok(result.output)
    }

    /// Scaling is deliberately unsupported; callers use add/remove node.
    pub async fn scale(&self, _ctx: &Ctx, _id: Uuid, _node_count: u32) -> Result<()> {
        Err(Error::PreconditionFailed(
            "scale is not implemented; use add/remove node".into(),
        ))
    }

    // ==================================================================
    // Delete
    // ==================================================================

    /// Tear down every container, volume, the network, and metadata.
    pub async fn delete(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleting)
            .await?;

        let nodes = self.ordered_nodes(cluster.id).await?;
        for node in nodes.iter().rev() {
            let _ = self.deps.runtime.stop_container(&node.container_id).await;
            if let Err(e) = self
                .deps
                .runtime
                .remove_container(&node.container_id, true)
                .await
                && !matches!(e, RuntimeError::NotFound(_))
            {
                warn!(node = %node.name, error = %e, "failed to remove node container");
            }
            for volume in [&node.volume_id, &node.backup_volume_id].into_iter().flatten() {
                if let Err(e) = self.deps.runtime.remove_volume(volume).await {
                    warn!(node = %node.name, volume = %volume, error = %e, "failed to remove volume");
                }
            }
        }

        if let Some(network) = &cluster.network_id
            && let Err(e) = self.deps.runtime.remove_network(network).await
        {
            warn!(cluster_id = %cluster.id, error = %e, "failed to remove network");
        }

        self.deps.store.delete_postgres_cluster(cluster.id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleted)
            .await?;
        self.deps.cache.invalidate_cluster(cluster.id);
        publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Deleted, "deleted")
            .await;
        info!(cluster_id = %cluster.id, "postgres cluster deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_index_parsing() {
        assert_eq!(node_index("patroni-node-1"), 1);
        assert_eq!(node_index("patroni-node-12"), 12);
        assert_eq!(node_index("etcd-3"), 3);
        assert_eq!(node_index("haproxy"), 0);
    }

    #[test]
    fn test_timings_defaults_match_stage_ordering_contract() {
        let t = ClusterTimings::default();
        assert_eq!(t.etcd_quorum, Duration::from_secs(15));
        assert_eq!(t.etcd_node_gap, Duration::from_secs(3));
        assert_eq!(t.primary_ready, Duration::from_secs(20));
        assert_eq!(t.replica_gap, Duration::from_secs(15));
        assert_eq!(t.stage_gap, Duration::from_secs(5));
    }

    #[test]
    fn test_patroni_image_tracks_version() {
        assert_eq!(patroni_image("17"), "iaas/patroni:17");
        assert_eq!(patroni_image("16"), "iaas/patroni:16");
    }
}
