// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NGINX active-passive cluster engine.
//!
//! Launches N NGINX nodes on a dedicated bridge network with descending
//! VRRP priorities; the priority-100 node is master, the rest are backups.
//! The keepalived-style daemon inside each container moves the virtual IP;
//! this engine only manages metadata, ports, and configuration.
//!
//! Configuration synchronisation is all-or-nothing per node: validate the
//! candidate on the master first, then walk every node through
//! backup → write → validate → reload with rollback, accumulating
//! per-node failures instead of aborting the walk.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use iaas_core::error::{Error, Result};
use iaas_core::model::{
    FailoverEvent, FailoverReason, InfraKind, InfraStatus, Infrastructure, LbAlgorithm,
    NginxCluster, NginxNode, NginxRole, NginxRouting, NginxTunables, TriggeredBy,
};
use iaas_runtime::{ContainerSpec, RuntimeError};

use crate::context::Ctx;
use crate::services::nginx_config;
use crate::services::{
    ServiceDeps, container_name, network_name, publish_lifecycle, scan_port,
};

const NGINX_IMAGE: &str = "nginx:1.27";
const MASTER_PRIORITY: i32 = 100;
const DEMOTED_PRIORITY: i32 = 50;

/// Request to create an NGINX cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNginxClusterRequest {
    /// Cluster name.
    pub name: String,
    /// Node count; defaults to 2.
    #[serde(default)]
    pub node_count: Option<u32>,
    /// Shared virtual IP advertised by the master, if any.
    #[serde(default)]
    pub virtual_ip: Option<String>,
    /// Base host HTTP port for node port scanning; defaults to 8080.
    #[serde(default)]
    pub http_port: Option<i32>,
    /// Base host HTTPS port; TLS stays unexposed when unset.
    #[serde(default)]
    pub https_port: Option<i32>,
    /// Default balancing algorithm for generated configs.
    #[serde(default)]
    pub algorithm: Option<LbAlgorithm>,
    /// Performance tunables.
    #[serde(default)]
    pub tunables: Option<NginxTunables>,
    /// Initial routing model.
    #[serde(default)]
    pub routing: Option<NginxRouting>,
}

/// A node's sync failure in a config rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSyncFailure {
    /// Node name.
    pub node: String,
    /// What went wrong.
    pub error: String,
}

/// Aggregate result of a config rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSyncReport {
    /// Nodes now running the new config.
    pub applied: Vec<String>,
    /// Nodes left on their previous config.
    pub failed: Vec<NodeSyncFailure>,
}

impl ConfigSyncReport {
    /// Whether any node was left behind.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Caller-facing view of an NGINX cluster node.
#[derive(Debug, Clone, Serialize)]
pub struct NginxNodeView {
    /// Node id.
    pub id: Uuid,
    /// Node name.
    pub name: String,
    /// Role inside the cluster.
    pub role: NginxRole,
    /// VRRP priority.
    pub priority: i32,
    /// Externally mapped HTTP port.
    pub http_port: i32,
    /// Externally mapped HTTPS port, when TLS is exposed.
    pub https_port: Option<i32>,
    /// Whether the container is running.
    pub running: bool,
}

/// Caller-facing view of an NGINX cluster.
#[derive(Debug, Clone, Serialize)]
pub struct NginxClusterView {
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Infrastructure id.
    pub infrastructure_id: Uuid,
    /// Cluster name.
    pub name: String,
    /// Lifecycle status.
    pub status: InfraStatus,
    /// Virtual IP, when configured.
    pub virtual_ip: Option<String>,
    /// Per-node HTTP endpoints.
    pub endpoints: Vec<String>,
    /// Nodes ordered by priority.
    pub nodes: Vec<NginxNodeView>,
}

/// The NGINX cluster engine.
pub struct NginxClusterService {
    deps: ServiceDeps,
}

impl NginxClusterService {
    /// Create the engine over shared dependencies.
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    // ==================================================================
    // Create
    // ==================================================================

    /// Create the cluster: N nodes with descending priorities.
    pub async fn create(
        &self,
        ctx: &Ctx,
        req: CreateNginxClusterRequest,
    ) -> Result<NginxClusterView> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        let node_count = req.node_count.unwrap_or(2);
        if node_count == 0 {
            return Err(Error::InvalidInput("node_count must be at least 1".into()));
        }

        let tunables = req.tunables.unwrap_or_default();
        let routing = req.routing.unwrap_or_default();
        let config = nginx_config::default_config(&tunables, &routing);

        let infra = Infrastructure::new(&req.name, InfraKind::NginxCluster, &ctx.user_id);
        let cluster_id = Uuid::new_v4();
        let cluster = NginxCluster {
            id: cluster_id,
            infrastructure_id: infra.id,
            name: req.name.clone(),
            virtual_ip: req.virtual_ip.clone(),
            http_port: req.http_port.unwrap_or(8080),
            https_port: req.https_port,
            algorithm: req.algorithm.unwrap_or_default(),
            config: config.clone(),
            network_id: Some(network_name(cluster_id)),
            tunables,
            routing,
        };
        self.deps.store.create_infrastructure(&infra).await?;
        self.deps.store.create_nginx_cluster(&cluster).await?;

        match self.provision(ctx, &cluster, node_count).await {
            Ok(nodes) => {
                // Roll the generated config out; nodes that refuse keep the
                // stock config and surface as degraded in the view.
                let report = self.rollout(&nodes, &config).await;
                if report.has_failures() {
                    warn!(
                        cluster_id = %cluster.id,
                        failed = report.failed.len(),
                        "initial config rollout left nodes on the stock config"
                    );
                }

                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Running)
                    .await?;

                let mut infra = infra;
                infra.status = InfraStatus::Running;
                publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Running, "created")
                    .await;
                info!(cluster_id = %cluster.id, nodes = node_count, "nginx cluster created");
                self.build_view(&infra, &cluster).await
            }
            Err(e) => {
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Failed)
                    .await?;
                Err(e.in_step(format!("create nginx cluster {}", req.name)))
            }
        }
    }

    async fn provision(
        &self,
        ctx: &Ctx,
        cluster: &NginxCluster,
        node_count: u32,
    ) -> Result<Vec<NginxNode>> {
        let network = network_name(cluster.id);
        self.deps.runtime.create_network(&network).await?;

        let mut used_http: HashSet<i32> = HashSet::new();
        let mut used_https: HashSet<i32> = HashSet::new();
        let mut nodes = Vec::with_capacity(node_count as usize);

        for i in 1..=node_count {
            ctx.check_cancelled()?;
            let name = format!("{}-nginx-{i}", cluster.name);
            let priority = MASTER_PRIORITY - (i as i32 - 1);
            let role = if i == 1 { NginxRole::Master } else { NginxRole::Backup };

            let http_port = scan_port(cluster.http_port, &used_http);
            used_http.insert(http_port);
            let https_port = cluster.https_port.map(|base| {
                let port = scan_port(base, &used_https);
                used_https.insert(port);
                port
            });

            let mut spec = ContainerSpec::new(
                container_name("nginxcluster", cluster.id, Some(&name)),
                NGINX_IMAGE,
            )
            .env("KEEPALIVED_PRIORITY", priority.to_string())
            .env(
                "KEEPALIVED_STATE",
                if role == NginxRole::Master { "MASTER" } else { "BACKUP" },
            )
            .port(80, http_port as u16)
            .network(&network, Some(name.clone()));
            if let Some(vip) = &cluster.virtual_ip {
                spec = spec.env("KEEPALIVED_VIRTUAL_IP", vip);
            }
            if let Some(https) = https_port {
                spec = spec.port(443, https as u16);
            }

            let container_id = self
                .deps
                .runtime
                .create_container(&spec)
                .await
                .map_err(|e| Error::from(e).in_step(format!("create nginx node {i}")))?;

            let node = NginxNode {
                id: Uuid::new_v4(),
                cluster_id: cluster.id,
                name,
                container_id: container_id.clone(),
                role,
                priority,
                http_port,
                https_port,
                is_healthy: true,
            };
            self.deps.store.create_nginx_node(&node).await?;
            self.deps
                .runtime
                .start_container(&container_id)
                .await
                .map_err(|e| Error::from(e).in_step(format!("start nginx node {i}")))?;
            nodes.push(node);
        }

        Ok(nodes)
    }

    // ==================================================================
    // Config sync
    // ==================================================================

    /// Apply a candidate config across the cluster.
    ///
    /// The candidate is validated on the master before any node's live file
    /// is touched; a validation failure aborts with precondition-failed and
    /// leaves every node byte-identical to its pre-call config.
    pub async fn sync_config(
        &self,
        ctx: &Ctx,
        id: Uuid,
        config: &str,
    ) -> Result<ConfigSyncReport> {
        ctx.check_cancelled()?;
        if config.trim().is_empty() {
            return Err(Error::InvalidInput("config must not be empty".into()));
        }

        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;

        let master = self.running_master(&nodes).await?;
        nginx_config::validate_on(
            self.deps.runtime.as_ref(),
            &master.container_id,
            config,
            Utc::now().timestamp(),
        )
        .await?;

        let report = self.rollout(&nodes, config).await;
        if !report.has_failures() {
            self.deps
                .store
                .update_nginx_cluster_config(cluster.id, config)
                .await?;
        }
        Ok(report)
    }

    /// Walk every node through the apply-with-rollback sequence.
    async fn rollout(&self, nodes: &[NginxNode], config: &str) -> ConfigSyncReport {
        let epoch = Utc::now().timestamp();
        let mut report = ConfigSyncReport {
            applied: Vec::new(),
            failed: Vec::new(),
        };

        for node in nodes {
            match nginx_config::apply_to_container(
                self.deps.runtime.as_ref(),
                &node.container_id,
                config,
                epoch,
            )
            .await
            {
                Ok(()) => report.applied.push(node.name.clone()),
                Err(e) => {
                    warn!(node = %node.name, error = %e, "config apply failed; node rolled back");
                    report.failed.push(NodeSyncFailure {
                        node: node.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// The running node with the highest priority.
    async fn running_master(&self, nodes: &[NginxNode]) -> Result<NginxNode> {
        for node in nodes {
            match self.deps.runtime.inspect_container(&node.container_id).await {
                Ok(state) if state.running => return Ok(node.clone()),
                Ok(_) | Err(RuntimeError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::PreconditionFailed(
            "no running node available to validate against".into(),
        ))
    }

    // ==================================================================
    // Failover
    // ==================================================================

    /// Swap master and backup roles and priorities.
    ///
    /// This is a metadata-and-advertisement change; the VRRP daemon inside
    /// the containers moves the virtual IP on its own.
    pub async fn failover(&self, _ctx: &Ctx, id: Uuid, target_node_id: Uuid) -> Result<()> {
        let (_, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;

        let target = nodes
            .iter()
            .find(|n| n.id == target_node_id)
            .ok_or_else(|| {
                Error::NotFound(format!("node {target_node_id} in cluster {}", cluster.id))
            })?;
        if target.role == NginxRole::Master {
            return Err(Error::PreconditionFailed(format!(
                "node {} is already the master",
                target.name
            )));
        }
        let master = nodes
            .iter()
            .find(|n| n.role == NginxRole::Master)
            .ok_or_else(|| Error::PreconditionFailed("cluster has no master".into()))?;

        self.deps
            .store
            .swap_nginx_master(cluster.id, master.id, target.id)
            .await?;
        self.deps
            .store
            .append_failover_event(&FailoverEvent {
                id: Uuid::new_v4(),
                cluster_id: cluster.id,
                old_primary_id: Some(master.id),
                old_primary_name: master.name.clone(),
                new_primary_id: target.id,
                new_primary_name: target.name.clone(),
                reason: FailoverReason::Manual,
                triggered_by: TriggeredBy::User,
                occurred_at: Utc::now(),
            })
            .await?;

        info!(
            cluster_id = %cluster.id,
            old = %master.name,
            new = %target.name,
            demoted_priority = DEMOTED_PRIORITY,
            "nginx failover complete"
        );
        Ok(())
    }

    // ==================================================================
    // Views and lifecycle
    // ==================================================================

    async fn resolve(&self, id: Uuid) -> Result<(Infrastructure, NginxCluster)> {
        if let Some(cluster) = self.deps.store.get_nginx_cluster_by_infra(id).await? {
            let infra = self
                .deps
                .store
                .get_infrastructure(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("infrastructure {id}")))?;
            return Ok((infra, cluster));
        }
        if let Some(cluster) = self.deps.store.get_nginx_cluster(id).await? {
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
        Err(Error::NotFound(format!("nginx cluster {id}")))
    }

    async fn build_view(
        &self,
        infra: &Infrastructure,
        cluster: &NginxCluster,
    ) -> Result<NginxClusterView> {
        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;
        let mut views = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let running = match self.deps.runtime.inspect_container(&node.container_id).await {
                Ok(state) => state.running,
                Err(RuntimeError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            };
            views.push(NginxNodeView {
                id: node.id,
                name: node.name.clone(),
                role: node.role,
                priority: node.priority,
                http_port: node.http_port,
                https_port: node.https_port,
                running,
            });
        }

        Ok(NginxClusterView {
            cluster_id: cluster.id,
            infrastructure_id: infra.id,
            name: cluster.name.clone(),
            status: infra.status,
            virtual_ip: cluster.virtual_ip.clone(),
            endpoints: views
                .iter()
                .map(|n| format!("http://localhost:{}", n.http_port))
                .collect(),
            nodes: views,
        })
    }

    /// Cluster view with per-node running flags.
    pub async fn get(&self, _ctx: &Ctx, id: Uuid) -> Result<NginxClusterView> {
        let (infra, cluster) = self.resolve(id).await?;
        self.build_view(&infra, &cluster).await
    }

    /// Start nodes in priority order, master first.
    pub async fn start(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;
        for node in &nodes {
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
        Ok(())
    }

    /// Stop nodes in reverse priority order.
    pub async fn stop(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;
        for node in nodes.iter().rev() {
            if let Err(e) = self.deps.runtime.stop_container(&node.container_id).await {
                warn!(node = %node.name, error = %e, "failed to stop node");
            }
        }
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Stopped)
            .await?;
        Ok(())
    }

    /// Tear down containers, the network, and metadata.
    pub async fn delete(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        let (infra, cluster) = self.resolve(id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleting)
            .await?;

        let nodes = self.deps.store.list_nginx_nodes(cluster.id).await?;
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
        }

        if let Err(e) = self.deps.runtime.remove_network(&network_name(cluster.id)).await {
            warn!(cluster_id = %cluster.id, error = %e, "failed to remove network");
        }

        self.deps.store.delete_nginx_cluster(cluster.id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleted)
            .await?;
        publish_lifecycle(&self.deps.events, &infra, "", None, InfraStatus::Deleted, "deleted")
            .await;
        info!(cluster_id = %cluster.id, "nginx cluster deleted");
        Ok(())
    }
}
