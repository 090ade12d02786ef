// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model for iaas.
//!
//! Records here are what the metadata store persists and what services pass
//! around. They carry no behaviour beyond parsing and rendering; all
//! transitions go through the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Infrastructure
// ============================================================================

/// Kind of managed unit an infrastructure row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraKind {
    /// A single PostgreSQL container.
    SinglePostgres,
    /// A Patroni/etcd/HAProxy HA cluster.
    PostgresCluster,
    /// A single NGINX container.
    SingleNginx,
    /// An NGINX active-passive cluster.
    NginxCluster,
    /// A generic user-supplied container.
    GenericContainer,
    /// A docker-in-docker sandbox environment.
    DindEnvironment,
}

impl InfraKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePostgres => "single_postgres",
            Self::PostgresCluster => "postgres_cluster",
            Self::SingleNginx => "single_nginx",
            Self::NginxCluster => "nginx_cluster",
            Self::GenericContainer => "generic_container",
            Self::DindEnvironment => "dind_environment",
        }
    }

    /// Parse a kind from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_postgres" => Some(Self::SinglePostgres),
            "postgres_cluster" => Some(Self::PostgresCluster),
            "single_nginx" => Some(Self::SingleNginx),
            "nginx_cluster" => Some(Self::NginxCluster),
            "generic_container" => Some(Self::GenericContainer),
            "dind_environment" => Some(Self::DindEnvironment),
            _ => None,
        }
    }
}

/// Lifecycle status of an infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraStatus {
    /// Provisioning in progress.
    Creating,
    /// All containers up.
    Running,
    /// Containers stopped on purpose.
    Stopped,
    /// Provisioning or runtime failure.
    Failed,
    /// At least one cluster member not running (projected by reconciliation).
    Degraded,
    /// Teardown in progress.
    Deleting,
    /// Terminal; the record is retained for audit.
    Deleted,
}

impl InfraStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }

    /// Parse a status from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "degraded" => Some(Self::Degraded),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Root identity of a managed unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infrastructure {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Concrete component kind.
    pub kind: InfraKind,
    /// Owning principal.
    pub user_id: String,
    /// Lifecycle status.
    pub status: InfraStatus,
    /// When provisioning started.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Infrastructure {
    /// New infrastructure in `creating` state.
    pub fn new(name: impl Into<String>, kind: InfraKind, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            user_id: user_id.into(),
            status: InfraStatus::Creating,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Single containers
// ============================================================================

/// A single PostgreSQL container component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSingle {
    /// Component id.
    pub id: Uuid,
    /// Owning infrastructure.
    pub infrastructure_id: Uuid,
    /// Runtime container id once created.
    pub container_id: Option<String>,
    /// PostgreSQL major version.
    pub version: String,
    /// Host port mapped to 5432.
    pub port: i32,
    /// Database name.
    pub database: String,
    /// Superuser name.
    pub username: String,
    /// Superuser password.
    pub password: String,
    /// Data volume name.
    pub volume_id: Option<String>,
}

/// A single NGINX container component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxSingle {
    /// Component id.
    pub id: Uuid,
    /// Owning infrastructure.
    pub infrastructure_id: Uuid,
    /// Runtime container id once created.
    pub container_id: Option<String>,
    /// Host port mapped to 80.
    pub http_port: i32,
    /// Host port mapped to 443, if TLS is exposed.
    pub https_port: Option<i32>,
    /// Effective nginx configuration, if one has been applied.
    pub config: Option<String>,
    /// Reverse-proxy routing model rendered into the config.
    pub routing: NginxRouting,
}

/// A generic user-supplied container component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerService {
    /// Component id.
    pub id: Uuid,
    /// Owning infrastructure.
    pub infrastructure_id: Uuid,
    /// Runtime container id once created.
    pub container_id: Option<String>,
    /// Image reference.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Container-to-host port mappings.
    pub ports: Vec<ServicePort>,
    /// Command override.
    pub command: Option<Vec<String>>,
}

/// A container-to-host port mapping on a generic service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port inside the container.
    pub container: i32,
    /// Port on the host.
    pub host: i32,
}

// ============================================================================
// PostgreSQL cluster
// ============================================================================

/// Replication mode for a PostgreSQL cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Synchronous commit to at least one standby.
    Sync,
    /// Asynchronous replication.
    Async,
}

impl ReplicationMode {
    /// Returns the string representation of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }

    /// Parse a mode from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

/// Patroni tunables carried on the cluster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatroniTunables {
    /// `max_connections` for every node.
    pub max_connections: i32,
    /// `shared_buffers` for every node.
    pub shared_buffers: String,
    /// Patroni watchdog mode (`off`, `automatic`, `required`).
    pub watchdog_mode: String,
    /// Node tag: never promote this node.
    pub nofailover: bool,
    /// Node tag: exclude from load balancing.
    pub noloadbalance: bool,
    /// Node tag: prefer this node as a clone source.
    pub clonefrom: bool,
    /// Node tag: never use as a synchronous standby.
    pub nosync: bool,
}

impl Default for PatroniTunables {
    fn default() -> Self {
        Self {
            max_connections: 100,
            shared_buffers: "256MB".to_string(),
            watchdog_mode: "off".to_string(),
            nofailover: false,
            noloadbalance: false,
            clonefrom: false,
            nosync: false,
        }
    }
}

/// A Patroni/etcd/HAProxy HA cluster component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresCluster {
    /// Cluster id.
    pub id: Uuid,
    /// Owning infrastructure.
    pub infrastructure_id: Uuid,
    /// Cluster scope name (Patroni scope).
    pub name: String,
    /// PostgreSQL major version.
    pub version: String,
    /// Replication mode.
    pub replication_mode: ReplicationMode,
    /// Patroni namespace.
    pub namespace: String,
    /// Superuser password.
    pub superuser_password: String,
    /// Replication user password.
    pub replication_password: String,
    /// Per-node CPU cap in cores.
    pub cpu_limit: Option<f64>,
    /// Per-node memory cap in megabytes.
    pub memory_limit_mb: Option<i64>,
    /// HAProxy write port (routes to the primary).
    pub write_port: i32,
    /// HAProxy read port (balances over replicas).
    pub read_port: i32,
    /// HAProxy stats port.
    pub stats_port: i32,
    /// pgBackRest full-backup retention, when backups are enabled.
    pub backup_retention: Option<i32>,
    /// pgBackRest process concurrency, when backups are enabled.
    pub backup_concurrency: Option<i32>,
    /// Patroni tunables.
    pub patroni: PatroniTunables,
    /// Current primary node, when known.
    pub primary_node_id: Option<Uuid>,
    /// Bridge network the cluster runs on.
    pub network_id: Option<String>,
}

/// Role of a node inside a PostgreSQL cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Consistency-store member.
    Etcd,
    /// Current write leader.
    Primary,
    /// Streaming replica.
    Replica,
    /// Load-balancer front.
    Haproxy,
}

impl NodeRole {
    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etcd => "etcd",
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Haproxy => "haproxy",
        }
    }

    /// Parse a role from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "etcd" => Some(Self::Etcd),
            "primary" => Some(Self::Primary),
            "replica" => Some(Self::Replica),
            "haproxy" => Some(Self::Haproxy),
            _ => None,
        }
    }

    /// Whether this role is a Patroni-managed database node.
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Primary | Self::Replica)
    }
}

/// A node belonging to a PostgreSQL cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node id.
    pub id: Uuid,
    /// Owning cluster.
    pub cluster_id: Uuid,
    /// Node name (`etcd-1`, `patroni-node-1`, `haproxy`).
    pub name: String,
    /// Runtime container id.
    pub container_id: String,
    /// Role inside the cluster.
    pub role: NodeRole,
    /// Advertised host port (Patroni API or service port).
    pub port: i32,
    /// Data volume name; null for haproxy.
    pub volume_id: Option<String>,
    /// Backup volume name; set on Patroni nodes when backups are enabled.
    pub backup_volume_id: Option<String>,
    /// Health flag projected from the runtime.
    pub is_healthy: bool,
    /// Replication delay in bytes; null for non-replicas.
    pub replication_lag_bytes: Option<i64>,
}

// ============================================================================
// NGINX cluster and reverse-proxy model
// ============================================================================

/// Load-balancing algorithm for an upstream pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LbAlgorithm {
    /// Round robin (nginx default; no directive emitted).
    #[default]
    RoundRobin,
    /// Fewest active connections.
    LeastConn,
    /// Client-IP hash.
    IpHash,
}

impl LbAlgorithm {
    /// Returns the string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConn => "least_conn",
            Self::IpHash => "ip_hash",
        }
    }

    /// Parse an algorithm from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(Self::RoundRobin),
            "least_conn" => Some(Self::LeastConn),
            "ip_hash" => Some(Self::IpHash),
            _ => None,
        }
    }

    /// The nginx directive for this algorithm, if one is needed.
    pub fn directive(&self) -> Option<&'static str> {
        match self {
            Self::RoundRobin => None,
            Self::LeastConn => Some("least_conn"),
            Self::IpHash => Some("ip_hash"),
        }
    }
}

/// A server inside an upstream pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamServer {
    /// `host:port` address.
    pub address: String,
    /// Relative weight.
    #[serde(default = "default_weight")]
    pub weight: i32,
    /// Failures before the server is considered down.
    #[serde(default = "default_max_fails")]
    pub max_fails: i32,
    /// Seconds a failed server stays out of rotation.
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout_secs: i32,
    /// Only used when all primaries are down.
    #[serde(default)]
    pub backup: bool,
}

fn default_weight() -> i32 {
    1
}

fn default_max_fails() -> i32 {
    3
}

fn default_fail_timeout() -> i32 {
    10
}

/// A named upstream pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    /// Pool name, referenced from locations.
    pub name: String,
    /// Balancing algorithm.
    #[serde(default)]
    pub algorithm: LbAlgorithm,
    /// Servers in the pool.
    pub servers: Vec<UpstreamServer>,
}

/// A location inside a server block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Path prefix.
    pub path: String,
    /// Upstream pool to proxy to; mutually exclusive with `proxy_pass`.
    #[serde(default)]
    pub upstream: Option<String>,
    /// Static proxy target; used when no upstream is named.
    #[serde(default)]
    pub proxy_pass: Option<String>,
}

/// A virtual server binding hostnames and a listen port to locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerBlock {
    /// `server_name` value.
    pub server_name: String,
    /// Listen port.
    pub listen: i32,
    /// Ordered locations.
    pub locations: Vec<Location>,
}

/// The full reverse-proxy routing model for an NGINX unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NginxRouting {
    /// Upstream pools.
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    /// Virtual servers.
    #[serde(default)]
    pub server_blocks: Vec<ServerBlock>,
}

/// Performance tunables carried on an NGINX cluster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NginxTunables {
    /// `worker_processes` value.
    pub worker_processes: String,
    /// `worker_connections` value.
    pub worker_connections: i32,
    /// `keepalive_timeout` seconds.
    pub keepalive_timeout: i32,
    /// Whether gzip is enabled.
    pub gzip: bool,
    /// Requests per second for the shared rate-limit zone, if limited.
    pub rate_limit_per_second: Option<i32>,
    /// `ssl_protocols` value.
    pub ssl_protocols: String,
}

impl Default for NginxTunables {
    fn default() -> Self {
        Self {
            worker_processes: "auto".to_string(),
            worker_connections: 1024,
            keepalive_timeout: 65,
            gzip: true,
            rate_limit_per_second: None,
            ssl_protocols: "TLSv1.2 TLSv1.3".to_string(),
        }
    }
}

/// An NGINX active-passive cluster component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxCluster {
    /// Cluster id.
    pub id: Uuid,
    /// Owning infrastructure.
    pub infrastructure_id: Uuid,
    /// Cluster name.
    pub name: String,
    /// Shared virtual IP advertised by the current master, if any.
    pub virtual_ip: Option<String>,
    /// Cluster-level HTTP port (base for node port scanning).
    pub http_port: i32,
    /// Cluster-level HTTPS port, if TLS is exposed.
    pub https_port: Option<i32>,
    /// Default balancing algorithm for generated configs.
    pub algorithm: LbAlgorithm,
    /// Effective nginx configuration.
    pub config: String,
    /// Bridge network the cluster runs on.
    pub network_id: Option<String>,
    /// Performance tunables.
    pub tunables: NginxTunables,
    /// Reverse-proxy routing model.
    pub routing: NginxRouting,
}

/// Role of a node inside an NGINX cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NginxRole {
    /// Active node holding the virtual IP.
    Master,
    /// Standby node.
    Backup,
}

impl NginxRole {
    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Backup => "backup",
        }
    }

    /// Parse a role from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::Master),
            "backup" => Some(Self::Backup),
            _ => None,
        }
    }
}

/// A node belonging to an NGINX cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxNode {
    /// Node id.
    pub id: Uuid,
    /// Owning cluster.
    pub cluster_id: Uuid,
    /// Node name (`<cluster>-nginx-<i>`).
    pub name: String,
    /// Runtime container id.
    pub container_id: String,
    /// Role inside the cluster.
    pub role: NginxRole,
    /// VRRP priority; the running node with the highest priority is master.
    pub priority: i32,
    /// Externally mapped HTTP port.
    pub http_port: i32,
    /// Externally mapped HTTPS port, if TLS is exposed.
    pub https_port: Option<i32>,
    /// Health flag projected from the runtime.
    pub is_healthy: bool,
}

// ============================================================================
// Failover events
// ============================================================================

/// Why a failover happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Operator-requested switchover.
    Manual,
    /// A node's container stopped or died.
    NodeFailure,
    /// Projected from a stop of the primary.
    Automatic,
}

impl FailoverReason {
    /// Returns the string representation of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::NodeFailure => "node_failure",
            Self::Automatic => "automatic",
        }
    }

    /// Parse a reason from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "node_failure" => Some(Self::NodeFailure),
            "automatic" => Some(Self::Automatic),
            _ => None,
        }
    }
}

/// Who triggered a failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    /// A caller over the API.
    User,
    /// The service itself.
    System,
}

impl TriggeredBy {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Immutable audit record of a role change. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event id.
    pub id: Uuid,
    /// Cluster the failover happened in.
    pub cluster_id: Uuid,
    /// Demoted node id, when it still existed.
    pub old_primary_id: Option<Uuid>,
    /// Demoted node name.
    pub old_primary_name: String,
    /// Promoted node id.
    pub new_primary_id: Uuid,
    /// Promoted node name.
    pub new_primary_name: String,
    /// Why it happened.
    pub reason: FailoverReason,
    /// Who triggered it.
    pub triggered_by: TriggeredBy,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Stacks
// ============================================================================

/// Lifecycle status of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    /// Resources being created.
    Creating,
    /// All resources created.
    Running,
    /// An update operation is in flight.
    Updating,
    /// Some resources unavailable.
    Degraded,
    /// A create or update failed.
    Failed,
    /// Teardown in progress.
    Deleting,
    /// Terminal; the stack row is retained.
    Deleted,
}

impl StackStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Updating => "updating",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }

    /// Parse a status from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "running" => Some(Self::Running),
            "updating" => Some(Self::Updating),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Resource types a stack can compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// A single PostgreSQL container.
    PostgresInstance,
    /// A PostgreSQL HA cluster.
    PostgresCluster,
    /// A single NGINX container.
    NginxInstance,
    /// An NGINX cluster.
    NginxCluster,
    /// A generic container.
    DockerService,
}

impl ResourceType {
    /// Returns the string representation of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgresInstance => "POSTGRES_INSTANCE",
            Self::PostgresCluster => "POSTGRES_CLUSTER",
            Self::NginxInstance => "NGINX_INSTANCE",
            Self::NginxCluster => "NGINX_CLUSTER",
            Self::DockerService => "DOCKER_SERVICE",
        }
    }

    /// Parse a type from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POSTGRES_INSTANCE" => Some(Self::PostgresInstance),
            "POSTGRES_CLUSTER" => Some(Self::PostgresCluster),
            "NGINX_INSTANCE" => Some(Self::NginxInstance),
            "NGINX_CLUSTER" => Some(Self::NginxCluster),
            "DOCKER_SERVICE" => Some(Self::DockerService),
            _ => None,
        }
    }
}

/// A user-facing composition of heterogeneous resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    /// Stack id.
    pub id: Uuid,
    /// Stack name.
    pub name: String,
    /// Deployment environment label.
    pub environment: String,
    /// Lifecycle status.
    pub status: StackStatus,
    /// Owning principal.
    pub user_id: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// When the stack was created.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A resource inside a stack. Back-references the infrastructure it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResource {
    /// Resource row id.
    pub id: Uuid,
    /// Owning stack.
    pub stack_id: Uuid,
    /// Name, unique within the stack.
    pub name: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Topology role tag, if any.
    pub role: Option<String>,
    /// Creation order; deletion runs in reverse of this.
    pub position: i32,
    /// Names of sibling resources this one depends on.
    pub depends_on: Vec<String>,
    /// Infrastructure produced for this resource; None if creation failed
    /// before the resource was reached, or the infrastructure was deleted
    /// out from under the stack.
    pub infrastructure_id: Option<Uuid>,
}

/// Kind of multi-step stack action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackOperationKind {
    /// Initial provisioning.
    Create,
    /// In-place change.
    Update,
    /// Teardown.
    Delete,
    /// Duplication into a new stack.
    Clone,
}

impl StackOperationKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Clone => "CLONE",
        }
    }

    /// Parse a kind from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "CLONE" => Some(Self::Clone),
            _ => None,
        }
    }
}

/// Status of a stack operation journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackOperationStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl StackOperationStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a status from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Journal entry for a multi-step stack action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOperation {
    /// Operation id.
    pub id: Uuid,
    /// Owning stack.
    pub stack_id: Uuid,
    /// What kind of action.
    pub kind: StackOperationKind,
    /// Current status.
    pub status: StackOperationStatus,
    /// Error text for failed operations.
    pub error: Option<String>,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
    /// When it finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Lifecycle events
// ============================================================================

/// Metadata attached to a published lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEventMetadata {
    /// Runtime container id.
    pub container_id: String,
    /// Container name, when the runtime reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Derived infrastructure status.
    pub status: String,
    /// Infrastructure id (duplicated for consumers that only read metadata).
    pub infrastructure_id: Uuid,
}

/// A lifecycle event published to the event bus on each status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The infrastructure the event is about.
    pub instance_id: Uuid,
    /// Owning principal.
    pub user_id: String,
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Raw runtime action (`start`, `die`, ...).
    pub action: String,
    /// When the event was observed.
    pub timestamp: DateTime<Utc>,
    /// Event metadata.
    pub metadata: LifecycleEventMetadata,
}

/// A real-time status record broadcast to websocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The infrastructure the update is about.
    pub infrastructure_id: Uuid,
    /// Runtime container id.
    pub container_id: String,
    /// Derived infrastructure status.
    pub status: String,
    /// Raw runtime action.
    pub action: String,
    /// When the update was observed.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infra_kind_round_trip() {
        for kind in [
            InfraKind::SinglePostgres,
            InfraKind::PostgresCluster,
            InfraKind::SingleNginx,
            InfraKind::NginxCluster,
            InfraKind::GenericContainer,
            InfraKind::DindEnvironment,
        ] {
            assert_eq!(InfraKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(InfraKind::parse("mystery"), None);
    }

    #[test]
    fn test_infra_status_round_trip() {
        for status in [
            InfraStatus::Creating,
            InfraStatus::Running,
            InfraStatus::Stopped,
            InfraStatus::Failed,
            InfraStatus::Degraded,
            InfraStatus::Deleting,
            InfraStatus::Deleted,
        ] {
            assert_eq!(InfraStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_resource_type_wire_format() {
        assert_eq!(ResourceType::PostgresInstance.as_str(), "POSTGRES_INSTANCE");
        assert_eq!(
            ResourceType::parse("DOCKER_SERVICE"),
            Some(ResourceType::DockerService)
        );

        let json = serde_json::to_string(&ResourceType::PostgresInstance).unwrap();
        assert_eq!(json, "\"POSTGRES_INSTANCE\"");
    }

    #[test]
    fn test_node_role_is_database() {
        assert!(NodeRole::Primary.is_database());
        assert!(NodeRole::Replica.is_database());
        assert!(!NodeRole::Etcd.is_database());
        assert!(!NodeRole::Haproxy.is_database());
    }

    #[test]
    fn test_patroni_tunables_defaults() {
        let t = PatroniTunables::default();
        assert_eq!(t.max_connections, 100);
        assert_eq!(t.shared_buffers, "256MB");
        assert_eq!(t.watchdog_mode, "off");
        assert!(!t.nofailover);
    }

    #[test]
    fn test_lb_algorithm_directive() {
        assert_eq!(LbAlgorithm::RoundRobin.directive(), None);
        assert_eq!(LbAlgorithm::LeastConn.directive(), Some("least_conn"));
        assert_eq!(LbAlgorithm::IpHash.directive(), Some("ip_hash"));
    }

    #[test]
    fn test_upstream_server_deserialization_defaults() {
        let server: UpstreamServer =
            serde_json::from_str(r#"{"address": "10.0.0.1:8080"}"#).unwrap();
        assert_eq!(server.weight, 1);
        assert_eq!(server.max_fails, 3);
        assert_eq!(server.fail_timeout_secs, 10);
        assert!(!server.backup);
    }

    #[test]
    fn test_lifecycle_event_type_field_name() {
        let event = LifecycleEvent {
            instance_id: Uuid::new_v4(),
            user_id: "u1".into(),
            event_type: "infrastructure".into(),
            action: "die".into(),
            timestamp: Utc::now(),
            metadata: LifecycleEventMetadata {
                container_id: "c1".into(),
                container_name: None,
                status: "stopped".into(),
                infrastructure_id: Uuid::new_v4(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "infrastructure");
        assert!(json["metadata"].get("container_name").is_none());
    }

    #[test]
    fn test_infrastructure_new_starts_creating() {
        let infra = Infrastructure::new("db", InfraKind::SinglePostgres, "u1");
        assert_eq!(infra.status, InfraStatus::Creating);
        assert_eq!(infra.kind, InfraKind::SinglePostgres);
    }
}
