// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack composition engine.
//!
//! A stack is an ordered list of heterogeneous resources. Creation walks
//! the list in the supplied order (the order field is authoritative; the
//! dependency names feed validation and output wiring), resolving each
//! dependency's infrastructure through an in-memory name map and injecting
//! derived environment into dependent resources. Deletion walks the list
//! in reverse and never stops at a failed resource.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};
use uuid::Uuid;

use iaas_core::error::{Error, Result};
use iaas_core::model::{
    ResourceType, ServicePort, Stack, StackOperation, StackOperationKind, StackOperationStatus,
    StackResource, StackStatus,
};

use crate::context::Ctx;
use crate::services::docker_service::CreateContainerRequest;
use crate::services::nginx_cluster::CreateNginxClusterRequest;
use crate::services::nginx_single::CreateNginxRequest;
use crate::services::postgres_cluster::CreateClusterRequest;
use crate::services::postgres_single::CreatePostgresRequest;
use crate::services::{
    GenericContainerService, NginxClusterService, NginxSingleService, PostgresClusterService,
    PostgresSingleService, ServiceDeps,
};

/// One resource in a stack create request.
#[derive(Debug, Clone, Deserialize)]
pub struct StackResourceSpec {
    /// Name, unique within the stack.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Topology role tag.
    #[serde(default)]
    pub role: Option<String>,
    /// Creation order; deletion runs in reverse.
    pub order: i32,
    /// Names of sibling resources this one depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Type-specific configuration.
    #[serde(default)]
    pub spec: Value,
}

/// Request to create a stack.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStackRequest {
    /// Stack name.
    pub name: String,
    /// Deployment environment label; defaults to `dev`.
    #[serde(default)]
    pub environment: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Resources in creation order.
    pub resources: Vec<StackResourceSpec>,
}

/// One resource in a stack view, with live-resolved outputs.
#[derive(Debug, Clone, Serialize)]
pub struct StackResourceView {
    /// Resource name.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Topology role tag.
    pub role: Option<String>,
    /// Creation order.
    pub order: i32,
    /// Dependency names.
    pub depends_on: Vec<String>,
    /// Infrastructure backing this resource, when it still exists.
    pub infrastructure_id: Option<Uuid>,
    /// Type-specific outputs, recomputed on every read.
    pub outputs: Value,
}

/// Caller-facing view of a stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackView {
    /// Stack id.
    pub id: Uuid,
    /// Stack name.
    pub name: String,
    /// Deployment environment label.
    pub environment: String,
    /// Lifecycle status.
    pub status: StackStatus,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Resources in creation order.
    pub resources: Vec<StackResourceView>,
}

/// Result of a stack delete: the stack always reaches `deleted`, failed
/// resource deletions are reported back.
#[derive(Debug, Clone, Serialize)]
pub struct StackDeleteReport {
    /// Per-resource failure descriptions.
    pub errors: Vec<String>,
}

/// The stack engine.
pub struct StackService {
    deps: ServiceDeps,
    postgres_single: Arc<PostgresSingleService>,
    postgres_cluster: Arc<PostgresClusterService>,
    nginx_single: Arc<NginxSingleService>,
    nginx_cluster: Arc<NginxClusterService>,
    generic: Arc<GenericContainerService>,
}

impl StackService {
    /// Create the engine over the concrete services it dispatches to.
    pub fn new(
        deps: ServiceDeps,
        postgres_single: Arc<PostgresSingleService>,
        postgres_cluster: Arc<PostgresClusterService>,
        nginx_single: Arc<NginxSingleService>,
        nginx_cluster: Arc<NginxClusterService>,
        generic: Arc<GenericContainerService>,
    ) -> Self {
        Self {
            deps,
            postgres_single,
            postgres_cluster,
            nginx_single,
            nginx_cluster,
            generic,
        }
    }

    // ==================================================================
    // Validation
    // ==================================================================

    /// Reject malformed compositions before any side effect.
    fn validate(resources: &[StackResourceSpec]) -> Result<()> {
        if resources.is_empty() {
            return Err(Error::InvalidInput("a stack needs at least one resource".into()));
        }

        let mut names = HashSet::new();
        for resource in resources {
            if resource.name.trim().is_empty() {
                return Err(Error::InvalidInput("resource names must not be empty".into()));
            }
            if !names.insert(resource.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate resource name {}",
                    resource.name
                )));
            }
        }

        let order_by_name: HashMap<&str, i32> = resources
            .iter()
            .map(|r| (r.name.as_str(), r.order))
            .collect();

        for resource in resources {
            for dep in &resource.depends_on {
                let Some(&dep_order) = order_by_name.get(dep.as_str()) else {
                    return Err(Error::InvalidInput(format!(
                        "resource {} depends on unknown resource {dep}",
                        resource.name
                    )));
                };
                if dep == &resource.name {
                    return Err(Error::InvalidInput(format!(
                        "resource {} depends on itself",
                        resource.name
                    )));
                }
                if dep_order >= resource.order {
                    return Err(Error::InvalidInput(format!(
                        "resource {} (order {}) depends on {dep} (order {dep_order}); \
                         dependencies must be created first",
                        resource.name, resource.order
                    )));
                }
            }
        }

        // Kahn's algorithm over the dependency edges; anything left over
        // is part of a cycle.
        let mut in_degree: HashMap<&str, usize> = resources
            .iter()
            .map(|r| (r.name.as_str(), r.depends_on.len()))
            .collect();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0;
        while let Some(name) = ready.pop() {
            visited += 1;
            for resource in resources {
                if resource.depends_on.iter().any(|d| d == name)
                    && let Some(degree) = in_degree.get_mut(resource.name.as_str())
                {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(resource.name.as_str());
                    }
                }
            }
        }
        if visited != resources.len() {
            return Err(Error::InvalidInput(
                "resource dependencies contain a cycle".into(),
            ));
        }

        Ok(())
    }

    // ==================================================================
    // Create
    // ==================================================================

    /// Create a stack, walking resources in their declared order.
    pub async fn create(&self, ctx: &Ctx, req: CreateStackRequest) -> Result<StackView> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        Self::validate(&req.resources)?;

        let now = Utc::now();
        let stack = Stack {
            id: Uuid::new_v4(),
            name: req.name.clone(),
            environment: req.environment.unwrap_or_else(|| "dev".to_string()),
            status: StackStatus::Creating,
            user_id: ctx.user_id.clone(),
            tags: req.tags.clone(),
            created_at: now,
            updated_at: now,
        };
        let operation = StackOperation {
            id: Uuid::new_v4(),
            stack_id: stack.id,
            kind: StackOperationKind::Create,
            status: StackOperationStatus::InProgress,
            error: None,
            started_at: now,
            finished_at: None,
        };
        self.deps.store.create_stack(&stack).await?;
        self.deps.store.create_stack_operation(&operation).await?;

        let mut resources = req.resources;
        resources.sort_by_key(|r| r.order);

        // name -> (infrastructure id, type); feeds dependency wiring.
        let mut created: HashMap<String, (Uuid, ResourceType)> = HashMap::new();

        for resource in &resources {
            ctx.check_cancelled()?;
            match self.create_resource(ctx, resource, &created).await {
                Ok(infra_id) => {
                    created.insert(resource.name.clone(), (infra_id, resource.resource_type));
                    self.deps
                        .store
                        .create_stack_resource(&StackResource {
                            id: Uuid::new_v4(),
                            stack_id: stack.id,
                            name: resource.name.clone(),
                            resource_type: resource.resource_type,
                            role: resource.role.clone(),
                            position: resource.order,
                            depends_on: resource.depends_on.clone(),
                            infrastructure_id: Some(infra_id),
                        })
                        .await?;
                }
                Err(e) => {
                    // Previously created resources remain; deletion is a
                    // separate explicit action.
                    let wrapped = e.in_step(format!("create stack resource {}", resource.name));
                    self.deps
                        .store
                        .update_stack_status(stack.id, StackStatus::Failed)
                        .await?;
                    self.deps
                        .store
                        .finish_stack_operation(
                            operation.id,
                            StackOperationStatus::Failed,
                            Some(&wrapped.to_string()),
                        )
                        .await?;
                    return Err(wrapped);
                }
            }
        }

        self.deps
            .store
            .update_stack_status(stack.id, StackStatus::Running)
            .await?;
        self.deps
            .store
            .finish_stack_operation(operation.id, StackOperationStatus::Completed, None)
            .await?;

        info!(stack_id = %stack.id, resources = resources.len(), "stack created");
        self.get(ctx, stack.id).await
    }

    /// Dispatch one resource create, with defaults and dependency wiring.
    async fn create_resource(
        &self,
        ctx: &Ctx,
        resource: &StackResourceSpec,
        created: &HashMap<String, (Uuid, ResourceType)>,
    ) -> Result<Uuid> {
        let spec = &resource.spec;
        match resource.resource_type {
            ResourceType::PostgresInstance => {
                let view = self
                    .postgres_single
                    .create(
                        ctx,
                        CreatePostgresRequest {
                            name: resource.name.clone(),
                            version: str_field(spec, "version"),
                            password: str_field(spec, "password")
                                .unwrap_or_else(|| "postgres".to_string()),
                            port: int_field(spec, "port"),
                            database: str_field(spec, "database"),
                            username: str_field(spec, "username"),
                            memory_limit_mb: int_field(spec, "memory_limit_mb").map(i64::from),
                            cpu_limit: spec.get("cpu_limit").and_then(Value::as_f64),
                        },
                    )
                    .await?;
                Ok(view.infrastructure_id)
            }
            ResourceType::PostgresCluster => {
                let view = self
                    .postgres_cluster
                    .create(
                        ctx,
                        CreateClusterRequest {
                            name: resource.name.clone(),
                            node_count: int_field(spec, "node_count").map(|n| n as u32),
                            postgres_version: str_field(spec, "postgres_version"),
                            postgres_password: str_field(spec, "postgres_password")
                                .unwrap_or_else(|| "postgres".to_string()),
                            replication_mode: str_field(spec, "replication_mode")
                                .and_then(|m| iaas_core::model::ReplicationMode::parse(&m)),
                            namespace: str_field(spec, "namespace"),
                            cpu_limit: spec.get("cpu_limit").and_then(Value::as_f64),
                            memory_limit_mb: int_field(spec, "memory_limit_mb").map(i64::from),
                            write_port: int_field(spec, "write_port"),
                            read_port: int_field(spec, "read_port"),
                            stats_port: int_field(spec, "stats_port"),
                            node_port_base: int_field(spec, "node_port_base"),
                            backup_enabled: spec
                                .get("backup_enabled")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                            backup_retention: int_field(spec, "backup_retention"),
                            backup_concurrency: int_field(spec, "backup_concurrency"),
                            patroni: None,
                        },
                    )
                    .await?;
                Ok(view.infrastructure_id)
            }
            ResourceType::NginxInstance => {
                let view = self
                    .nginx_single
                    .create(
                        ctx,
                        CreateNginxRequest {
                            name: resource.name.clone(),
                            http_port: int_field(spec, "http_port").or(Some(8080)),
                            https_port: int_field(spec, "https_port"),
                            routing: None,
                        },
                    )
                    .await?;
                Ok(view.infrastructure_id)
            }
            ResourceType::NginxCluster => {
                let view = self
                    .nginx_cluster
                    .create(
                        ctx,
                        CreateNginxClusterRequest {
                            name: resource.name.clone(),
                            node_count: int_field(spec, "node_count").map(|n| n as u32),
                            virtual_ip: str_field(spec, "virtual_ip"),
                            http_port: int_field(spec, "http_port"),
                            https_port: int_field(spec, "https_port"),
                            algorithm: None,
                            tunables: None,
                            routing: None,
                        },
                    )
                    .await?;
                Ok(view.infrastructure_id)
            }
            ResourceType::DockerService => {
                let image = str_field(spec, "image").ok_or_else(|| {
                    Error::InvalidInput(format!("resource {} needs an image", resource.name))
                })?;
                let mut env: BTreeMap<String, String> = spec
                    .get("env")
                    .and_then(Value::as_object)
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();

                // Dependency wiring: derived connection variables for
                // postgres dependencies.
                for dep in &resource.depends_on {
                    let Some((infra_id, dep_type)) = created.get(dep) else {
                        continue;
                    };
                    match dep_type {
                        ResourceType::PostgresInstance => {
                            if let Some(component) = self
                                .deps
                                .store
                                .get_postgres_single_by_infra(*infra_id)
                                .await?
                            {
                                env.insert("DATABASE_HOST".to_string(), dep.clone());
                                env.insert(
                                    "DATABASE_PORT".to_string(),
                                    component.port.to_string(),
                                );
                            }
                        }
                        ResourceType::PostgresCluster => {
                            if let Some(cluster) = self
                                .deps
                                .store
                                .get_postgres_cluster_by_infra(*infra_id)
                                .await?
                            {
                                env.insert("DATABASE_HOST".to_string(), dep.clone());
                                env.insert(
                                    "DATABASE_PORT".to_string(),
                                    cluster.write_port.to_string(),
                                );
                            }
                        }
                        _ => {}
                    }
                }

                let ports = spec
                    .get("ports")
                    .cloned()
                    .map(serde_json::from_value::<Vec<ServicePort>>)
                    .transpose()?
                    .unwrap_or_default();
                let command = spec
                    .get("command")
                    .cloned()
                    .map(serde_json::from_value::<Vec<String>>)
                    .transpose()?;

                let view = self
                    .generic
                    .create(
                        ctx,
                        CreateContainerRequest {
                            name: resource.name.clone(),
                            image,
                            env,
                            ports,
                            command,
                            memory_limit_mb: int_field(spec, "memory_limit_mb").map(i64::from),
                            cpu_limit: spec.get("cpu_limit").and_then(Value::as_f64),
                        },
                    )
                    .await?;
                Ok(view.infrastructure_id)
            }
        }
    }

    // ==================================================================
    // Read
    // ==================================================================

    /// Stack view with type-specific outputs resolved live on every read.
    pub async fn get(&self, ctx: &Ctx, stack_id: Uuid) -> Result<StackView> {
        let stack = self
            .deps
            .store
            .get_stack(stack_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stack {stack_id}")))?;
        let resources = self.deps.store.list_stack_resources(stack_id).await?;

        let mut views = Vec::with_capacity(resources.len());
        for resource in &resources {
            let outputs = self.resolve_outputs(ctx, resource).await;
            views.push(StackResourceView {
                name: resource.name.clone(),
                resource_type: resource.resource_type,
                role: resource.role.clone(),
                order: resource.position,
                depends_on: resource.depends_on.clone(),
                infrastructure_id: resource.infrastructure_id,
                outputs,
            });
        }

        Ok(StackView {
            id: stack.id,
            name: stack.name,
            environment: stack.environment,
            status: stack.status,
            tags: stack.tags,
            resources: views,
        })
    }

    /// List stacks for a principal.
    pub async fn list(&self, ctx: &Ctx) -> Result<Vec<Stack>> {
        self.deps.store.list_stacks(Some(&ctx.user_id)).await
    }

    /// Per-type outputs; a resource whose infrastructure is gone reports
    /// itself unavailable instead of failing the whole view.
    async fn resolve_outputs(&self, ctx: &Ctx, resource: &StackResource) -> Value {
        let Some(infra_id) = resource.infrastructure_id else {
            return json!({ "available": false });
        };

        let outputs = match resource.resource_type {
            ResourceType::PostgresInstance => {
                self.postgres_single.get(ctx, infra_id).await.map(|v| {
                    json!({
                        "connection_string": v.connection_string,
                        "port": v.port,
                        "status": v.status,
                    })
                })
            }
            ResourceType::PostgresCluster => self.postgres_cluster.get(ctx, infra_id).await.map(|v| {
                json!({
                    "endpoints": v.endpoints,
                    "node_count": v.patroni_node_count,
                    "replication_mode": v.replication_mode,
                    "status": v.status,
                })
            }),
            ResourceType::NginxInstance => self.nginx_single.get(ctx, infra_id).await.map(|v| {
                json!({
                    "http_port": v.http_port,
                    "https_port": v.https_port,
                    "status": v.status,
                })
            }),
            ResourceType::NginxCluster => self.nginx_cluster.get(ctx, infra_id).await.map(|v| {
                json!({
                    "endpoints": v.endpoints,
                    "virtual_ip": v.virtual_ip,
                    "status": v.status,
                })
            }),
            ResourceType::DockerService => self.generic.get(ctx, infra_id).await.map(|v| {
                json!({
                    "name": v.name,
                    "status": v.status,
                })
            }),
        };

        outputs.unwrap_or_else(|_| json!({ "available": false }))
    }

    // ==================================================================
    // Delete
    // ==================================================================

    /// Delete resources in reverse order; one failure never stops the rest.
    pub async fn delete(&self, ctx: &Ctx, stack_id: Uuid) -> Result<StackDeleteReport> {
        let stack = self
            .deps
            .store
            .get_stack(stack_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stack {stack_id}")))?;

        let operation = StackOperation {
            id: Uuid::new_v4(),
            stack_id: stack.id,
            kind: StackOperationKind::Delete,
            status: StackOperationStatus::InProgress,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.deps.store.create_stack_operation(&operation).await?;
        self.deps
            .store
            .update_stack_status(stack.id, StackStatus::Deleting)
            .await?;

        let resources = self.deps.store.list_stack_resources(stack_id).await?;
        let mut errors = Vec::new();

        for resource in resources.iter().rev() {
            let Some(infra_id) = resource.infrastructure_id else {
                continue;
            };
            if let Err(e) = self.dispatch_delete(ctx, resource.resource_type, infra_id).await {
                error!(
                    stack_id = %stack.id,
                    resource = %resource.name,
                    error = %e,
                    "failed to delete stack resource"
                );
                errors.push(format!("{}: {e}", resource.name));
            }
        }

        self.deps.store.delete_stack_resources(stack_id).await?;
        self.deps
            .store
            .update_stack_status(stack.id, StackStatus::Deleted)
            .await?;

        let (status, error_text) = if errors.is_empty() {
            (StackOperationStatus::Completed, None)
        } else {
            (StackOperationStatus::Failed, Some(errors.join("; ")))
        };
        self.deps
            .store
            .finish_stack_operation(operation.id, status, error_text.as_deref())
            .await?;

        info!(stack_id = %stack.id, errors = errors.len(), "stack deleted");
        Ok(StackDeleteReport { errors })
    }

    async fn dispatch_delete(
        &self,
        ctx: &Ctx,
        resource_type: ResourceType,
        infra_id: Uuid,
    ) -> Result<()> {
        match resource_type {
            ResourceType::PostgresInstance => self.postgres_single.delete(ctx, infra_id).await,
            ResourceType::PostgresCluster => self.postgres_cluster.delete(ctx, infra_id).await,
            ResourceType::NginxInstance => self.nginx_single.delete(ctx, infra_id).await,
            ResourceType::NginxCluster => self.nginx_cluster.delete(ctx, infra_id).await,
            ResourceType::DockerService => self.generic.delete(ctx, infra_id).await,
        }
    }

    // ==================================================================
    // Start / stop / restart
    // ==================================================================

    /// Start resources in list order.
    pub async fn start(&self, ctx: &Ctx, stack_id: Uuid) -> Result<()> {
        let resources = self.load_resources(stack_id).await?;
        let mut failures = Vec::new();
        for resource in &resources {
            if let Some(infra_id) = resource.infrastructure_id
                && let Err(e) = self.dispatch_start(ctx, resource.resource_type, infra_id).await
            {
                failures.push(format!("{}: {e}", resource.name));
            }
        }
        self.finish_lifecycle(stack_id, StackStatus::Running, "start stack", failures)
            .await
    }

    /// Stop resources in reverse order.
    pub async fn stop(&self, ctx: &Ctx, stack_id: Uuid) -> Result<()> {
        let resources = self.load_resources(stack_id).await?;
        let mut failures = Vec::new();
        for resource in resources.iter().rev() {
            if let Some(infra_id) = resource.infrastructure_id
                && let Err(e) = self.dispatch_stop(ctx, resource.resource_type, infra_id).await
            {
                failures.push(format!("{}: {e}", resource.name));
            }
        }
        self.finish_lifecycle(stack_id, StackStatus::Running, "stop stack", failures)
            .await
    }

    /// Stop in reverse order, then start in order.
    pub async fn restart(&self, ctx: &Ctx, stack_id: Uuid) -> Result<()> {
        self.stop(ctx, stack_id).await?;
        self.start(ctx, stack_id).await
    }

    async fn finish_lifecycle(
        &self,
        stack_id: Uuid,
        on_success: StackStatus,
        action: &str,
        failures: Vec<String>,
    ) -> Result<()> {
        if failures.is_empty() {
            self.deps
                .store
                .update_stack_status(stack_id, on_success)
                .await?;
            Ok(())
        } else {
            self.deps
                .store
                .update_stack_status(stack_id, StackStatus::Degraded)
                .await?;
            Err(Error::PartialSuccess {
                message: action.to_string(),
                failures,
            })
        }
    }

    async fn dispatch_start(
        &self,
        ctx: &Ctx,
        resource_type: ResourceType,
        infra_id: Uuid,
    ) -> Result<()> {
        match resource_type {
            ResourceType::PostgresInstance => self.postgres_single.start(ctx, infra_id).await,
            ResourceType::PostgresCluster => self.postgres_cluster.start(ctx, infra_id).await,
            ResourceType::NginxInstance => self.nginx_single.start(ctx, infra_id).await,
            ResourceType::NginxCluster => self.nginx_cluster.start(ctx, infra_id).await,
            ResourceType::DockerService => self.generic.start(ctx, infra_id).await,
        }
    }

    async fn dispatch_stop(
        &self,
        ctx: &Ctx,
        resource_type: ResourceType,
        infra_id: Uuid,
    ) -> Result<()> {
        match resource_type {
            ResourceType::PostgresInstance => self.postgres_single.stop(ctx, infra_id).await,
            ResourceType::PostgresCluster => self.postgres_cluster.stop(ctx, infra_id).await,
            ResourceType::NginxInstance => self.nginx_single.stop(ctx, infra_id).await,
            ResourceType::NginxCluster => self.nginx_cluster.stop(ctx, infra_id).await,
            ResourceType::DockerService => self.generic.stop(ctx, infra_id).await,
        }
    }

    async fn load_resources(&self, stack_id: Uuid) -> Result<Vec<StackResource>> {
        self.deps
            .store
            .get_stack(stack_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stack {stack_id}")))?;
        self.deps.store.list_stack_resources(stack_id).await
    }
}

fn str_field(spec: &Value, key: &str) -> Option<String> {
    spec.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(spec: &Value, key: &str) -> Option<i32> {
    spec.get(key).and_then(Value::as_i64).map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, order: i32, deps: &[&str]) -> StackResourceSpec {
        StackResourceSpec {
            name: name.into(),
            resource_type: ResourceType::DockerService,
            role: None,
            order,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            spec: json!({"image": "busybox"}),
        }
    }

    #[test]
    fn test_validate_accepts_linear_chain() {
        let resources = vec![spec("db", 1, &[]), spec("app", 2, &["db"])];
        assert!(StackService::validate(&resources).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let resources = vec![spec("db", 1, &[]), spec("db", 2, &[])];
        assert!(StackService::validate(&resources).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let resources = vec![spec("app", 1, &["missing"])];
        assert!(StackService::validate(&resources).is_err());
    }

    #[test]
    fn test_validate_rejects_order_inversions() {
        // app is created before its dependency; the order field is
        // authoritative, so this composition can never work.
        let resources = vec![spec("db", 2, &[]), spec("app", 1, &["db"])];
        assert!(StackService::validate(&resources).is_err());
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let resources = vec![spec("app", 1, &["app"])];
        assert!(StackService::validate(&resources).is_err());
    }
}
