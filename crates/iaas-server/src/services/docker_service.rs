// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic container service.
//!
//! Runs a caller-supplied image under the same lifecycle template as the
//! other single containers. The stack engine uses this type for
//! dependency-aware application containers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use iaas_core::error::{Error, Result};
use iaas_core::model::{DockerService, InfraKind, InfraStatus, Infrastructure, ServicePort};
use iaas_runtime::{ContainerSpec, RuntimeError};

use crate::context::Ctx;
use crate::services::{ServiceDeps, container_name, publish_lifecycle, status_from_state};

/// Request to create a generic container.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContainerRequest {
    /// Display name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container-to-host port mappings.
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    /// Command override.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Memory cap in megabytes.
    #[serde(default)]
    pub memory_limit_mb: Option<i64>,
    /// CPU cap in cores.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
}

/// Caller-facing view of a generic container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerView {
    /// Infrastructure id.
    pub infrastructure_id: Uuid,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: InfraStatus,
    /// Image reference.
    pub image: String,
    /// Port mappings.
    pub ports: Vec<ServicePort>,
    /// Runtime container id, once created.
    pub container_id: Option<String>,
}

fn view(infra: &Infrastructure, component: &DockerService) -> ContainerView {
    ContainerView {
        infrastructure_id: infra.id,
        name: infra.name.clone(),
        status: infra.status,
        image: component.image.clone(),
        ports: component.ports.clone(),
        container_id: component.container_id.clone(),
    }
}

/// Service managing generic containers.
pub struct GenericContainerService {
    deps: ServiceDeps,
}

impl GenericContainerService {
    /// Create the service over shared dependencies.
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    /// Create and start a generic container.
    pub async fn create(&self, ctx: &Ctx, req: CreateContainerRequest) -> Result<ContainerView> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        if req.image.trim().is_empty() {
            return Err(Error::InvalidInput("image must not be empty".into()));
        }

        let infra = Infrastructure::new(&req.name, InfraKind::GenericContainer, &ctx.user_id);
        let component = DockerService {
            id: Uuid::new_v4(),
            infrastructure_id: infra.id,
            container_id: None,
            image: req.image.clone(),
            env: req.env.clone(),
            ports: req.ports.clone(),
            command: req.command.clone(),
        };
        self.deps.store.create_infrastructure(&infra).await?;
        self.deps.store.create_docker_service(&component).await?;

        ctx.check_cancelled()?;

        let mut spec = ContainerSpec::new(container_name("docker", infra.id, None), &req.image);
        spec.env = req.env;
        spec.ports = req
            .ports
            .iter()
            .map(|p| iaas_runtime::PortMapping {
                container: p.container as u16,
                host: p.host as u16,
            })
            .collect();
        spec.command = req.command;
        spec.memory_mb = req.memory_limit_mb;
        spec.cpus = req.cpu_limit;

        let provision = async {
            let container_id = self.deps.runtime.create_container(&spec).await?;
            self.deps.runtime.start_container(&container_id).await?;
            Ok::<_, Error>(container_id)
        };

        match provision.await {
            Ok(container_id) => {
                self.deps
                    .store
                    .set_docker_service_container(component.id, &container_id)
                    .await?;
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Running)
                    .await?;

                let mut infra = infra;
                infra.status = InfraStatus::Running;
                publish_lifecycle(
                    &self.deps.events,
                    &infra,
                    &container_id,
                    Some(spec.name.clone()),
                    InfraStatus::Running,
                    "created",
                )
                .await;

                info!(infrastructure_id = %infra.id, image = %component.image, "container created");
                let component = DockerService {
                    container_id: Some(container_id),
                    ..component
                };
                Ok(view(&infra, &component))
            }
            Err(e) => {
                if let Err(e) = self.deps.runtime.remove_container(&spec.name, true).await
                    && !matches!(e, RuntimeError::NotFound(_))
                {
                    warn!(infrastructure_id = %infra.id, error = %e, "cleanup: failed to remove container");
                }
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Failed)
                    .await?;
                Err(e.in_step(format!("create container {}", req.name)))
            }
        }
    }

    /// Fetch the component, synchronising status from the runtime.
    pub async fn get(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<ContainerView> {
        let (mut infra, component) = self.load(infra_id).await?;

        if !matches!(infra.status, InfraStatus::Deleting | InfraStatus::Deleted)
            && let Some(container_id) = component.container_id.as_deref()
        {
            let status = match self.deps.runtime.inspect_container(container_id).await {
                Ok(state) => Some(status_from_state(&state)),
                Err(RuntimeError::NotFound(_)) => (infra.status != InfraStatus::Stopped)
                    .then_some(InfraStatus::Stopped),
                Err(e) => return Err(e.into()),
            };
            if let Some(status) = status
                && status != infra.status
            {
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, status)
                    .await?;
                infra.status = status;
            }
        }

        Ok(view(&infra, &component))
    }

    /// Start the container.
    pub async fn start(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<()> {
        let (infra, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container to start".into()))?;
        self.deps.runtime.start_container(&container_id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Running)
            .await?;
        Ok(())
    }

    /// Stop the container.
    pub async fn stop(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<()> {
        let (infra, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container to stop".into()))?;
        self.deps.runtime.stop_container(&container_id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Stopped)
            .await?;
        Ok(())
    }

    /// Restart the container.
    pub async fn restart(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<()> {
        let (infra, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container to restart".into()))?;
        self.deps.runtime.restart_container(&container_id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Running)
            .await?;
        Ok(())
    }

    /// Tail the container's logs.
    pub async fn logs(&self, _ctx: &Ctx, infra_id: Uuid, tail: usize) -> Result<String> {
        let (_, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container".into()))?;
        Ok(self.deps.runtime.get_logs(&container_id, tail).await?)
    }

    /// Two-phase delete with best-effort container removal.
    pub async fn delete(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<()> {
        let (infra, component) = self.load(infra_id).await?;

        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleting)
            .await?;

        if let Some(container_id) = &component.container_id {
            let _ = self.deps.runtime.stop_container(container_id).await;
            if let Err(e) = self.deps.runtime.remove_container(container_id, true).await
                && !matches!(e, RuntimeError::NotFound(_))
            {
                warn!(infrastructure_id = %infra.id, error = %e, "delete: failed to remove container");
            }
        }

        self.deps.store.delete_docker_service(component.id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleted)
            .await?;
        info!(infrastructure_id = %infra.id, "container deleted");
        Ok(())
    }

    async fn load(&self, infra_id: Uuid) -> Result<(Infrastructure, DockerService)> {
        let infra = self
            .deps
            .store
            .get_infrastructure(infra_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("infrastructure {infra_id}")))?;
        let component = self
            .deps
            .store
            .get_docker_service_by_infra(infra_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("container for {infra_id}")))?;
        Ok((infra, component))
    }
}
