// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single NGINX container service.
//!
//! Same lifecycle template as the other single containers, plus routing
//! subresources: upstream pools and server blocks are stored on the
//! component, rendered into a config, and applied through the same
//! validate-then-reload path a cluster node uses.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use iaas_core::error::{Error, Result};
use iaas_core::model::{
    InfraKind, InfraStatus, Infrastructure, NginxRouting, NginxSingle, NginxTunables,
};
use iaas_runtime::{ContainerSpec, RuntimeError};

use crate::context::Ctx;
use crate::services::nginx_config;
use crate::services::{ServiceDeps, container_name, publish_lifecycle, status_from_state};

/// Request to create a single NGINX container.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNginxRequest {
    /// Display name.
    pub name: String,
    /// Host port for 80; defaults to 8080.
    #[serde(default)]
    pub http_port: Option<i32>,
    /// Host port for 443; TLS stays unexposed when unset.
    #[serde(default)]
    pub https_port: Option<i32>,
    /// Initial routing model; empty when unset.
    #[serde(default)]
    pub routing: Option<NginxRouting>,
}

/// Caller-facing view of a single NGINX container.
#[derive(Debug, Clone, Serialize)]
pub struct NginxSingleView {
    /// Infrastructure id.
    pub infrastructure_id: Uuid,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: InfraStatus,
    /// Host HTTP port.
    pub http_port: i32,
    /// Host HTTPS port, when TLS is exposed.
    pub https_port: Option<i32>,
    /// Routing model.
    pub routing: NginxRouting,
    /// Runtime container id, once created.
    pub container_id: Option<String>,
}

fn view(infra: &Infrastructure, component: &NginxSingle) -> NginxSingleView {
    NginxSingleView {
        infrastructure_id: infra.id,
        name: infra.name.clone(),
        status: infra.status,
        http_port: component.http_port,
        https_port: component.https_port,
        routing: component.routing.clone(),
        container_id: component.container_id.clone(),
    }
}

/// Service managing single NGINX containers.
pub struct NginxSingleService {
    deps: ServiceDeps,
}

impl NginxSingleService {
    /// Create the service over shared dependencies.
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    /// Create and start a single NGINX container.
    pub async fn create(&self, ctx: &Ctx, req: CreateNginxRequest) -> Result<NginxSingleView> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }

        let http_port = req.http_port.unwrap_or(8080);
        let routing = req.routing.unwrap_or_default();

        let infra = Infrastructure::new(&req.name, InfraKind::SingleNginx, &ctx.user_id);
        let component = NginxSingle {
            id: Uuid::new_v4(),
            infrastructure_id: infra.id,
            container_id: None,
            http_port,
            https_port: req.https_port,
            config: None,
            routing: routing.clone(),
        };
        self.deps.store.create_infrastructure(&infra).await?;
        self.deps.store.create_nginx_single(&component).await?;

        match self.provision(ctx, &infra, &component).await {
            Ok(container_id) => {
                self.deps
                    .store
                    .set_nginx_single_container(component.id, &container_id)
                    .await?;

                // Apply the initial routing model when one was supplied.
                if !routing.upstreams.is_empty() || !routing.server_blocks.is_empty() {
                    let config = nginx_config::default_config(&NginxTunables::default(), &routing);
                    if let Err(e) = nginx_config::apply_to_container(
                        self.deps.runtime.as_ref(),
                        &container_id,
                        &config,
                        Utc::now().timestamp(),
                    )
                    .await
                    {
                        warn!(infrastructure_id = %infra.id, error = %e, "initial routing apply failed");
                    } else {
                        self.deps
                            .store
                            .update_nginx_single_config(component.id, &config, &routing)
                            .await?;
                    }
                }

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
                    Some(container_name("nginx", infra.id, None)),
                    InfraStatus::Running,
                    "created",
                )
                .await;

                info!(infrastructure_id = %infra.id, "nginx instance created");
                let component = NginxSingle {
                    container_id: Some(container_id),
                    ..component
                };
                Ok(view(&infra, &component))
            }
            Err(e) => {
                let name = container_name("nginx", infra.id, None);
                if let Err(e) = self.deps.runtime.remove_container(&name, true).await
                    && !matches!(e, RuntimeError::NotFound(_))
                {
                    warn!(infrastructure_id = %infra.id, error = %e, "cleanup: failed to remove container");
                }
                self.deps
                    .store
                    .update_infrastructure_status(infra.id, InfraStatus::Failed)
                    .await?;
                Err(e.in_step(format!("create nginx instance {}", req.name)))
            }
        }
    }

    async fn provision(
        &self,
        ctx: &Ctx,
        infra: &Infrastructure,
        component: &NginxSingle,
    ) -> Result<String> {
        ctx.check_cancelled()?;

        let mut spec = ContainerSpec::new(container_name("nginx", infra.id, None), "nginx:1.27")
            .port(80, component.http_port as u16);
        if let Some(https) = component.https_port {
            spec = spec.port(443, https as u16);
        }

        let container_id = self.deps.runtime.create_container(&spec).await?;
        ctx.check_cancelled()?;
        self.deps.runtime.start_container(&container_id).await?;
        Ok(container_id)
    }

    /// Fetch the component, synchronising status from the runtime.
    pub async fn get(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<NginxSingleView> {
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

    /// Replace the routing model and apply the regenerated config.
    pub async fn update_routing(
        &self,
        _ctx: &Ctx,
        infra_id: Uuid,
        routing: NginxRouting,
    ) -> Result<NginxSingleView> {
        let (infra, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .clone()
            .ok_or_else(|| Error::PreconditionFailed("no container".into()))?;

        for upstream in &routing.upstreams {
            if upstream.servers.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "upstream {} has no servers",
                    upstream.name
                )));
            }
        }

        let config = nginx_config::default_config(&NginxTunables::default(), &routing);
        nginx_config::apply_to_container(
            self.deps.runtime.as_ref(),
            &container_id,
            &config,
            Utc::now().timestamp(),
        )
        .await?;

        self.deps
            .store
            .update_nginx_single_config(component.id, &config, &routing)
            .await?;

        let component = NginxSingle {
            config: Some(config),
            routing,
            ..component
        };
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

    /// Tail the container's logs.
    pub async fn logs(&self, _ctx: &Ctx, infra_id: Uuid, tail: usize) -> Result<String> {
        let (_, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container".into()))?;
        Ok(self.deps.runtime.get_logs(&container_id, tail).await?)
    }

    /// One-shot stats sample.
    pub async fn metrics(&self, _ctx: &Ctx, infra_id: Uuid) -> Result<serde_json::Value> {
        let (_, component) = self.load(infra_id).await?;
        let container_id = component
            .container_id
            .ok_or_else(|| Error::PreconditionFailed("no container".into()))?;
        Ok(self.deps.runtime.get_stats(&container_id).await?)
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

        self.deps.store.delete_nginx_single(component.id).await?;
        self.deps
            .store
            .update_infrastructure_status(infra.id, InfraStatus::Deleted)
            .await?;
        info!(infrastructure_id = %infra.id, "nginx instance deleted");
        Ok(())
    }

    async fn load(&self, infra_id: Uuid) -> Result<(Infrastructure, NginxSingle)> {
        let infra = self
            .deps
            .store
            .get_infrastructure(infra_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("infrastructure {infra_id}")))?;
        let component = self
            .deps
            .store
            .get_nginx_single_by_infra(infra_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("nginx instance for {infra_id}")))?;
        Ok((infra, component))
    }
}
