// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker Engine API backend for the container runtime port.
//!
//! Talks to the Docker daemon via bollard. Connection target comes from
//! `DOCKER_HOST` (`unix://` socket or `tcp://host:port`); the local socket
//! is the default.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HostConfig, NetworkCreateRequest, NetworkingConfig,
    PortBinding, VolumeCreateOptions,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, EventsOptionsBuilder, InspectContainerOptions,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, RemoveVolumeOptionsBuilder,
    RestartContainerOptions, StartContainerOptions, StatsOptionsBuilder,
    StopContainerOptionsBuilder,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::traits::{
    ContainerRuntime, ContainerSpec, ContainerState, EventAction, ExecResult, Result,
    RuntimeError, RuntimeEvent,
};

/// Seconds the daemon gets to stop a container before it is killed.
const STOP_TIMEOUT_SECS: i32 = 10;

/// Container runtime backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon described by `docker_host`.
    ///
    /// - `None` or `unix://...` uses the local socket defaults
    /// - `tcp://HOST:PORT` uses unencrypted HTTP
    pub fn connect(docker_host: Option<&str>) -> Result<Self> {
        let client = match docker_host {
            Some(host) if host.starts_with("tcp://") => {
                let addr = host.strip_prefix("tcp://").unwrap_or(host);
                Docker::connect_with_http(addr, 120, bollard::API_DEFAULT_VERSION)
            }
            _ => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self { client })
    }

    /// Connect using the `DOCKER_HOST` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::connect(std::env::var("DOCKER_HOST").ok().as_deref())
    }
}

/// Map a bollard error onto the port's failure contract.
fn map_docker_err(e: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error as E;
    match e {
        E::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound(message),
            409 => RuntimeError::Conflict(message),
            507 => RuntimeError::ResourceExhausted(message),
            _ => RuntimeError::Other(message),
        },
        E::IOError { err } => RuntimeError::Io(err),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

/// True for the daemon's "already in that state" response to start/stop.
fn is_not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let exposed_ports = (!spec.ports.is_empty()).then(|| {
            spec.ports
                .iter()
                .map(|p| (format!("{}/tcp", p.container), Default::default()))
                .collect()
        });

        let port_bindings = (!spec.ports.is_empty()).then(|| {
            spec.ports
                .iter()
                .map(|p| {
                    (
                        format!("{}/tcp", p.container),
                        Some(vec![PortBinding {
                            host_ip: Some("0.0.0.0".to_string()),
                            host_port: Some(p.host.to_string()),
                        }]),
                    )
                })
                .collect()
        });

        let binds = (!spec.volumes.is_empty()).then(|| {
            spec.volumes
                .iter()
                .map(|v| format!("{}:{}", v.volume, v.path))
                .collect()
        });

        let networking_config = spec.network.as_ref().map(|net| NetworkingConfig {
            endpoints_config: Some(HashMap::from([(
                net.clone(),
                EndpointSettings {
                    aliases: spec.network_alias.clone().map(|a| vec![a]),
                    ..Default::default()
                },
            )])),
        });

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            cmd: spec.command.clone(),
            exposed_ports,
            labels: (!spec.labels.is_empty())
                .then(|| spec.labels.clone().into_iter().collect()),
            networking_config,
            host_config: Some(HostConfig {
                port_bindings,
                binds,
                memory: spec.memory_mb.map(|m| m * 1024 * 1024),
                nano_cpus: spec.cpus.map(|c| (c * 1_000_000_000.0) as i64),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(map_docker_err)?;

        debug!(container_id = %created.id, name = %spec.name, "created container");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .client
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_docker_err(e)),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let options = StopContainerOptionsBuilder::new().t(STOP_TIMEOUT_SECS).build();
        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_docker_err(e)),
        }
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.client
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(map_docker_err)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(force).build()),
            )
            .await
            .map_err(map_docker_err)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let info = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_docker_err)?;

        let mut state = ContainerState::default();

        if let Some(s) = info.state {
            state.running = s.running.unwrap_or(false);
            state.exit_code = s.exit_code.unwrap_or(0);
            state.dead = s.dead.unwrap_or(false);
        }

        if let Some(net) = info.network_settings {
            if let Some(ports) = net.ports {
                for (key, bindings) in ports {
                    let container_port = key.split('/').next().and_then(|p| p.parse().ok());
                    let host_port = bindings
                        .as_ref()
                        .and_then(|b| b.first())
                        .and_then(|b| b.host_port.as_deref())
                        .and_then(|p| p.parse().ok());
                    if let (Some(c), Some(h)) = (container_port, host_port) {
                        state.ports.insert(c, h);
                    }
                }
            }
            if let Some(networks) = net.networks {
                for (name, endpoint) in networks {
                    if let Some(ip) = endpoint.ip_address
                        && !ip.is_empty()
                    {
                        state.addresses.insert(name, ip);
                    }
                }
            }
        }

        if let Some(config) = info.config {
            state.env = config.env.unwrap_or_default();
        }

        Ok(state)
    }

    async fn exec_command(&self, id: &str, cmd: &[&str]) -> Result<ExecResult> {
        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_docker_err)?;

        let mut output = String::new();
        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(map_docker_err)?
        {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message }) => {
                            output.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(map_docker_err(e)),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(map_docker_err)?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(0),
            output,
        })
    }

    async fn get_logs(&self, id: &str, tail: usize) -> Result<String> {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();

        let mut stream = self.client.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => out.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) => return Err(map_docker_err(e)),
            }
        }
        Ok(out)
    }

    async fn get_stats(&self, id: &str) -> Result<serde_json::Value> {
        let options = StatsOptionsBuilder::new().stream(false).build();
        let mut stream = self.client.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => {
                serde_json::to_value(&stats).map_err(|e| RuntimeError::Other(e.to_string()))
            }
            Some(Err(e)) => Err(map_docker_err(e)),
            None => Err(RuntimeError::Other(format!("no stats sample for {id}"))),
        }
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.client
            .create_volume(VolumeCreateOptions {
                name: Some(name.to_string()),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(map_docker_err)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.client
            .remove_volume(
                name,
                Some(RemoveVolumeOptionsBuilder::new().force(true).build()),
            )
            .await
            .map_err(map_docker_err)
    }

    async fn create_network(&self, name: &str) -> Result<String> {
        let created = self
            .client
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            })
            .await
            .map_err(map_docker_err)?;

        Ok(created.id)
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.client
            .remove_network(name)
            .await
            .map_err(map_docker_err)
    }

    async fn subscribe_events(&self, capacity: usize) -> Result<mpsc::Receiver<RuntimeEvent>> {
        let (tx, rx) = mpsc::channel(capacity);

        let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
        let options = EventsOptionsBuilder::new().filters(&filters).build();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut stream = client.events(Some(options));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => {
                        let Some(action) = message.action else { continue };
                        let Some(actor) = message.actor else { continue };
                        let Some(container_id) = actor.id else { continue };
                        let container_name = actor
                            .attributes
                            .as_ref()
                            .and_then(|a| a.get("name").cloned());

                        let event = RuntimeEvent {
                            action: EventAction::parse(&action),
                            container_id,
                            container_name,
                        };

                        // Bounded send: a full channel blocks here rather
                        // than dropping the event.
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "runtime event stream error");
                        break;
                    }
                }
            }
            debug!("runtime event producer stopped");
        });

        Ok(rx)
    }
}
