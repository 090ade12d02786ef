// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface for container runtimes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from container runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The addressed container, volume, or network does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation clashed with current runtime state (name taken, port in use).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The runtime refused the operation for lack of resources.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The runtime daemon is unreachable or not responding.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other runtime error.
    #[error("{0}")]
    Other(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A container-port to host-port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub container: u16,
    /// Port on the host.
    pub host: u16,
}

/// A named volume mounted at a container path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Named volume.
    pub volume: String,
    /// Mount path inside the container.
    pub path: String,
}

/// Specification for creating a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name (deterministic, chosen by the caller).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables. Ordered map so container creation is deterministic.
    pub env: BTreeMap<String, String>,
    /// Container-to-host port mappings.
    pub ports: Vec<PortMapping>,
    /// Named volume mounts.
    pub volumes: Vec<VolumeMount>,
    /// Network to attach to (bridge network name), if any.
    pub network: Option<String>,
    /// DNS alias on the attached network.
    pub network_alias: Option<String>,
    /// Memory limit in megabytes.
    pub memory_mb: Option<i64>,
    /// CPU limit in whole or fractional cores.
    pub cpus: Option<f64>,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Create a spec with the given name and image and everything else empty.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Map a container port to a host port.
    pub fn port(mut self, container: u16, host: u16) -> Self {
        self.ports.push(PortMapping { container, host });
        self
    }

    /// Mount a named volume.
    pub fn volume(mut self, volume: impl Into<String>, path: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            volume: volume.into(),
            path: path.into(),
        });
        self
    }

    /// Attach to a network with an optional DNS alias.
    pub fn network(mut self, network: impl Into<String>, alias: Option<String>) -> Self {
        self.network = Some(network.into());
        self.network_alias = alias;
        self
    }
}

/// Observed state of a container, from inspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerState {
    /// Whether the container process is running.
    pub running: bool,
    /// Exit code of the last run (0 while running).
    pub exit_code: i64,
    /// Whether the runtime marked the container dead.
    pub dead: bool,
    /// Mapped ports, container port to host port.
    pub ports: HashMap<u16, u16>,
    /// Network name to container IP address.
    pub addresses: HashMap<String, String>,
    /// Environment as `KEY=value` strings.
    pub env: Vec<String>,
}

/// Result of an in-container command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code.
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecResult {
    /// Successful execution with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lifecycle action reported by the runtime event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Container created.
    Create,
    /// Container started.
    Start,
    /// Container stopped.
    Stop,
    /// Container process exited.
    Die,
    /// Container destroyed.
    Destroy,
    /// Container removed.
    Remove,
    /// Container restarted.
    Restart,
    /// Any action the port does not model.
    Other,
}

impl EventAction {
    /// Returns the string representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Die => "die",
            Self::Destroy => "destroy",
            Self::Remove => "remove",
            Self::Restart => "restart",
            Self::Other => "other",
        }
    }

    /// Parse an action from the runtime's wire string.
    pub fn parse(s: &str) -> Self {
        match s {
            "create" => Self::Create,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "die" => Self::Die,
            "destroy" => Self::Destroy,
            "remove" => Self::Remove,
            "restart" => Self::Restart,
            _ => Self::Other,
        }
    }
}

/// A single event from the runtime's lifecycle stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// What happened.
    pub action: EventAction,
    /// Container the event refers to.
    pub container_id: String,
    /// Container name from the event's actor attributes, if present.
    pub container_name: Option<String>,
}

/// Trait for container runtimes.
///
/// Runtimes are pure execution adapters - they do NOT touch the metadata
/// store. Persistence is handled by the calling service.
///
/// Start and stop are idempotent at this layer: asking for a state that
/// already holds returns `Ok`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Check connectivity to the runtime daemon.
    async fn ping(&self) -> Result<()>;

    /// Create a container and return its runtime id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Restart a container.
    async fn restart_container(&self, id: &str) -> Result<()>;

    /// Remove a container. With `force`, a running container is killed first.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect a container's current state.
    async fn inspect_container(&self, id: &str) -> Result<ContainerState>;

    /// Run a command inside a running container and wait for it.
    ///
    /// Returns the exit code and combined stdout+stderr. May block for many
    /// seconds; callers abandon (not undo) on cancellation.
    async fn exec_command(&self, id: &str, cmd: &[&str]) -> Result<ExecResult>;

    /// Fetch the last `tail` log lines of a container.
    async fn get_logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Fetch a one-shot stats sample for a container.
    async fn get_stats(&self, id: &str) -> Result<serde_json::Value>;

    /// Create a named volume.
    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Create a bridge network and return its id.
    async fn create_network(&self, name: &str) -> Result<String>;

    /// Remove a network.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Subscribe to the runtime's container event stream.
    ///
    /// Returns the receiving half of a bounded channel of `capacity` events.
    /// The producer forwards with `send().await` and must not drop events;
    /// a full channel therefore blocks the producer. The producer exits when
    /// the receiver is dropped or the upstream stream ends.
    async fn subscribe_events(&self, capacity: usize) -> Result<mpsc::Receiver<RuntimeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_action_round_trip() {
        for action in [
            EventAction::Create,
            EventAction::Start,
            EventAction::Stop,
            EventAction::Die,
            EventAction::Destroy,
            EventAction::Remove,
            EventAction::Restart,
        ] {
            assert_eq!(EventAction::parse(action.as_str()), action);
        }
    }

    #[test]
    fn test_event_action_unknown_maps_to_other() {
        assert_eq!(EventAction::parse("exec_create"), EventAction::Other);
        assert_eq!(EventAction::parse(""), EventAction::Other);
    }

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new("iaas-postgres-abc", "postgres:17")
            .env("POSTGRES_PASSWORD", "secret")
            .port(5432, 15432)
            .volume("iaas-postgres-abc-data", "/var/lib/postgresql/data")
            .network("iaas-net-abc", Some("db".to_string()));

        assert_eq!(spec.name, "iaas-postgres-abc");
        assert_eq!(spec.image, "postgres:17");
        assert_eq!(spec.env.get("POSTGRES_PASSWORD").unwrap(), "secret");
        assert_eq!(spec.ports, vec![PortMapping { container: 5432, host: 15432 }]);
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(spec.network.as_deref(), Some("iaas-net-abc"));
        assert_eq!(spec.network_alias.as_deref(), Some("db"));
    }

    #[test]
    fn test_exec_result_success() {
        assert!(ExecResult::ok("fine").success());
        assert!(
            !ExecResult {
                exit_code: 1,
                output: "boom".into()
            }
            .success()
        );
    }
}
