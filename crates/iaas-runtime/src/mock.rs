// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! An in-memory implementation of the container runtime port. Containers,
//! volumes, and networks live in a table; exec calls are answered from
//! scripted rules; lifecycle operations emit the same events the Docker
//! backend would, so the reconciliation loop can be tested end to end
//! without a daemon.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use crate::traits::{
    ContainerRuntime, ContainerSpec, ContainerState, EventAction, ExecResult, Result,
    RuntimeError, RuntimeEvent,
};

/// A container tracked by the mock runtime.
#[derive(Debug, Clone)]
pub struct MockContainer {
    /// Runtime id (`mock-<n>`).
    pub id: String,
    /// Container name.
    pub name: String,
    /// The spec it was created from.
    pub spec: ContainerSpec,
    /// Whether the container is running.
    pub running: bool,
    /// Exit code of the last stop.
    pub exit_code: i64,
    /// Whether the container is marked dead.
    pub dead: bool,
}

/// Scripted response for an exec call.
#[derive(Debug, Clone)]
struct ExecRule {
    /// Substring matched against the container name.
    container: String,
    /// Substring matched against the space-joined command.
    command: String,
    result: ExecResult,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    creation_order: Vec<String>,
    volumes: BTreeSet<String>,
    networks: HashMap<String, String>,
    exec_rules: Vec<ExecRule>,
    exec_log: Vec<(String, String)>,
    fail_create: Vec<String>,
    fail_exec: Vec<String>,
}

/// Mock runtime for testing.
pub struct MockRuntime {
    state: Mutex<MockState>,
    events: broadcast::Sender<RuntimeEvent>,
    next_id: AtomicU64,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new empty mock runtime.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(MockState::default()),
            events,
            next_id: AtomicU64::new(1),
        }
    }

    /// Script an exec response.
    ///
    /// The rule fires for containers whose name contains `container` and
    /// commands whose space-joined form contains `command`. Rules are
    /// matched in insertion order; unmatched execs return exit code 0 with
    /// empty output.
    pub fn script_exec(
        &self,
        container: impl Into<String>,
        command: impl Into<String>,
        result: ExecResult,
    ) {
        self.state.lock().unwrap().exec_rules.push(ExecRule {
            container: container.into(),
            command: command.into(),
            result,
        });
    }

    /// Make container creation fail for names containing `name_substr`.
    pub fn fail_create_matching(&self, name_substr: impl Into<String>) {
        self.state.lock().unwrap().fail_create.push(name_substr.into());
    }

    /// Make exec fail for commands containing `cmd_substr`.
    pub fn fail_exec_matching(&self, cmd_substr: impl Into<String>) {
        self.state.lock().unwrap().fail_exec.push(cmd_substr.into());
    }

    /// Inject an event into the stream, as if the runtime reported it.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Look up a container by name.
    pub fn container(&self, name: &str) -> Option<MockContainer> {
        let state = self.state.lock().unwrap();
        state.containers.values().find(|c| c.name == name).cloned()
    }

    /// Container names in creation order, including removed ones' survivors.
    pub fn container_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .creation_order
            .iter()
            .filter(|n| state.containers.values().any(|c| &c.name == *n))
            .cloned()
            .collect()
    }

    /// All exec invocations seen so far, as (container name, joined command).
    pub fn exec_log(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().exec_log.clone()
    }

    /// Currently existing volume names.
    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.iter().cloned().collect()
    }

    /// Currently existing network names.
    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.keys().cloned().collect()
    }

    /// Simulate an external crash: mark stopped with the exit code and emit die.
    pub fn kill(&self, name: &str, exit_code: i64) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state
                .containers
                .values_mut()
                .find(|c| c.name == name)
                .map(|c| {
                    c.running = false;
                    c.exit_code = exit_code;
                    RuntimeEvent {
                        action: EventAction::Die,
                        container_id: c.id.clone(),
                        container_name: Some(c.name.clone()),
                    }
                })
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    fn resolve<'a>(state: &'a MockState, id_or_name: &str) -> Option<&'a MockContainer> {
        state
            .containers
            .get(id_or_name)
            .or_else(|| state.containers.values().find(|c| c.name == id_or_name))
    }

    fn resolve_mut<'a>(state: &'a mut MockState, id_or_name: &str) -> Option<&'a mut MockContainer> {
        if state.containers.contains_key(id_or_name) {
            return state.containers.get_mut(id_or_name);
        }
        state
            .containers
            .values_mut()
            .find(|c| c.name == id_or_name)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let event = {
            let mut state = self.state.lock().unwrap();

            if state.fail_create.iter().any(|s| spec.name.contains(s.as_str())) {
                return Err(RuntimeError::Other(format!(
                    "injected create failure for {}",
                    spec.name
                )));
            }
            if state.containers.values().any(|c| c.name == spec.name) {
                return Err(RuntimeError::Conflict(format!(
                    "container name {} already in use",
                    spec.name
                )));
            }

            let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let container = MockContainer {
                id: id.clone(),
                name: spec.name.clone(),
                spec: spec.clone(),
                running: false,
                exit_code: 0,
                dead: false,
            };
            state.creation_order.push(spec.name.clone());
            state.containers.insert(id.clone(), container);

            RuntimeEvent {
                action: EventAction::Create,
                container_id: id,
                container_name: Some(spec.name.clone()),
            }
        };

        let id = event.container_id.clone();
        let _ = self.events.send(event);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let container = Self::resolve_mut(&mut state, id)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            if container.running {
                return Ok(());
            }
            container.running = true;
            container.exit_code = 0;
            RuntimeEvent {
                action: EventAction::Start,
                container_id: container.id.clone(),
                container_name: Some(container.name.clone()),
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let events = {
            let mut state = self.state.lock().unwrap();
            let container = Self::resolve_mut(&mut state, id)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            if !container.running {
                return Ok(());
            }
            container.running = false;
            let id = container.id.clone();
            let name = Some(container.name.clone());
            vec![
                RuntimeEvent {
                    action: EventAction::Die,
                    container_id: id.clone(),
                    container_name: name.clone(),
                },
                RuntimeEvent {
                    action: EventAction::Stop,
                    container_id: id,
                    container_name: name,
                },
            ]
        };
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let container = Self::resolve_mut(&mut state, id)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            container.running = true;
            container.exit_code = 0;
            RuntimeEvent {
                action: EventAction::Restart,
                container_id: container.id.clone(),
                container_name: Some(container.name.clone()),
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let container = Self::resolve(&state, id)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            if container.running && !force {
                return Err(RuntimeError::Conflict(format!(
                    "container {} is running",
                    container.name
                )));
            }
            let runtime_id = container.id.clone();
            let name = container.name.clone();
            state.containers.remove(&runtime_id);
            RuntimeEvent {
                action: EventAction::Destroy,
                container_id: runtime_id,
                container_name: Some(name),
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let state = self.state.lock().unwrap();
        let container = Self::resolve(&state, id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;

        let ports = container
            .spec
            .ports
            .iter()
            .map(|p| (p.container, p.host))
            .collect();
        let addresses = container
            .spec
            .network
            .iter()
            .map(|n| (n.clone(), "10.0.0.2".to_string()))
            .collect();
        let env = container
            .spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        Ok(ContainerState {
            running: container.running,
            exit_code: container.exit_code,
            dead: container.dead,
            ports,
            addresses,
            env,
        })
    }

    async fn exec_command(&self, id: &str, cmd: &[&str]) -> Result<ExecResult> {
        let mut state = self.state.lock().unwrap();
        let (name, running) = {
            let container = Self::resolve(&state, id)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            (container.name.clone(), container.running)
        };
        if !running {
            return Err(RuntimeError::Conflict(format!(
                "container {name} is not running"
            )));
        }

        let joined = cmd.join(" ");
        state.exec_log.push((name.clone(), joined.clone()));

        if state.fail_exec.iter().any(|s| joined.contains(s.as_str())) {
            return Err(RuntimeError::Other(format!(
                "injected exec failure for `{joined}`"
            )));
        }

        for rule in &state.exec_rules {
            if name.contains(&rule.container) && joined.contains(&rule.command) {
                return Ok(rule.result.clone());
            }
        }

        Ok(ExecResult::ok(""))
    }

    async fn get_logs(&self, id: &str, _tail: usize) -> Result<String> {
        let state = self.state.lock().unwrap();
        let container = Self::resolve(&state, id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
        Ok(format!("logs for {}\n", container.name))
    }

    async fn get_stats(&self, id: &str) -> Result<serde_json::Value> {
        let state = self.state.lock().unwrap();
        let container = Self::resolve(&state, id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
        Ok(json!({ "name": container.name, "running": container.running }))
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().volumes.insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let id = format!("mock-net-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.networks.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().networks.remove(name);
        Ok(())
    }

    async fn subscribe_events(&self, capacity: usize) -> Result<mpsc::Receiver<RuntimeEvent>> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut source = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_start_stop_remove() {
        let runtime = MockRuntime::new();
        let spec = ContainerSpec::new("iaas-postgres-x", "postgres:17").port(5432, 15432);

        let id = runtime.create_container(&spec).await.unwrap();
        runtime.start_container(&id).await.unwrap();
        assert!(runtime.inspect_container(&id).await.unwrap().running);

        runtime.stop_container(&id).await.unwrap();
        assert!(!runtime.inspect_container(&id).await.unwrap().running);

        runtime.remove_container(&id, false).await.unwrap();
        assert!(matches!(
            runtime.inspect_container(&id).await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let runtime = MockRuntime::new();
        let spec = ContainerSpec::new("same", "img");
        runtime.create_container(&spec).await.unwrap();
        assert!(matches!(
            runtime.create_container(&spec).await,
            Err(RuntimeError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let runtime = MockRuntime::new();
        let id = runtime
            .create_container(&ContainerSpec::new("c", "img"))
            .await
            .unwrap();
        runtime.stop_container(&id).await.unwrap();
        runtime.stop_container(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_running_requires_force() {
        let runtime = MockRuntime::new();
        let id = runtime
            .create_container(&ContainerSpec::new("c", "img"))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();

        assert!(matches!(
            runtime.remove_container(&id, false).await,
            Err(RuntimeError::Conflict(_))
        ));
        runtime.remove_container(&id, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_scripted_exec() {
        let runtime = MockRuntime::new();
        let id = runtime
            .create_container(&ContainerSpec::new("patroni-node-1", "patroni"))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();

        runtime.script_exec(
            "patroni-node-1",
            "curl",
            ExecResult::ok(r#"{"role": "master"}"#),
        );

        let result = runtime
            .exec_command(&id, &["curl", "-s", "http://localhost:8008"])
            .await
            .unwrap();
        assert!(result.output.contains("master"));

        let log = runtime.exec_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "patroni-node-1");
    }

    #[tokio::test]
    async fn test_exec_on_stopped_container_conflicts() {
        let runtime = MockRuntime::new();
        let id = runtime
            .create_container(&ContainerSpec::new("c", "img"))
            .await
            .unwrap();
        assert!(matches!(
            runtime.exec_command(&id, &["true"]).await,
            Err(RuntimeError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let runtime = MockRuntime::new();
        let mut rx = runtime.subscribe_events(16).await.unwrap();

        let id = runtime
            .create_container(&ContainerSpec::new("c", "img"))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();
        runtime.stop_container(&id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().action, EventAction::Create);
        assert_eq!(rx.recv().await.unwrap().action, EventAction::Start);
        assert_eq!(rx.recv().await.unwrap().action, EventAction::Die);
        assert_eq!(rx.recv().await.unwrap().action, EventAction::Stop);
    }

    #[tokio::test]
    async fn test_kill_emits_die() {
        let runtime = MockRuntime::new();
        let mut rx = runtime.subscribe_events(16).await.unwrap();
        let id = runtime
            .create_container(&ContainerSpec::new("c", "img"))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();
        runtime.kill("c", 137);

        // create, start, then the injected die
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        let die = rx.recv().await.unwrap();
        assert_eq!(die.action, EventAction::Die);
        assert_eq!(runtime.inspect_container(&id).await.unwrap().exit_code, 137);
    }
}
