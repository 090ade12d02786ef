// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the reconciliation loop: runtime events become
//! authoritative status transitions, published lifecycle events, and
//! broadcast updates.

mod common;

use std::sync::Arc;

use common::{TestContext, wait_for};

use iaas_core::model::{InfraStatus, StatusUpdate};
use iaas_core::store::MetadataStore;
use iaas_runtime::{ContainerRuntime, EventAction, RuntimeEvent};
use iaas_server::broadcast::StatusBroadcaster;
use iaas_server::reconciler::Reconciler;
use iaas_server::services::postgres_cluster::CreateClusterRequest;
use iaas_server::services::postgres_single::CreatePostgresRequest;
use tokio_util::sync::CancellationToken;

struct LoopHarness {
    shutdown: CancellationToken,
    broadcaster: StatusBroadcaster,
    handle: tokio::task::JoinHandle<()>,
}

impl LoopHarness {
    async fn spawn(t: &TestContext) -> Self {
        let shutdown = CancellationToken::new();
        let broadcaster = StatusBroadcaster::default();
        let rx = t.runtime.subscribe_events(64).await.unwrap();
        let reconciler = Reconciler::new(
            t.store.clone(),
            t.cache.clone(),
            t.events.clone(),
            Some(broadcaster.clone()),
        );
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            reconciler.run(rx, token).await;
        });
        Self {
            shutdown,
            broadcaster,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

fn postgres_request(name: &str) -> CreatePostgresRequest {
    CreatePostgresRequest {
        name: name.to_string(),
        version: None,
        password: "pw".to_string(),
        port: None,
        database: None,
        username: None,
        memory_limit_mb: None,
        cpu_limit: None,
    }
}

#[tokio::test]
async fn test_external_stop_is_reflected_within_one_round_trip() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();
    let infra_id = view.infrastructure_id;
    let container_id = view.container_id.unwrap();

    let harness = LoopHarness::spawn(&t).await;
    let mut bus_rx = t.events.subscribe();

    // stop the managed container out-of-band, as an operator would
    t.runtime.stop_container(&container_id).await.unwrap();

    let store = t.store.clone();
    wait_for("status to converge to stopped", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Stopped
    })
    .await;

    // one lifecycle event with the raw die action and derived status
    let mut saw_die = false;
    while let Ok(event) = bus_rx.try_recv() {
        if event.action == "die" {
            assert_eq!(event.metadata.status, "stopped");
            assert_eq!(event.instance_id, infra_id);
            saw_die = true;
        }
    }
    assert!(saw_die, "no die lifecycle event published");

    harness.stop().await;
}

#[tokio::test]
async fn test_restart_restores_running_and_broadcasts() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();
    let infra_id = view.infrastructure_id;
    let container_id = view.container_id.unwrap();

    let harness = LoopHarness::spawn(&t).await;
    let mut updates = harness.broadcaster.subscribe();

    t.runtime.stop_container(&container_id).await.unwrap();
    t.runtime.start_container(&container_id).await.unwrap();

    let store = t.store.clone();
    wait_for("status to converge back to running", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Running
    })
    .await;

    // the broadcast channel carried the same transitions
    let mut statuses: Vec<StatusUpdate> = Vec::new();
    while let Ok(update) = updates.try_recv() {
        statuses.push(update);
    }
    assert!(statuses.iter().any(|u| u.status == "stopped"));
    assert!(statuses.iter().any(|u| u.status == "running" && u.action == "start"));

    harness.stop().await;
}

#[tokio::test]
async fn test_unmanaged_container_events_are_skipped() {
    let t = TestContext::new();
    let harness = LoopHarness::spawn(&t).await;

    t.runtime.emit(RuntimeEvent {
        action: EventAction::Die,
        container_id: "not-ours".to_string(),
        container_name: Some("bystander".to_string()),
    });

    // the loop keeps running and nothing lands in the store
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(t.store.list_infrastructures(None).await.unwrap().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_destroy_marks_deleted() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();
    let infra_id = view.infrastructure_id;
    let container_id = view.container_id.unwrap();

    let harness = LoopHarness::spawn(&t).await;

    t.runtime.stop_container(&container_id).await.unwrap();
    t.runtime.remove_container(&container_id, true).await.unwrap();

    let store = t.store.clone();
    wait_for("status to converge to deleted", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Deleted
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_cluster_member_stop_degrades_cluster() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(
            &t.ctx,
            CreateClusterRequest {
                name: "ha-db".to_string(),
                node_count: Some(2),
                postgres_version: None,
                postgres_password: "pw".to_string(),
                replication_mode: None,
                namespace: None,
                cpu_limit: None,
                memory_limit_mb: None,
                write_port: None,
                read_port: None,
                stats_port: None,
                node_port_base: None,
                backup_enabled: false,
                backup_retention: None,
                backup_concurrency: None,
                patroni: None,
            },
        )
        .await
        .unwrap();
    let infra_id = view.infrastructure_id;

    let harness = LoopHarness::spawn(&t).await;

    // one patroni member dies; the cluster degrades instead of stopping
    let replica = view
        .nodes
        .iter()
        .find(|n| n.name == "patroni-node-2")
        .unwrap();
    let node = t.store.get_cluster_node(replica.id).await.unwrap().unwrap();
    t.runtime.stop_container(&node.container_id).await.unwrap();

    let store = t.store.clone();
    wait_for("cluster to degrade", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Degraded
    })
    .await;

    // the member's health flag follows
    let node = t.store.get_cluster_node(replica.id).await.unwrap().unwrap();
    assert!(!node.is_healthy);

    // the member coming back marks the cluster running again
    t.runtime.start_container(&node.container_id).await.unwrap();
    let store = t.store.clone();
    wait_for("cluster to recover", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Running
    })
    .await;
    let node = t.store.get_cluster_node(replica.id).await.unwrap().unwrap();
    assert!(node.is_healthy);

    harness.stop().await;
}

#[tokio::test]
async fn test_nginx_member_stop_writes_stopped_not_degraded() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(
            &t.ctx,
            iaas_server::services::nginx_cluster::CreateNginxClusterRequest {
                name: "web".to_string(),
                node_count: Some(2),
                virtual_ip: None,
                http_port: Some(8080),
                https_port: None,
                algorithm: None,
                tunables: None,
                routing: None,
            },
        )
        .await
        .unwrap();
    let infra_id = view.infrastructure_id;

    let harness = LoopHarness::spawn(&t).await;

    // The degraded projection is a postgres-cluster state machine only; an
    // nginx backup node stopping follows the plain action mapping.
    let backup = view.nodes.iter().find(|n| n.priority == 99).unwrap();
    let node = t.store.get_nginx_node(backup.id).await.unwrap().unwrap();
    t.runtime.stop_container(&node.container_id).await.unwrap();

    let store = t.store.clone();
    wait_for("nginx infrastructure to report stopped", async || {
        store
            .get_infrastructure(infra_id)
            .await
            .unwrap()
            .unwrap()
            .status
            == InfraStatus::Stopped
    })
    .await;

    // the member's health flag still follows the event
    let node = t.store.get_nginx_node(backup.id).await.unwrap().unwrap();
    assert!(!node.is_healthy);

    harness.stop().await;
}

/// Backpressure contract: a bounded channel never drops events, it blocks
/// the producer until the consumer drains.
#[tokio::test]
async fn test_bounded_channel_preserves_event_order() {
    let runtime = Arc::new(iaas_runtime::MockRuntime::new());
    let mut rx = runtime.subscribe_events(4).await.unwrap();

    for i in 0..32 {
        runtime.emit(RuntimeEvent {
            action: EventAction::Start,
            container_id: format!("c{i}"),
            container_name: None,
        });
        // give the forwarder a chance to drain into the bounded channel
        tokio::task::yield_now().await;
    }

    let mut received = Vec::new();
    while let Ok(event) =
        tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await
    {
        match event {
            Some(event) => received.push(event.container_id),
            None => break,
        }
    }
    assert_eq!(received.len(), 32);
    for (i, id) in received.iter().enumerate() {
        assert_eq!(id, &format!("c{i}"));
    }
}
