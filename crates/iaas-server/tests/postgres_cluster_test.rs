// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the PostgreSQL HA cluster engine over the mock
//! runtime and in-memory store.

mod common;

use common::TestContext;

use iaas_core::error::{Error, ErrorKind};
use iaas_core::model::{FailoverReason, InfraStatus, NodeRole, TriggeredBy};
use iaas_core::store::MetadataStore;
use iaas_runtime::ExecResult;
use iaas_server::services::postgres_cluster::{
    AddNodeRequest, BackupRequest, CreateClusterRequest,
};

fn create_request(name: &str, node_count: u32) -> CreateClusterRequest {
    CreateClusterRequest {
        name: name.to_string(),
        node_count: Some(node_count),
        postgres_version: Some("17".to_string()),
        postgres_password: "SecurePassword123!".to_string(),
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
    }
}

#[tokio::test]
async fn test_create_three_node_cluster() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 3))
        .await
        .unwrap();

    // 3 etcd + 3 patroni + 1 haproxy
    assert_eq!(view.nodes.len(), 7);
    assert_eq!(view.patroni_node_count, 3);
    assert_eq!(view.status, InfraStatus::Running);
    assert_eq!(view.endpoints.write, "localhost:5000");
    assert_eq!(view.endpoints.read, "localhost:5001");

    let primaries: Vec<_> = view
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::Primary)
        .collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].name, "patroni-node-1");
    assert_eq!(view.primary_node_id, Some(primaries[0].id));

    let names = t.runtime.container_names();
    assert_eq!(names.iter().filter(|n| n.contains("etcd")).count(), 3);
    assert_eq!(names.iter().filter(|n| n.contains("patroni-node")).count(), 3);
    assert_eq!(names.iter().filter(|n| n.contains("haproxy")).count(), 1);

    // one data volume per etcd node, data + backups per patroni node
    assert_eq!(t.runtime.volumes().len(), 3 + 3 * 2);

    // everything is running
    for name in &names {
        assert!(t.runtime.container(name).unwrap().running, "{name} not running");
    }
}

#[tokio::test]
async fn test_replication_test_reports_all_synced() {
    let t = TestContext::new();
    t.postgres_cluster
        .create(&t.ctx, create_request("ha-db", 3))
        .await
        .unwrap();
    t.script_patroni_roles(1);
    t.script_replication_counts("1");

    let infra_id = t.store.list_infrastructures(None).await.unwrap()[0].id;
    let result = t.postgres_cluster.test_replication(&t.ctx, infra_id).await.unwrap();

    assert!(result.all_synced);
    assert!(result.payload.starts_with("test-"));
    assert_eq!(result.nodes.len(), 3);
    for node in &result.nodes {
        assert!(node.has_data);
        assert_eq!(node.row_count, 1);
    }

    // probe row cleaned up on the primary
    let cleaned = t.runtime.exec_log().iter().any(|(container, cmd)| {
        container.contains("patroni-node-1") && cmd.contains("DELETE FROM replication_test")
    });
    assert!(cleaned);
}

#[tokio::test]
async fn test_replication_test_flags_lagging_replica() {
    let t = TestContext::new();
    t.postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();
    t.script_patroni_roles(1);
    // node 2 never sees the row
    t.runtime.script_exec(
        "patroni-node-2",
        "SELECT count(*) FROM replication_test",
        ExecResult::ok("0\n"),
    );
    t.script_replication_counts("1");

    let infra_id = t.store.list_infrastructures(None).await.unwrap()[0].id;
    let result = t.postgres_cluster.test_replication(&t.ctx, infra_id).await.unwrap();

    assert!(!result.all_synced);
    let lagging = result.nodes.iter().find(|n| n.name == "patroni-node-2").unwrap();
    assert!(!lagging.has_data);
}

#[tokio::test]
async fn test_add_node_then_failover() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 3))
        .await
        .unwrap();
    let cluster_id = view.cluster_id;

    let node = t
        .postgres_cluster
        .add_node(
            &t.ctx,
            cluster_id,
            AddNodeRequest {
                node_name: Some("patroni-node-4".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(node.name, "patroni-node-4");
    assert_eq!(node.role, NodeRole::Replica);

    let view = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(view.patroni_node_count, 4);

    // the new node clones itself from the primary
    let container = t
        .runtime
        .container(&format!("iaas-pgcluster-{cluster_id}-patroni-node-4"))
        .unwrap();
    assert_eq!(
        container.spec.env.get("PATRONI_TAGS_CLONEFROM").map(String::as_str),
        Some("true")
    );

    // manual failover onto the new replica
    t.script_patroni_roles(1);
    t.runtime.script_exec(
        "patroni-node-1",
        "switchover",
        ExecResult::ok("Successfully failed over"),
    );
    t.postgres_cluster
        .failover(&t.ctx, cluster_id, node.id)
        .await
        .unwrap();

    let events = t.postgres_cluster.failover_events(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_primary_name, "patroni-node-1");
    assert_eq!(events[0].new_primary_name, "patroni-node-4");
    assert_eq!(events[0].reason, FailoverReason::Manual);
    assert_eq!(events[0].triggered_by, TriggeredBy::User);

    let view = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    let promoted = view.nodes.iter().find(|n| n.name == "patroni-node-4").unwrap();
    assert_eq!(promoted.role, NodeRole::Primary);
    assert_eq!(view.primary_node_id, Some(promoted.id));
    let demoted = view.nodes.iter().find(|n| n.name == "patroni-node-1").unwrap();
    assert_eq!(demoted.role, NodeRole::Replica);
}

#[tokio::test]
async fn test_failover_to_current_primary_rejected() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();
    let primary_id = view.primary_node_id.unwrap();

    let err = t
        .postgres_cluster
        .failover(&t.ctx, view.cluster_id, primary_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_add_node_at_cap_fails_precondition() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 10))
        .await
        .unwrap();

    let err = t
        .postgres_cluster
        .add_node(&t.ctx, view.cluster_id, AddNodeRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_remove_last_database_node_fails_precondition() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 1))
        .await
        .unwrap();
    let primary_id = view.primary_node_id.unwrap();

    let err = t
        .postgres_cluster
        .remove_node(&t.ctx, view.cluster_id, primary_id, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_remove_primary_requires_force() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();
    let cluster_id = view.cluster_id;
    let primary_id = view.primary_node_id.unwrap();

    let err = t
        .postgres_cluster
        .remove_node(&t.ctx, cluster_id, primary_id, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    // forced removal promotes a replica and records the failover first
    t.postgres_cluster
        .remove_node(&t.ctx, cluster_id, primary_id, true)
        .await
        .unwrap();

    let events = t.postgres_cluster.failover_events(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].new_primary_name, "patroni-node-2");

    let view = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(view.patroni_node_count, 1);
    let primary = view.nodes.iter().find(|n| n.role == NodeRole::Primary).unwrap();
    assert_eq!(primary.name, "patroni-node-2");
}

#[tokio::test]
async fn test_stop_primary_projects_automatic_failover() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 3))
        .await
        .unwrap();
    let cluster_id = view.cluster_id;
    let primary_id = view.primary_node_id.unwrap();

    t.postgres_cluster
        .stop_node(&t.ctx, cluster_id, primary_id)
        .await
        .unwrap();

    let events = t.postgres_cluster.failover_events(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, FailoverReason::Automatic);
    assert_eq!(events[0].triggered_by, TriggeredBy::System);
    assert_eq!(events[0].old_primary_name, "patroni-node-1");
    assert_eq!(events[0].new_primary_name, "patroni-node-2");

    let view = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    let stopped = view.nodes.iter().find(|n| n.name == "patroni-node-1").unwrap();
    assert_eq!(stopped.role, NodeRole::Replica);
    assert!(!stopped.is_healthy);
}

#[tokio::test]
async fn test_scale_rejected_with_precondition() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();

    let err = t
        .postgres_cluster
        .scale(&t.ctx, view.cluster_id, 5)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert!(err.to_string().contains("add/remove node"));
}

#[tokio::test]
async fn test_backup_requires_backups_enabled() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();

    let err = t
        .postgres_cluster
        .backup(&t.ctx, view.cluster_id, BackupRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_backup_runs_pgbackrest_on_primary() {
    let t = TestContext::new();
    let mut req = create_request("ha-db", 2);
    req.backup_enabled = true;
    let view = t.postgres_cluster.create(&t.ctx, req).await.unwrap();

    t.script_patroni_roles(1);
    t.runtime.script_exec(
        "patroni-node-1",
        "pgbackrest --stanza=db backup",
        ExecResult::ok("backup complete"),
    );

    let output = t
        .postgres_cluster
        .backup(&t.ctx, view.cluster_id, BackupRequest::default())
        .await
        .unwrap();
    assert!(output.contains("backup complete"));

    let ran_on_primary = t.runtime.exec_log().iter().any(|(container, cmd)| {
        container.contains("patroni-node-1") && cmd.contains("--type=full")
    });
    assert!(ran_on_primary);
}

#[tokio::test]
async fn test_create_failure_marks_infrastructure_failed() {
    let t = TestContext::new();
    t.runtime.fail_create_matching("etcd-2");

    let err = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RuntimeFailed));

    let infra = &t.store.list_infrastructures(None).await.unwrap()[0];
    assert_eq!(infra.status, InfraStatus::Failed);
}

#[tokio::test]
async fn test_stop_start_cluster_round_trip() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();
    let cluster_id = view.cluster_id;

    t.postgres_cluster.stop(&t.ctx, cluster_id).await.unwrap();
    for name in t.runtime.container_names() {
        assert!(!t.runtime.container(&name).unwrap().running, "{name} still running");
    }
    let infra = &t.store.list_infrastructures(None).await.unwrap()[0];
    assert_eq!(infra.status, InfraStatus::Stopped);

    t.postgres_cluster.start(&t.ctx, cluster_id).await.unwrap();
    for name in t.runtime.container_names() {
        assert!(t.runtime.container(&name).unwrap().running, "{name} not running");
    }

    // same nodes, same roles
    let after = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    assert_eq!(after.nodes.len(), view.nodes.len());
    assert_eq!(
        after.nodes.iter().filter(|n| n.role == NodeRole::Primary).count(),
        1
    );
}

#[tokio::test]
async fn test_delete_removes_containers_volumes_network() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();

    assert!(!t.runtime.networks().is_empty());
    t.postgres_cluster.delete(&t.ctx, view.cluster_id).await.unwrap();

    assert!(t.runtime.container_names().is_empty());
    assert!(t.runtime.volumes().is_empty());
    assert!(t.runtime.networks().is_empty());

    let infra = &t.store.list_infrastructures(None).await.unwrap()[0];
    assert_eq!(infra.status, InfraStatus::Deleted);
    assert!(
        t.store
            .get_postgres_cluster(view.cluster_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_metadata_role_is_a_hint_not_truth() {
    let t = TestContext::new();
    let view = t
        .postgres_cluster
        .create(&t.ctx, create_request("ha-db", 2))
        .await
        .unwrap();
    let cluster_id = view.cluster_id;

    // Patroni says node 2 leads, metadata says node 1. The probe wins and
    // metadata is updated opportunistically.
    t.script_patroni_roles(2);
    t.script_replication_counts("1");

    let result = t
        .postgres_cluster
        .test_replication(&t.ctx, cluster_id)
        .await
        .unwrap();
    assert!(result.all_synced);

    let view = t.postgres_cluster.get(&t.ctx, cluster_id).await.unwrap();
    let primary = view.nodes.iter().find(|n| n.role == NodeRole::Primary).unwrap();
    assert_eq!(primary.name, "patroni-node-2");
}

#[tokio::test]
async fn test_cluster_create_validates_input() {
    let t = TestContext::new();

    let mut req = create_request("", 2);
    req.name = "".into();
    let err = t.postgres_cluster.create(&t.ctx, req).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut req = create_request("db", 2);
    req.node_count = Some(11);
    let err = t.postgres_cluster.create(&t.ctx, req).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
