// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the NGINX cluster engine, with emphasis on the
//! validate-backup-rollback config sync path.

mod common;

use common::TestContext;

use iaas_core::error::ErrorKind;
use iaas_core::model::{FailoverReason, InfraStatus, NginxRole};
use iaas_core::store::MetadataStore;
use iaas_runtime::ExecResult;
use iaas_server::services::nginx_cluster::CreateNginxClusterRequest;

fn create_request(name: &str, node_count: u32) -> CreateNginxClusterRequest {
    CreateNginxClusterRequest {
        name: name.to_string(),
        node_count: Some(node_count),
        virtual_ip: Some("10.0.0.100".to_string()),
        http_port: Some(8080),
        https_port: None,
        algorithm: None,
        tunables: None,
        routing: None,
    }
}

#[tokio::test]
async fn test_create_assigns_priorities_and_scanned_ports() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 3))
        .await
        .unwrap();

    assert_eq!(view.status, InfraStatus::Running);
    assert_eq!(view.nodes.len(), 3);

    // priority 100 is master, the rest back it up with descending priority
    assert_eq!(view.nodes[0].priority, 100);
    assert_eq!(view.nodes[0].role, NginxRole::Master);
    assert_eq!(view.nodes[1].priority, 99);
    assert_eq!(view.nodes[1].role, NginxRole::Backup);
    assert_eq!(view.nodes[2].priority, 98);

    // host ports scanned upward from the base, skipping used values
    let ports: Vec<i32> = view.nodes.iter().map(|n| n.http_port).collect();
    assert_eq!(ports, vec![8080, 8081, 8082]);

    // the VRRP daemon gets its state and priority through the environment
    let master = t
        .runtime
        .container(&format!("iaas-nginxcluster-{}-web-nginx-1", view.cluster_id))
        .unwrap();
    assert_eq!(master.spec.env.get("KEEPALIVED_STATE").map(String::as_str), Some("MASTER"));
    assert_eq!(
        master.spec.env.get("KEEPALIVED_VIRTUAL_IP").map(String::as_str),
        Some("10.0.0.100")
    );
}

#[tokio::test]
async fn test_sync_config_applies_to_every_node() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();

    let report = t
        .nginx_cluster
        .sync_config(&t.ctx, view.cluster_id, "events {}\nhttp {}\n")
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert!(report.failed.is_empty());

    // the stored effective config follows
    let cluster = t
        .store
        .get_nginx_cluster(view.cluster_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cluster.config, "events {}\nhttp {}\n");
}

#[tokio::test]
async fn test_sync_config_invalid_fails_validation_and_touches_nothing() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();

    let writes_before = live_config_writes(&t);

    // the master's scratch validation rejects the candidate
    t.runtime.script_exec(
        "web-nginx-1",
        "nginx -t -c",
        ExecResult {
            exit_code: 1,
            output: "unknown directive \"bogus\"".into(),
        },
    );

    let err = t
        .nginx_cluster
        .sync_config(&t.ctx, view.cluster_id, "bogus directive;")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    // no node's live config was written
    assert_eq!(live_config_writes(&t), writes_before);
}

#[tokio::test]
async fn test_sync_config_partial_failure_rolls_back_failed_node() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 3))
        .await
        .unwrap();
    let stored_before = t
        .store
        .get_nginx_cluster(view.cluster_id)
        .await
        .unwrap()
        .unwrap()
        .config;

    // node 2 rejects the new config at its own validation step
    t.runtime.script_exec(
        "web-nginx-2",
        "nginx -t",
        ExecResult {
            exit_code: 1,
            output: "host not found in upstream".into(),
        },
    );

    let report = t
        .nginx_cluster
        .sync_config(&t.ctx, view.cluster_id, "events {}\nhttp {}\n")
        .await
        .unwrap();

    assert_eq!(report.applied, vec!["web-nginx-1", "web-nginx-3"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].node, "web-nginx-2");

    // the failed node restored its backup
    let restored = t.runtime.exec_log().iter().any(|(container, cmd)| {
        container.contains("web-nginx-2")
            && cmd.contains("cp /etc/nginx/nginx.conf.backup.")
    });
    assert!(restored);

    // a partial rollout does not advance the stored effective config
    let stored_after = t
        .store
        .get_nginx_cluster(view.cluster_id)
        .await
        .unwrap()
        .unwrap()
        .config;
    assert_eq!(stored_after, stored_before);
}

#[tokio::test]
async fn test_sync_config_reload_failure_restores_and_reloads() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();

    t.runtime.script_exec(
        "web-nginx-2",
        "nginx -s reload",
        ExecResult {
            exit_code: 1,
            output: "signal process started but failed".into(),
        },
    );

    let report = t
        .nginx_cluster
        .sync_config(&t.ctx, view.cluster_id, "events {}\nhttp {}\n")
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);

    // restore happened and a second reload was attempted on the old config
    let log = t.runtime.exec_log();
    let restore_index = log
        .iter()
        .position(|(c, cmd)| c.contains("web-nginx-2") && cmd.contains("cp /etc/nginx/nginx.conf.backup."))
        .expect("backup restored");
    let reloads_after_restore = log[restore_index..]
        .iter()
        .filter(|(c, cmd)| c.contains("web-nginx-2") && cmd.contains("nginx -s reload"))
        .count();
    assert!(reloads_after_restore >= 1);
}

#[tokio::test]
async fn test_failover_swaps_roles_and_priorities() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();
    let backup = view.nodes.iter().find(|n| n.role == NginxRole::Backup).unwrap();

    t.nginx_cluster
        .failover(&t.ctx, view.cluster_id, backup.id)
        .await
        .unwrap();

    let nodes = t.store.list_nginx_nodes(view.cluster_id).await.unwrap();
    let promoted = nodes.iter().find(|n| n.id == backup.id).unwrap();
    assert_eq!(promoted.role, NginxRole::Master);
    assert_eq!(promoted.priority, 100);

    let demoted = nodes.iter().find(|n| n.name == "web-nginx-1").unwrap();
    assert_eq!(demoted.role, NginxRole::Backup);
    assert_eq!(demoted.priority, 50);

    let events = t
        .store
        .list_failover_events(view.cluster_id)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, FailoverReason::Manual);
}

#[tokio::test]
async fn test_failover_to_master_rejected() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();
    let master = view.nodes.iter().find(|n| n.role == NginxRole::Master).unwrap();

    let err = t
        .nginx_cluster
        .failover(&t.ctx, view.cluster_id, master.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let t = TestContext::new();
    let view = t
        .nginx_cluster
        .create(&t.ctx, create_request("web", 2))
        .await
        .unwrap();

    t.nginx_cluster.delete(&t.ctx, view.cluster_id).await.unwrap();

    assert!(t.runtime.container_names().is_empty());
    assert!(t.runtime.networks().is_empty());
    assert!(
        t.store
            .get_nginx_cluster(view.cluster_id)
            .await
            .unwrap()
            .is_none()
    );
}

/// Count writes to the live nginx.conf across all containers.
fn live_config_writes(t: &TestContext) -> usize {
    t.runtime
        .exec_log()
        .iter()
        .filter(|(_, cmd)| cmd.contains("cat > /etc/nginx/nginx.conf <<"))
        .count()
}
