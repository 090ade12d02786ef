// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the single-container services: the uniform lifecycle
//! template and runtime-synchronised get-info.

mod common;

use std::collections::BTreeMap;

use common::TestContext;

use iaas_core::error::ErrorKind;
use iaas_core::model::{InfraStatus, Location, NginxRouting, ServerBlock, ServicePort, Upstream,
    UpstreamServer};
use iaas_core::store::MetadataStore;
use iaas_runtime::ContainerRuntime;
use iaas_server::services::docker_service::CreateContainerRequest;
use iaas_server::services::nginx_single::CreateNginxRequest;
use iaas_server::services::postgres_single::CreatePostgresRequest;

fn postgres_request(name: &str) -> CreatePostgresRequest {
    CreatePostgresRequest {
        name: name.to_string(),
        version: None,
        password: "SecurePassword123!".to_string(),
        port: Some(15432),
        database: None,
        username: None,
        memory_limit_mb: None,
        cpu_limit: None,
    }
}

#[tokio::test]
async fn test_postgres_create_follows_template() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();

    assert_eq!(view.status, InfraStatus::Running);
    assert_eq!(view.version, "17");
    assert_eq!(view.port, 15432);
    assert!(view.connection_string.contains("****"));
    assert!(!view.connection_string.contains("SecurePassword123!"));

    let name = format!("iaas-postgres-{}", view.infrastructure_id);
    let container = t.runtime.container(&name).unwrap();
    assert!(container.running);
    assert_eq!(container.spec.image, "postgres:17");
    assert_eq!(
        container.spec.env.get("POSTGRES_PASSWORD").map(String::as_str),
        Some("SecurePassword123!")
    );
    assert_eq!(t.runtime.volumes().len(), 1);
}

#[tokio::test]
async fn test_postgres_get_synchronises_status_from_runtime() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();
    let container_id = view.container_id.clone().unwrap();

    // stopped out-of-band: the next read converges
    t.runtime.stop_container(&container_id).await.unwrap();
    let view = t.postgres_single.get(&t.ctx, view.infrastructure_id).await.unwrap();
    assert_eq!(view.status, InfraStatus::Stopped);

    let infra = t
        .store
        .get_infrastructure(view.infrastructure_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(infra.status, InfraStatus::Stopped);

    // crashed out-of-band: non-zero exit maps to failed
    t.runtime.start_container(&container_id).await.unwrap();
    t.runtime.kill(&format!("iaas-postgres-{}", view.infrastructure_id), 137);
    let view = t.postgres_single.get(&t.ctx, view.infrastructure_id).await.unwrap();
    assert_eq!(view.status, InfraStatus::Failed);
}

#[tokio::test]
async fn test_postgres_get_forces_stopped_when_container_absent() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();
    let container_id = view.container_id.clone().unwrap();

    t.runtime.remove_container(&container_id, true).await.unwrap();

    let view = t.postgres_single.get(&t.ctx, view.infrastructure_id).await.unwrap();
    assert_eq!(view.status, InfraStatus::Stopped);
}

#[tokio::test]
async fn test_postgres_create_failure_cleans_up() {
    let t = TestContext::new();
    t.runtime.fail_create_matching("iaas-postgres");

    let err = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeFailed);

    let infra = &t.store.list_infrastructures(None).await.unwrap()[0];
    assert_eq!(infra.status, InfraStatus::Failed);
    assert!(t.runtime.container_names().is_empty());
    // the compensating cleanup also reclaimed the volume
    assert!(t.runtime.volumes().is_empty());
}

#[tokio::test]
async fn test_postgres_delete_two_phase() {
    let t = TestContext::new();
    let view = t
        .postgres_single
        .create(&t.ctx, postgres_request("orders-db"))
        .await
        .unwrap();

    t.postgres_single.delete(&t.ctx, view.infrastructure_id).await.unwrap();

    let infra = t
        .store
        .get_infrastructure(view.infrastructure_id)
        .await
        .unwrap()
        .unwrap();
    // record retained for audit, terminal state reached
    assert_eq!(infra.status, InfraStatus::Deleted);
    assert!(t.runtime.container_names().is_empty());
    assert!(t.runtime.volumes().is_empty());
    assert!(
        t.store
            .get_postgres_single_by_infra(view.infrastructure_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_generic_container_lifecycle() {
    let t = TestContext::new();
    let view = t
        .generic
        .create(
            &t.ctx,
            CreateContainerRequest {
                name: "worker".to_string(),
                image: "busybox:1.36".to_string(),
                env: BTreeMap::from([("QUEUE".to_string(), "jobs".to_string())]),
                ports: vec![ServicePort {
                    container: 9000,
                    host: 19000,
                }],
                command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                memory_limit_mb: Some(128),
                cpu_limit: Some(0.5),
            },
        )
        .await
        .unwrap();

    assert_eq!(view.status, InfraStatus::Running);

    let container = t
        .runtime
        .container(&format!("iaas-docker-{}", view.infrastructure_id))
        .unwrap();
    assert_eq!(container.spec.env.get("QUEUE").map(String::as_str), Some("jobs"));
    assert_eq!(container.spec.memory_mb, Some(128));

    t.generic.stop(&t.ctx, view.infrastructure_id).await.unwrap();
    let view = t.generic.get(&t.ctx, view.infrastructure_id).await.unwrap();
    assert_eq!(view.status, InfraStatus::Stopped);

    t.generic.start(&t.ctx, view.infrastructure_id).await.unwrap();
    let view = t.generic.get(&t.ctx, view.infrastructure_id).await.unwrap();
    assert_eq!(view.status, InfraStatus::Running);

    let logs = t.generic.logs(&t.ctx, view.infrastructure_id, 50).await.unwrap();
    assert!(!logs.is_empty());

    t.generic.delete(&t.ctx, view.infrastructure_id).await.unwrap();
    assert!(t.runtime.container_names().is_empty());
}

#[tokio::test]
async fn test_nginx_routing_update_applies_validated_config() {
    let t = TestContext::new();
    let view = t
        .nginx_single
        .create(
            &t.ctx,
            CreateNginxRequest {
                name: "edge".to_string(),
                http_port: Some(8088),
                https_port: None,
                routing: None,
            },
        )
        .await
        .unwrap();

    let routing = NginxRouting {
        upstreams: vec![Upstream {
            name: "app".into(),
            algorithm: Default::default(),
            servers: vec![UpstreamServer {
                address: "10.1.0.4:3000".into(),
                weight: 1,
                max_fails: 3,
                fail_timeout_secs: 10,
                backup: false,
            }],
        }],
        server_blocks: vec![ServerBlock {
            server_name: "edge.local".into(),
            listen: 80,
            locations: vec![Location {
                path: "/".into(),
                upstream: Some("app".into()),
                proxy_pass: None,
            }],
        }],
    };

    let view = t
        .nginx_single
        .update_routing(&t.ctx, view.infrastructure_id, routing)
        .await
        .unwrap();
    assert_eq!(view.routing.upstreams.len(), 1);

    // config went through write, validate, reload
    let log = t.runtime.exec_log();
    assert!(log.iter().any(|(_, cmd)| cmd.contains("cat > /etc/nginx/nginx.conf <<")));
    assert!(log.iter().any(|(_, cmd)| cmd == "nginx -t"));
    assert!(log.iter().any(|(_, cmd)| cmd == "nginx -s reload"));

    // the stored component carries the rendered config
    let component = t
        .store
        .get_nginx_single_by_infra(view.infrastructure_id)
        .await
        .unwrap()
        .unwrap();
    assert!(component.config.unwrap().contains("upstream app {"));
}

#[tokio::test]
async fn test_nginx_routing_rejects_empty_upstream() {
    let t = TestContext::new();
    let view = t
        .nginx_single
        .create(
            &t.ctx,
            CreateNginxRequest {
                name: "edge".to_string(),
                http_port: None,
                https_port: None,
                routing: None,
            },
        )
        .await
        .unwrap();

    let routing = NginxRouting {
        upstreams: vec![Upstream {
            name: "empty".into(),
            algorithm: Default::default(),
            servers: vec![],
        }],
        server_blocks: vec![],
    };

    let err = t
        .nginx_single
        .update_routing(&t.ctx, view.infrastructure_id, routing)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
