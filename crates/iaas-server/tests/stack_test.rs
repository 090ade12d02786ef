// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the stack engine: dependency wiring, ordered
//! creation, live-resolved outputs, reverse-order teardown.

mod common;

use common::TestContext;

use iaas_core::error::ErrorKind;
use iaas_core::model::{ResourceType, StackStatus};
use iaas_core::store::MetadataStore;
use iaas_runtime::{ContainerRuntime, EventAction};
use iaas_server::services::stack::{CreateStackRequest, StackResourceSpec};
use serde_json::json;

fn db_and_app() -> Vec<StackResourceSpec> {
    vec![
        StackResourceSpec {
            name: "db".to_string(),
            resource_type: ResourceType::PostgresInstance,
            role: Some("database".to_string()),
            order: 1,
            depends_on: vec![],
            spec: json!({ "password": "pw", "port": 15500 }),
        },
        StackResourceSpec {
            name: "app".to_string(),
            resource_type: ResourceType::DockerService,
            role: Some("application".to_string()),
            order: 2,
            depends_on: vec!["db".to_string()],
            spec: json!({ "image": "app:latest" }),
        },
    ]
}

fn stack_request(resources: Vec<StackResourceSpec>) -> CreateStackRequest {
    CreateStackRequest {
        name: "shop".to_string(),
        environment: Some("staging".to_string()),
        tags: vec!["team:payments".to_string()],
        resources,
    }
}

#[tokio::test]
async fn test_create_wires_dependency_environment() {
    let t = TestContext::new();
    let view = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap();

    assert_eq!(view.status, StackStatus::Running);
    assert_eq!(view.resources.len(), 2);

    // the app container got derived connection variables from db
    let app_infra = view
        .resources
        .iter()
        .find(|r| r.name == "app")
        .unwrap()
        .infrastructure_id
        .unwrap();
    let container = t
        .runtime
        .container(&format!("iaas-docker-{app_infra}"))
        .unwrap();
    assert_eq!(container.spec.env.get("DATABASE_HOST").map(String::as_str), Some("db"));
    assert_eq!(container.spec.env.get("DATABASE_PORT").map(String::as_str), Some("15500"));
}

#[tokio::test]
async fn test_get_resolves_outputs_live() {
    let t = TestContext::new();
    let created = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap();

    let view = t.stacks.get(&t.ctx, created.id).await.unwrap();
    let db = view.resources.iter().find(|r| r.name == "db").unwrap();
    let connection = db.outputs["connection_string"].as_str().unwrap();
    assert!(connection.contains("****"));
    assert!(!connection.contains("pw"));

    let app = view.resources.iter().find(|r| r.name == "app").unwrap();
    assert_eq!(app.outputs["status"], "running");

    // an infrastructure deleted out from under the stack reports itself
    // unavailable instead of breaking the view
    let db_infra = db.infrastructure_id.unwrap();
    t.postgres_single.delete(&t.ctx, db_infra).await.unwrap();
    let view = t.stacks.get(&t.ctx, created.id).await.unwrap();
    let db = view.resources.iter().find(|r| r.name == "db").unwrap();
    assert_eq!(db.outputs, json!({ "available": false }));
}

#[tokio::test]
async fn test_delete_runs_in_reverse_order_and_survives_failures() {
    let t = TestContext::new();
    let created = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap();
    let view = t.stacks.get(&t.ctx, created.id).await.unwrap();
    let db_infra = view
        .resources
        .iter()
        .find(|r| r.name == "db")
        .unwrap()
        .infrastructure_id
        .unwrap();
    let app_infra = view
        .resources
        .iter()
        .find(|r| r.name == "app")
        .unwrap()
        .infrastructure_id
        .unwrap();

    // sabotage the app resource: its component row is already gone
    t.generic.delete(&t.ctx, app_infra).await.unwrap();

    let mut events = t.runtime.subscribe_events(64).await.unwrap();
    let report = t.stacks.delete(&t.ctx, created.id).await.unwrap();

    // the app deletion failed but db was still attempted and removed
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("app:"));

    // db's container is the only one destroyed by this delete
    loop {
        let event = events.recv().await.unwrap();
        if event.action == EventAction::Destroy {
            assert!(event.container_name.unwrap().contains(&db_infra.to_string()));
            break;
        }
    }

    // the stack row reaches deleted and no resource rows remain
    let stack = t.store.get_stack(created.id).await.unwrap().unwrap();
    assert_eq!(stack.status, StackStatus::Deleted);
    assert!(t.store.list_stack_resources(created.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_clean_stack_attempts_reverse_order() {
    let t = TestContext::new();
    let created = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap();
    let view = t.stacks.get(&t.ctx, created.id).await.unwrap();
    let app_infra = view
        .resources
        .iter()
        .find(|r| r.name == "app")
        .unwrap()
        .infrastructure_id
        .unwrap();

    let mut events = t.runtime.subscribe_events(64).await.unwrap();
    let report = t.stacks.delete(&t.ctx, created.id).await.unwrap();
    assert!(report.errors.is_empty());

    // first destroy observed belongs to app, the later-created resource
    loop {
        let event = events.recv().await.unwrap();
        if event.action == EventAction::Destroy {
            assert!(event.container_name.unwrap().contains(&app_infra.to_string()));
            break;
        }
    }
}

#[tokio::test]
async fn test_create_failure_marks_stack_failed_and_keeps_survivors() {
    let t = TestContext::new();
    // the app container will fail to create
    t.runtime.fail_create_matching("iaas-docker");

    let err = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap_err();
    assert!(err.to_string().contains("app"));

    let stacks = t.store.list_stacks(None).await.unwrap();
    assert_eq!(stacks[0].status, StackStatus::Failed);

    // the db resource created before the failure remains
    let resources = t.store.list_stack_resources(stacks[0].id).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "db");
    assert!(
        t.runtime
            .container_names()
            .iter()
            .any(|n| n.contains("iaas-postgres"))
    );
}

#[tokio::test]
async fn test_validation_rejects_cycles_before_side_effects() {
    let t = TestContext::new();
    let resources = vec![
        StackResourceSpec {
            name: "a".to_string(),
            resource_type: ResourceType::DockerService,
            role: None,
            order: 1,
            depends_on: vec!["b".to_string()],
            spec: json!({ "image": "x" }),
        },
        StackResourceSpec {
            name: "b".to_string(),
            resource_type: ResourceType::DockerService,
            role: None,
            order: 2,
            depends_on: vec!["a".to_string()],
            spec: json!({ "image": "x" }),
        },
    ];

    let err = t.stacks.create(&t.ctx, stack_request(resources)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // nothing was persisted or created
    assert!(t.store.list_stacks(None).await.unwrap().is_empty());
    assert!(t.runtime.container_names().is_empty());
}

#[tokio::test]
async fn test_stack_stop_and_start() {
    let t = TestContext::new();
    let created = t.stacks.create(&t.ctx, stack_request(db_and_app())).await.unwrap();

    t.stacks.stop(&t.ctx, created.id).await.unwrap();
    for name in t.runtime.container_names() {
        assert!(!t.runtime.container(&name).unwrap().running);
    }

    t.stacks.start(&t.ctx, created.id).await.unwrap();
    for name in t.runtime.container_names() {
        assert!(t.runtime.container(&name).unwrap().running);
    }
}
